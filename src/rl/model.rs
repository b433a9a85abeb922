// src/rl/model.rs
//
// Dense feed-forward network loaded from a JSON artifact.
//
// Artifact layout:
//
//   { "format_version": 1,
//     "feature_version": 1,
//     "layers": [ { "weights": [[..out_dim..] x in_dim],
//                   "bias": [..out_dim..],
//                   "activation": "relu" | "linear" | "tanh" }, ... ] }
//
// Weights are stored row-major as (in_dim, out_dim) so a forward pass is
// `x.dot(W) + b` on a single input row.

use std::path::Path;

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::error::PolicyError;
use crate::features::{FeatureVector, FEATURE_DIM, FEATURE_VERSION};

/// Artifact schema version this loader understands.
pub const ARTIFACT_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    Relu,
    Linear,
    Tanh,
}

impl Activation {
    fn apply(self, x: &mut Array1<f32>) {
        match self {
            Activation::Relu => x.mapv_inplace(|v| v.max(0.0)),
            Activation::Tanh => x.mapv_inplace(f32::tanh),
            Activation::Linear => {}
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerFile {
    pub weights: Vec<Vec<f32>>,
    pub bias: Vec<f32>,
    pub activation: Activation,
}

/// On-disk form of the network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactFile {
    pub format_version: u32,
    pub feature_version: u32,
    pub layers: Vec<LayerFile>,
}

#[derive(Debug, Clone)]
struct DenseLayer {
    weights: Array2<f32>, // (in_dim, out_dim)
    bias: Array1<f32>,
    activation: Activation,
}

/// Validated, ready-to-evaluate network.
#[derive(Debug, Clone)]
pub struct DenseNetwork {
    layers: Vec<DenseLayer>,
}

impl DenseNetwork {
    /// Read and validate an artifact file.
    pub fn load(path: &Path, action_count: usize) -> Result<Self, PolicyError> {
        let raw = std::fs::read_to_string(path).map_err(|source| PolicyError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let file: ArtifactFile =
            serde_json::from_str(&raw).map_err(|source| PolicyError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_artifact(file, action_count)
    }

    /// Validate shapes and versions and convert to ndarray form.
    ///
    /// The first layer must take `FEATURE_DIM` inputs, consecutive layers
    /// must chain, and the last layer must emit one score per action.
    pub fn from_artifact(file: ArtifactFile, action_count: usize) -> Result<Self, PolicyError> {
        if file.format_version != ARTIFACT_FORMAT_VERSION {
            return Err(PolicyError::Shape(format!(
                "unsupported format_version {} (expected {ARTIFACT_FORMAT_VERSION})",
                file.format_version
            )));
        }
        if file.feature_version != FEATURE_VERSION {
            return Err(PolicyError::Shape(format!(
                "artifact trained on feature_version {}, runtime builds {FEATURE_VERSION}",
                file.feature_version
            )));
        }
        if file.layers.is_empty() {
            return Err(PolicyError::Shape("artifact has no layers".into()));
        }

        let mut layers = Vec::with_capacity(file.layers.len());
        let mut expected_in = FEATURE_DIM;
        for (i, layer) in file.layers.into_iter().enumerate() {
            let rows = layer.weights.len();
            if rows != expected_in {
                return Err(PolicyError::Shape(format!(
                    "layer {i}: expected {expected_in} input rows, found {rows}"
                )));
            }
            let cols = layer.bias.len();
            if cols == 0 {
                return Err(PolicyError::Shape(format!("layer {i}: empty bias")));
            }
            if let Some(bad) = layer.weights.iter().position(|r| r.len() != cols) {
                return Err(PolicyError::Shape(format!(
                    "layer {i}: weight row {bad} has {} columns, bias has {cols}",
                    layer.weights[bad].len()
                )));
            }

            let flat: Vec<f32> = layer.weights.into_iter().flatten().collect();
            let weights = Array2::from_shape_vec((rows, cols), flat)
                .map_err(|e| PolicyError::Shape(format!("layer {i}: {e}")))?;
            layers.push(DenseLayer {
                weights,
                bias: Array1::from(layer.bias),
                activation: layer.activation,
            });
            expected_in = cols;
        }

        if expected_in != action_count {
            return Err(PolicyError::Shape(format!(
                "output layer has {expected_in} scores, action space has {action_count}"
            )));
        }

        Ok(Self { layers })
    }

    pub fn output_dim(&self) -> usize {
        self.layers.last().map_or(0, |l| l.bias.len())
    }

    /// Forward pass for one feature row.
    pub fn scores(&self, features: &FeatureVector) -> Array1<f32> {
        let mut x = Array1::from(features.as_slice().to_vec());
        for layer in &self.layers {
            let mut y = x.dot(&layer.weights) + &layer.bias;
            layer.activation.apply(&mut y);
            x = y;
        }
        x
    }
}

/// Index of the highest score; the first one wins ties.
pub fn argmax(scores: &Array1<f32>) -> Result<usize, PolicyError> {
    let mut best: Option<(usize, f32)> = None;
    for (index, &s) in scores.iter().enumerate() {
        if !s.is_finite() {
            return Err(PolicyError::NonFiniteScore { index });
        }
        match best {
            Some((_, b)) if s <= b => {}
            _ => best = Some((index, s)),
        }
    }
    best.map(|(i, _)| i)
        .ok_or_else(|| PolicyError::Shape("empty score vector".into()))
}
