// src/rl/policy.rs
//
// Policy trait and implementations.
//
// A policy maps one intersection's feature vector to an index into the
// timing-combination table. Implementations:
// - ModelPolicy:  exported dense network, greedy argmax
// - RandomPolicy: uniform fallback, only when explicitly permitted

use std::path::Path;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use super::model::{argmax, DenseNetwork};
use crate::config::Config;
use crate::error::{ConfigError, ControlError, PolicyError};
use crate::features::FeatureVector;

pub const MODEL_POLICY_VERSION: &str = "dense-argmax-v1";
pub const RANDOM_POLICY_VERSION: &str = "uniform-random-v1";

/// Policy trait: interface for all policy implementations.
///
/// Called from the single control thread; `&mut self` lets stateful
/// policies (the RNG fallback) advance their state.
pub trait Policy {
    /// Short name for logs and decision records.
    fn name(&self) -> &str;

    /// Version string of the implementation.
    fn version(&self) -> &str;

    /// Optional identifier of the loaded artifact.
    fn policy_id(&self) -> Option<&str> {
        None
    }

    /// Pick an action index in `[0, action_count)`.
    fn choose_action(&mut self, features: &FeatureVector) -> Result<usize, PolicyError>;
}

/// Greedy policy over a trained dense network.
#[derive(Debug, Clone)]
pub struct ModelPolicy {
    network: DenseNetwork,
    policy_id: String,
}

impl ModelPolicy {
    pub fn load(path: &Path, action_count: usize) -> Result<Self, PolicyError> {
        let network = DenseNetwork::load(path, action_count)?;
        let policy_id = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self { network, policy_id })
    }

    pub fn from_network(network: DenseNetwork, policy_id: impl Into<String>) -> Self {
        Self {
            network,
            policy_id: policy_id.into(),
        }
    }
}

impl Policy for ModelPolicy {
    fn name(&self) -> &str {
        "model"
    }

    fn version(&self) -> &str {
        MODEL_POLICY_VERSION
    }

    fn policy_id(&self) -> Option<&str> {
        Some(&self.policy_id)
    }

    fn choose_action(&mut self, features: &FeatureVector) -> Result<usize, PolicyError> {
        argmax(&self.network.scores(features))
    }
}

/// Uniform-random actions. Ignores the features.
#[derive(Debug, Clone)]
pub struct RandomPolicy {
    rng: ChaCha8Rng,
    action_count: usize,
}

impl RandomPolicy {
    /// Seeded for reproducible runs; `None` draws the seed from OS entropy.
    pub fn new(action_count: usize, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        Self { rng, action_count }
    }
}

impl Policy for RandomPolicy {
    fn name(&self) -> &str {
        "random"
    }

    fn version(&self) -> &str {
        RANDOM_POLICY_VERSION
    }

    fn choose_action(&mut self, _features: &FeatureVector) -> Result<usize, PolicyError> {
        if self.action_count == 0 {
            return Err(PolicyError::Shape("action space is empty".into()));
        }
        Ok(self.rng.gen_range(0..self.action_count))
    }
}

/// Build the policy for a run.
///
/// The model artifact wins when it exists. Without it the random fallback
/// is used only if `allow_random` is set; otherwise this is a startup
/// error and no simulator should be launched.
pub fn select_policy(cfg: &Config) -> Result<Box<dyn Policy>, ControlError> {
    let path = &cfg.policy.model_path;
    let actions = cfg.action_count();

    if path.exists() {
        let policy = ModelPolicy::load(path, actions)?;
        tracing::info!(path = %path.display(), actions, "loaded policy artifact");
        return Ok(Box::new(policy));
    }

    if cfg.policy.allow_random {
        tracing::warn!(
            path = %path.display(),
            seed = ?cfg.policy.seed,
            "policy artifact not found; using uniform-random actions"
        );
        return Ok(Box::new(RandomPolicy::new(actions, cfg.policy.seed)));
    }

    Err(ConfigError::MissingPolicy(path.clone()).into())
}
