// src/rl/mod.rs
//
// Learned-policy side of the controller.
//
// Key components:
// - DenseNetwork: JSON-exported feed-forward network evaluated with ndarray
// - Policy: trait for action selection (model or random fallback)
// - select_policy: startup choice between the two

pub mod model;
pub mod policy;

// Re-exports for convenience
pub use model::{argmax, Activation, ArtifactFile, DenseNetwork, LayerFile, ARTIFACT_FORMAT_VERSION};
pub use policy::{select_policy, ModelPolicy, Policy, RandomPolicy, MODEL_POLICY_VERSION};
