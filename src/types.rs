// src/types.rs
//
// Common shared types for the greenwave control loop.

use serde::{Deserialize, Serialize};

/// Simulator-assigned traffic-light / junction identifier.
pub type IntersectionId = String;

/// Simulated step index (one call to the simulator's step function).
pub type Step = u64;

/// Enforced green durations for one decision, in seconds.
///
/// `primary` is the first green axis of a two-axis plan (N/S in the
/// reference scenario), `secondary` the second one (E/W).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timings {
    pub primary_s: u32,
    pub secondary_s: u32,
}

/// One control decision for one intersection at one step.
///
/// Produced and logged, never stored as queryable state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub intersection: IntersectionId,
    pub step: Step,
    pub action: usize,
    pub timings: Timings,
    /// Name of the policy that produced the action (e.g. "model", "random").
    pub policy: String,
}

/// Why the control loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminationReason {
    /// The configured maximum step count was reached.
    StepBudget,
    /// The simulator reported no agents left to simulate.
    Natural,
}

impl TerminationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminationReason::StepBudget => "step_budget",
            TerminationReason::Natural => "natural",
        }
    }
}
