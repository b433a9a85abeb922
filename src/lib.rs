//! greenwave core library.
//!
//! Drives a SUMO traffic simulation and lets a learned policy pick signal
//! timings for a fixed set of intersections. The binary (`src/main.rs`) is
//! a thin command-line harness around these components.

pub mod actions;
pub mod actuator;
pub mod config;
pub mod error;
pub mod features;
pub mod health;
pub mod logging;
pub mod metrics;
pub mod rl;
pub mod runner;
pub mod scheduler;
pub mod sim;
pub mod topology;
pub mod types;

// --- Re-exports for ergonomic external use ---------------------------------

pub use actions::ActionMapper;

pub use actuator::{Actuation, Actuator, DecisionRecorder, LogOnlyActuator, PhaseDurationActuator};

pub use config::{ActuationMode, Config, DEFAULT_TARGET_JUNCTIONS, DEFAULT_TIMING_TABLE};

pub use error::{ConfigError, ControlError, PolicyError, SimError};

pub use features::{build_features, FeatureVector, FEATURE_DIM, FEATURE_VERSION};

pub use health::HealthObserver;

pub use logging::{init_tracing, DecisionSink, JsonlSink, NoopSink};

pub use rl::{select_policy, DenseNetwork, ModelPolicy, Policy, RandomPolicy};

pub use runner::{ControlRunner, RunSummary};

pub use scheduler::DecisionScheduler;

pub use sim::scripted::{ScriptedLauncher, ScriptedSimulator, SimTap};
pub use sim::traci::{TraciLauncher, TraciSimulator};
pub use sim::{SimSession, Simulator, SimulatorLauncher};

pub use topology::select_controlled;

pub use types::{DecisionRecord, IntersectionId, Step, TerminationReason, Timings};
