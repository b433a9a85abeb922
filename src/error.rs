// src/error.rs
//
// Error taxonomy for the control loop.
//
// - ConfigError: fatal at startup, raised before the simulator is launched.
// - SimError:    simulator process / protocol / query failures.
// - PolicyError: artifact loading and inference failures.
// - ControlError: what a full run can fail with.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("scenario config not found: {0}")]
    MissingScenario(PathBuf),

    #[error(
        "policy artifact not found: {0} (pass --allow-random to run with uniform-random actions)"
    )]
    MissingPolicy(PathBuf),

    #[error("timing table is empty")]
    EmptyTimingTable,

    #[error("step length must be positive and finite, got {0}")]
    InvalidStepLength(f64),

    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Error)]
pub enum SimError {
    #[error("failed to spawn simulator `{binary}`: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    #[error("simulator did not accept a connection on port {port} within {waited_ms} ms")]
    ConnectTimeout { port: u16, waited_ms: u64 },

    #[error("simulator i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("simulator rejected command 0x{command:02x}: {message}")]
    Command { command: u8, message: String },

    #[error("malformed simulator response: {0}")]
    Protocol(String),

    #[error("unknown {kind} `{id}`")]
    UnknownObject { kind: &'static str, id: String },

    #[error("simulator connection already closed")]
    Closed,
}

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("failed to read policy artifact {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse policy artifact {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid policy artifact: {0}")]
    Shape(String),

    #[error("policy produced a non-finite score at index {index}")]
    NonFiniteScore { index: usize },

    #[error("policy chose action {action} outside [0, {actions})")]
    ActionOutOfRange { action: usize, actions: usize },
}

#[derive(Debug, Error)]
pub enum ControlError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Sim(#[from] SimError),

    #[error(transparent)]
    Policy(#[from] PolicyError),
}
