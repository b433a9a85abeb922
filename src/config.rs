// src/config.rs
//
// Central configuration for the greenwave control loop.
// This is the single source of truth for the scenario to launch, the
// policy artifact, decision cadence, the timing-combination table and the
// logging cadences.
//
// Precedence (lowest to highest): Default -> JSON config file -> env
// overrides (GREENWAVE_*) -> CLI flags. The result is immutable for the
// lifetime of a run and is threaded explicitly into every component.

use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Human-readable config schema version, printed in the startup header.
pub const CONFIG_VERSION: &str = "greenwave-cfg-v1";

/// Junctions of the reference Mumbai scenario that get active decisioning.
/// Every other signal keeps SUMO's own program.
pub const DEFAULT_TARGET_JUNCTIONS: [&str; 4] = [
    "cluster_10272736790_1936355361_2629418478_296362019_#1more",
    "GS_cluster_471591707_5353822010",
    "1468337691",
    "2629418499",
];

/// (primary green, secondary green) pairs in seconds. The model's output
/// layer has one score per entry, in this order.
pub const DEFAULT_TIMING_TABLE: [(u32, u32); 9] = [
    (20, 40),
    (25, 35),
    (30, 30),
    (35, 25),
    (40, 20),
    (45, 45),
    (50, 40),
    (55, 35),
    (60, 30),
];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Config schema version.
    pub version: String,
    /// Simulator launch parameters.
    pub scenario: ScenarioConfig,
    /// Policy artifact and fallback permission.
    pub policy: PolicyConfig,
    /// Decision cadence, timing table and controlled junctions.
    pub control: ControlConfig,
    /// Log cadences and optional decision JSONL output.
    pub logging: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioConfig {
    /// Path to the `.sumocfg` scenario file.
    pub cfg_path: PathBuf,
    /// Launch `sumo-gui` instead of headless `sumo`.
    pub gui: bool,
    /// Simulated seconds per step.
    pub step_length_s: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Path to the exported dense-network artifact (JSON).
    pub model_path: PathBuf,
    /// Permit uniform-random actions when the artifact is missing.
    pub allow_random: bool,
    /// Seed for the random fallback. `None` seeds from OS entropy.
    pub seed: Option<u64>,
}

/// How a decision reaches the simulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActuationMode {
    /// Log the decision and leave SUMO's programs untouched.
    LogOnly,
    /// Write the chosen green into the running phase's duration.
    PhaseDuration,
}

impl ActuationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActuationMode::LogOnly => "log_only",
            ActuationMode::PhaseDuration => "phase_duration",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Hard cap on simulated steps.
    pub max_steps: u64,
    /// Steps between two decisions for the same junction.
    pub decision_interval: u64,
    /// Floor applied to each green leg independently (seconds).
    pub min_green_s: u32,
    /// Discrete action space.
    pub timing_table: Vec<(u32, u32)>,
    /// Junctions to control. Empty means the whole network.
    pub target_junctions: Vec<String>,
    /// Actuation strategy.
    pub actuation: ActuationMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Decisions are logged at info level on steps divisible by this.
    pub decision_log_every: u64,
    /// Health lines are logged on steps divisible by this.
    pub health_log_every: u64,
    /// Optional JSONL file receiving every decision record.
    pub decisions_jsonl: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION.to_string(),
            scenario: ScenarioConfig::default(),
            policy: PolicyConfig::default(),
            control: ControlConfig::default(),
            logging: LogConfig::default(),
        }
    }
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            cfg_path: PathBuf::from("mumbai/sumo/osm.sumocfg"),
            gui: false,
            step_length_s: 1.0,
        }
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("rl_policy.json"),
            allow_random: false,
            seed: None,
        }
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            max_steps: 1800,
            decision_interval: 10,
            min_green_s: 15,
            timing_table: DEFAULT_TIMING_TABLE.to_vec(),
            target_junctions: DEFAULT_TARGET_JUNCTIONS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            actuation: ActuationMode::LogOnly,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            decision_log_every: 200,
            health_log_every: 100,
            decisions_jsonl: None,
        }
    }
}

impl Config {
    /// Load a config from a JSON file. Missing fields keep their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply research overrides from the environment.
    ///
    ///   - GREENWAVE_MIN_GREEN          (u32, seconds)
    ///   - GREENWAVE_DECISION_INTERVAL  (u64, steps)
    ///   - GREENWAVE_HEALTH_LOG_EVERY   (u64, steps)
    ///
    /// Any variable that fails to parse is ignored with a warning.
    pub fn apply_env_overrides(&mut self) {
        env_override("GREENWAVE_MIN_GREEN", &mut self.control.min_green_s);
        env_override(
            "GREENWAVE_DECISION_INTERVAL",
            &mut self.control.decision_interval,
        );
        env_override(
            "GREENWAVE_HEALTH_LOG_EVERY",
            &mut self.logging.health_log_every,
        );
    }

    /// Startup checks that do not depend on the policy artifact.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let step = self.scenario.step_length_s;
        if !(step.is_finite() && step > 0.0) {
            return Err(ConfigError::InvalidStepLength(step));
        }
        if self.control.timing_table.is_empty() {
            return Err(ConfigError::EmptyTimingTable);
        }
        if !self.scenario.cfg_path.is_file() {
            return Err(ConfigError::MissingScenario(
                self.scenario.cfg_path.clone(),
            ));
        }
        Ok(())
    }

    /// Number of discrete actions the policy chooses from.
    pub fn action_count(&self) -> usize {
        self.control.timing_table.len()
    }
}

fn env_override<T>(name: &str, slot: &mut T)
where
    T: FromStr + Display,
{
    let Ok(raw) = std::env::var(name) else {
        return;
    };
    match raw.trim().parse::<T>() {
        Ok(v) => {
            tracing::info!("[config] {name} = {v} (overrode default)");
            *slot = v;
        }
        Err(_) => {
            tracing::warn!("[config] could not parse {name} = {raw:?}; keeping {slot}");
        }
    }
}
