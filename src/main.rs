// src/main.rs
//
// Thin harness around the greenwave library.
// - Parse CLI args and build the config (default -> JSON -> env -> CLI).
// - Validate, select the policy, then choose the actuator and decision sink.
// - Run the control loop against a real SUMO process.
// - Print the run summary as JSON on stdout.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use greenwave::{
    init_tracing, select_policy, ActuationMode, Actuator, Config, ControlRunner, DecisionSink,
    JsonlSink, LogOnlyActuator, NoopSink, PhaseDurationActuator, TraciLauncher,
};

/// Learned signal-timing control for SUMO scenarios.
#[derive(Parser, Debug)]
#[command(name = "greenwave", version)]
struct Cli {
    /// Path to the .sumocfg scenario file.
    #[arg(long)]
    cfg: Option<PathBuf>,

    /// Path to the exported policy artifact (JSON).
    #[arg(long)]
    model: Option<PathBuf>,

    /// Run with sumo-gui instead of headless sumo.
    #[arg(long)]
    gui: bool,

    /// Simulation steps to run [default: 1800].
    #[arg(long)]
    max_steps: Option<u64>,

    /// Steps between decisions for the same junction [default: 10].
    #[arg(long)]
    decision_interval: Option<u64>,

    /// Minimum green per leg in seconds [default: 15].
    #[arg(long)]
    min_green: Option<u32>,

    /// Use uniform-random actions when the policy artifact is missing.
    #[arg(long)]
    allow_random: bool,

    /// Simulated seconds per step [default: 1.0].
    #[arg(long)]
    step_length: Option<f64>,

    /// Seed for the random fallback.
    #[arg(long)]
    seed: Option<u64>,

    /// Junction to control (repeatable; replaces the default set).
    #[arg(long = "junction", value_name = "ID")]
    junctions: Vec<String>,

    /// Control every signal in the network.
    #[arg(long, conflicts_with = "junctions")]
    all_junctions: bool,

    /// Write chosen greens into the running phase instead of only logging.
    #[arg(long)]
    actuate: bool,

    /// Append every decision to this JSONL file.
    #[arg(long, value_name = "PATH")]
    decisions_jsonl: Option<PathBuf>,

    /// JSON config file applied on top of the defaults.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace). RUST_LOG wins.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

/// Defaults, then the JSON file, then GREENWAVE_* env, then CLI flags.
fn build_config(cli: &Cli) -> Result<Config> {
    let mut cfg = match &cli.config {
        Some(path) => Config::from_json_file(path)?,
        None => Config::default(),
    };

    cfg.apply_env_overrides();

    // ---------- CLI overrides ----------
    if let Some(path) = &cli.cfg {
        cfg.scenario.cfg_path = path.clone();
    }
    if cli.gui {
        cfg.scenario.gui = true;
    }
    if let Some(s) = cli.step_length {
        cfg.scenario.step_length_s = s;
    }
    if let Some(path) = &cli.model {
        cfg.policy.model_path = path.clone();
    }
    if cli.allow_random {
        cfg.policy.allow_random = true;
    }
    if cli.seed.is_some() {
        cfg.policy.seed = cli.seed;
    }
    if let Some(n) = cli.max_steps {
        cfg.control.max_steps = n;
    }
    if let Some(n) = cli.decision_interval {
        cfg.control.decision_interval = n;
    }
    if let Some(s) = cli.min_green {
        cfg.control.min_green_s = s;
    }
    if cli.all_junctions {
        cfg.control.target_junctions.clear();
    } else if !cli.junctions.is_empty() {
        cfg.control.target_junctions = cli.junctions.clone();
    }
    if cli.actuate {
        cfg.control.actuation = ActuationMode::PhaseDuration;
    }
    if cli.decisions_jsonl.is_some() {
        cfg.logging.decisions_jsonl = cli.decisions_jsonl.clone();
    }

    Ok(cfg)
}

fn build_actuator(mode: ActuationMode) -> Box<dyn Actuator> {
    match mode {
        ActuationMode::LogOnly => Box::new(LogOnlyActuator::new()),
        ActuationMode::PhaseDuration => Box::new(PhaseDurationActuator::new()),
    }
}

/// A sink that cannot be opened falls back to no file output.
fn build_sink(cfg: &Config) -> Box<dyn DecisionSink> {
    let Some(path) = &cfg.logging.decisions_jsonl else {
        return Box::new(NoopSink);
    };
    match JsonlSink::create(path) {
        Ok(sink) => Box::new(sink),
        Err(err) => {
            tracing::warn!(
                path = %path.display(),
                %err,
                "failed to create decision log, continuing without it"
            );
            Box::new(NoopSink)
        }
    }
}

/// Startup checks first; the decision log is only created for a run that
/// can actually start.
fn prepare(
    cfg: &Config,
) -> Result<ControlRunner<'_, Box<dyn Actuator>, Box<dyn DecisionSink>>> {
    cfg.validate()?;
    let policy = select_policy(cfg)?;
    let actuator = build_actuator(cfg.control.actuation);
    let sink = build_sink(cfg);
    Ok(ControlRunner::with_policy(cfg, policy, actuator, sink))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cfg = build_config(&cli).context("building configuration")?;
    let mut runner = prepare(&cfg).context("startup checks failed")?;
    let mut launcher = TraciLauncher::default();

    let summary = runner.run(&mut launcher).context("control run failed")?;

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
