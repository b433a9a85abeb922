// src/runner.rs
//
// The control loop.
//
// One run, in order:
//   1) validate the config and build the policy (nothing is launched if
//      either fails),
//   2) launch the simulator and select the controlled intersections once,
//   3) step the simulation: decide for every due intersection, observe
//      every intersection's queue, advance one step, stop on the step
//      budget or when the simulator runs out of traffic,
//   4) close the simulator exactly once, on every exit path.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::actions::ActionMapper;
use crate::actuator::{Actuation, Actuator};
use crate::config::Config;
use crate::error::{ControlError, PolicyError};
use crate::features::build_features;
use crate::health::HealthObserver;
use crate::logging::DecisionSink;
use crate::metrics::StatsSummary;
use crate::rl::policy::{select_policy, Policy};
use crate::scheduler::DecisionScheduler;
use crate::sim::{SimSession, Simulator, SimulatorLauncher};
use crate::topology::select_controlled;
use crate::types::{DecisionRecord, IntersectionId, Step, TerminationReason};

/// Outcome of a completed run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    /// Simulation steps executed.
    pub steps: Step,
    pub termination: TerminationReason,
    /// Intersections that received decisions, in simulator order.
    pub controlled: Vec<IntersectionId>,
    /// Decisions per controlled intersection.
    pub decisions: BTreeMap<IntersectionId, u64>,
    /// Halting-vehicle statistics per controlled intersection.
    pub health: BTreeMap<IntersectionId, StatsSummary>,
    pub policy: String,
    pub actuator: String,
}

impl RunSummary {
    pub fn total_decisions(&self) -> u64 {
        self.decisions.values().sum()
    }
}

pub struct ControlRunner<'a, A, K>
where
    A: Actuator,
    K: DecisionSink,
{
    cfg: &'a Config,
    policy: Box<dyn Policy>,
    mapper: ActionMapper,
    actuator: A,
    sink: K,
}

impl<'a, A, K> ControlRunner<'a, A, K>
where
    A: Actuator,
    K: DecisionSink,
{
    /// Validate `cfg` and build the policy it names.
    ///
    /// Fails with a `ConfigError` when the scenario file or the policy
    /// artifact is missing (the latter only without `allow_random`).
    pub fn new(cfg: &'a Config, actuator: A, sink: K) -> Result<Self, ControlError> {
        cfg.validate()?;
        let policy = select_policy(cfg)?;
        Ok(Self::with_policy(cfg, policy, actuator, sink))
    }

    /// Use an already-built policy. The config is taken as validated.
    pub fn with_policy(cfg: &'a Config, policy: Box<dyn Policy>, actuator: A, sink: K) -> Self {
        Self {
            cfg,
            policy,
            mapper: ActionMapper::from_config(cfg),
            actuator,
            sink,
        }
    }

    /// Build a runner and drive one complete run.
    pub fn start<L>(
        cfg: &'a Config,
        launcher: &mut L,
        actuator: A,
        sink: K,
    ) -> Result<RunSummary, ControlError>
    where
        L: SimulatorLauncher,
    {
        Self::new(cfg, actuator, sink)?.run(launcher)
    }

    fn log_header(&self) {
        let cfg = self.cfg;
        tracing::info!(
            "greenwave | cfg={} | scenario={} | policy={} ({}) | actuator={} | interval={} steps | min_green={}s | max_steps={}",
            cfg.version,
            cfg.scenario.cfg_path.display(),
            self.policy.name(),
            self.policy.version(),
            self.actuator.name(),
            cfg.control.decision_interval,
            self.mapper.min_green_s(),
            cfg.control.max_steps,
        );
    }

    /// Launch the simulator and run until the step budget or natural end.
    pub fn run<L>(&mut self, launcher: &mut L) -> Result<RunSummary, ControlError>
    where
        L: SimulatorLauncher,
    {
        self.log_header();

        let mut session = SimSession::new(launcher.launch(&self.cfg.scenario)?);
        tracing::info!(backend = session.sim().name(), "simulator started");

        let outcome = self.drive(session.sim());
        if let Err(err) = session.close() {
            tracing::warn!(%err, "simulator close failed");
        }

        let summary = outcome?;
        tracing::info!(
            steps = summary.steps,
            termination = summary.termination.as_str(),
            decisions = summary.total_decisions(),
            "simulation complete"
        );
        Ok(summary)
    }

    fn drive<S: Simulator>(&mut self, sim: &mut S) -> Result<RunSummary, ControlError> {
        let cfg = self.cfg;
        let all = sim.traffic_light_ids()?;
        let controlled = select_controlled(&all, &cfg.control.target_junctions);
        tracing::info!(?controlled, "controlling {} traffic lights", controlled.len());

        let mut scheduler =
            DecisionScheduler::new(cfg.control.decision_interval, controlled.iter().cloned());
        let mut health = HealthObserver::new(cfg.logging.health_log_every);

        let mut step: Step = 0;
        let mut termination = TerminationReason::StepBudget;
        while step < cfg.control.max_steps {
            for tl in &controlled {
                if scheduler.is_due(tl, step) {
                    self.decide(sim, tl, step)?;
                    scheduler.mark_decided(tl, step);
                }
                health.observe(sim, tl, step);
            }

            sim.step()?;
            step += 1;

            if sim.min_expected_agents()? == 0 {
                tracing::info!(step, "simulation ended naturally, all vehicles completed their routes");
                termination = TerminationReason::Natural;
                break;
            }
        }
        self.sink.flush();

        let counts = scheduler.decision_counts();
        Ok(RunSummary {
            steps: step,
            termination,
            decisions: controlled
                .iter()
                .map(|id| (id.clone(), counts.get(id).copied().unwrap_or(0)))
                .collect(),
            controlled,
            health: health.summaries(),
            policy: self.policy.name().to_string(),
            actuator: self.actuator.name().to_string(),
        })
    }

    /// One decision: features -> policy -> timings -> actuator -> sink.
    fn decide<S: Simulator>(
        &mut self,
        sim: &mut S,
        tl: &str,
        step: Step,
    ) -> Result<DecisionRecord, ControlError> {
        let sim_time_s = step as f64 * self.cfg.scenario.step_length_s;
        let features = build_features(sim, tl, sim_time_s)?;

        let action = self.policy.choose_action(&features)?;
        let timings = self
            .mapper
            .action_to_timings(action)
            .ok_or(PolicyError::ActionOutOfRange {
                action,
                actions: self.mapper.action_count(),
            })?;

        let decision = DecisionRecord {
            intersection: tl.to_string(),
            step,
            action,
            timings,
            policy: self.policy.name().to_string(),
        };
        let actuation = self.actuator.apply(sim, &decision)?;
        self.sink.record_decision(&decision);

        let every = self.cfg.logging.decision_log_every;
        let applied = !matches!(actuation, Actuation::Skipped | Actuation::Deferred { .. });
        if every > 0 && step % every == 0 {
            tracing::info!(
                step,
                tl,
                action,
                primary_s = timings.primary_s,
                secondary_s = timings.secondary_s,
                applied,
                "decision"
            );
        } else {
            tracing::debug!(
                step,
                tl,
                action,
                primary_s = timings.primary_s,
                secondary_s = timings.secondary_s,
                applied,
                "decision"
            );
        }
        Ok(decision)
    }
}
