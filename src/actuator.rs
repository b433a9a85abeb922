// src/actuator.rs
//
// Turning decisions into simulator commands.
//
// - Actuator: trait the control loop calls once per decision
// - LogOnlyActuator: leaves SUMO's programs alone
// - PhaseDurationActuator: writes the chosen green into each green phase once
// - DecisionRecorder: optional shared record of decisions, for tests and tools

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::SimError;
use crate::sim::Simulator;
use crate::types::{DecisionRecord, IntersectionId};

/// Phase index of the primary green in a standard two-approach program.
pub const PRIMARY_GREEN_PHASE: u32 = 0;
/// Phase index of the secondary green.
pub const SECONDARY_GREEN_PHASE: u32 = 2;

/// What an actuator did with a decision.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Actuation {
    /// Nothing was sent to the simulator.
    Skipped,
    /// The running phase's remaining duration was set.
    Applied { phase: u32, seconds: f64 },
    /// Nothing was written: the signal is in a transition phase, or the
    /// running phase was already set once.
    Deferred { phase: u32 },
}

pub trait Actuator {
    fn name(&self) -> &str;

    fn apply(
        &mut self,
        sim: &mut dyn Simulator,
        decision: &DecisionRecord,
    ) -> Result<Actuation, SimError>;
}

impl<T: Actuator + ?Sized> Actuator for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn apply(
        &mut self,
        sim: &mut dyn Simulator,
        decision: &DecisionRecord,
    ) -> Result<Actuation, SimError> {
        (**self).apply(sim, decision)
    }
}

/// Thread-safe decision recorder.
#[derive(Debug, Clone, Default)]
pub struct DecisionRecorder {
    decisions: Arc<Mutex<Vec<DecisionRecord>>>,
}

impl DecisionRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, decision: &DecisionRecord) {
        if let Ok(mut decisions) = self.decisions.lock() {
            decisions.push(decision.clone());
        }
    }

    /// All recorded decisions, in order.
    pub fn decisions(&self) -> Vec<DecisionRecord> {
        self.decisions.lock().map(|d| d.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.decisions.lock().map(|d| d.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Observes only. This is the default: the controlled network keeps
/// running SUMO's fixed-time programs.
#[derive(Debug, Clone, Default)]
pub struct LogOnlyActuator {
    recorder: Option<DecisionRecorder>,
}

impl LogOnlyActuator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also push every decision into `recorder`.
    pub fn with_recorder(recorder: DecisionRecorder) -> Self {
        Self {
            recorder: Some(recorder),
        }
    }
}

impl Actuator for LogOnlyActuator {
    fn name(&self) -> &str {
        "log_only"
    }

    fn apply(
        &mut self,
        _sim: &mut dyn Simulator,
        decision: &DecisionRecord,
    ) -> Result<Actuation, SimError> {
        if let Some(recorder) = &self.recorder {
            recorder.record(decision);
        }
        Ok(Actuation::Skipped)
    }
}

/// Last phase seen for one signal and whether it was already written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PhaseSlot {
    phase: u32,
    written: bool,
}

/// Sets the remaining duration of a green phase to the chosen timing.
///
/// Phase 0 takes the primary green, phase 2 the secondary. Any other phase
/// (yellow, all-red) is left untouched. Each phase instance is written at
/// most once: later decisions inside the same phase are deferred, so the
/// program always runs on to the next phase.
#[derive(Debug, Clone, Default)]
pub struct PhaseDurationActuator {
    slots: HashMap<IntersectionId, PhaseSlot>,
    recorder: Option<DecisionRecorder>,
}

impl PhaseDurationActuator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also push every decision into `recorder`.
    pub fn with_recorder(recorder: DecisionRecorder) -> Self {
        Self {
            slots: HashMap::new(),
            recorder: Some(recorder),
        }
    }
}

impl Actuator for PhaseDurationActuator {
    fn name(&self) -> &str {
        "phase_duration"
    }

    fn apply(
        &mut self,
        sim: &mut dyn Simulator,
        decision: &DecisionRecord,
    ) -> Result<Actuation, SimError> {
        if let Some(recorder) = &self.recorder {
            recorder.record(decision);
        }

        let phase = sim.current_phase(&decision.intersection)?;
        let slot = self
            .slots
            .entry(decision.intersection.clone())
            .or_insert(PhaseSlot {
                phase,
                written: false,
            });
        if slot.phase != phase {
            *slot = PhaseSlot {
                phase,
                written: false,
            };
        }
        if slot.written {
            return Ok(Actuation::Deferred { phase });
        }

        let seconds = match phase {
            PRIMARY_GREEN_PHASE => decision.timings.primary_s,
            SECONDARY_GREEN_PHASE => decision.timings.secondary_s,
            _ => return Ok(Actuation::Deferred { phase }),
        };
        let seconds = f64::from(seconds);
        sim.set_phase_duration(&decision.intersection, seconds)?;
        slot.written = true;
        Ok(Actuation::Applied { phase, seconds })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::scripted::ScriptedSimulator;
    use crate::types::Timings;

    fn decision(tl: &str) -> DecisionRecord {
        DecisionRecord {
            intersection: tl.to_string(),
            step: 0,
            action: 4,
            timings: Timings {
                primary_s: 40,
                secondary_s: 20,
            },
            policy: "test".into(),
        }
    }

    #[test]
    fn log_only_never_touches_simulator() {
        let mut sim = ScriptedSimulator::builder().light("J", &["a"]).build();
        let tap = sim.tap();
        let recorder = DecisionRecorder::new();
        let mut act = LogOnlyActuator::with_recorder(recorder.clone());

        let out = act.apply(&mut sim, &decision("J")).unwrap();
        assert_eq!(out, Actuation::Skipped);
        assert!(tap.phase_writes().is_empty());
        assert_eq!(recorder.len(), 1);
        assert_eq!(recorder.decisions()[0].action, 4);
    }

    #[test]
    fn without_recorder_nothing_is_kept() {
        let mut sim = ScriptedSimulator::builder().light("J", &["a"]).build();
        let mut act = LogOnlyActuator::new();
        for _ in 0..3 {
            assert_eq!(
                act.apply(&mut sim, &decision("J")).unwrap(),
                Actuation::Skipped
            );
        }
        assert!(act.recorder.is_none());
    }

    #[test]
    fn each_phase_instance_is_written_once() {
        let mut sim = ScriptedSimulator::builder()
            .light("J", &["a"])
            .program(&[5, 2, 5, 2])
            .build();
        let tap = sim.tap();
        let mut act = PhaseDurationActuator::new();

        // Phase 0 is stretched to 40 s once; repeats inside it are deferred.
        assert_eq!(
            act.apply(&mut sim, &decision("J")).unwrap(),
            Actuation::Applied {
                phase: 0,
                seconds: 40.0
            }
        );
        for _ in 0..3 {
            sim.step().unwrap();
            assert_eq!(
                act.apply(&mut sim, &decision("J")).unwrap(),
                Actuation::Deferred { phase: 0 }
            );
        }
        assert_eq!(tap.phase_writes(), vec![("J".to_string(), 40.0)]);

        // Run out phase 0 (37 steps left) and enter the yellow.
        for _ in 0..37 {
            sim.step().unwrap();
        }
        assert_eq!(
            act.apply(&mut sim, &decision("J")).unwrap(),
            Actuation::Deferred { phase: 1 }
        );

        // Two yellow steps later the secondary green gets its write.
        sim.step().unwrap();
        sim.step().unwrap();
        assert_eq!(
            act.apply(&mut sim, &decision("J")).unwrap(),
            Actuation::Applied {
                phase: 2,
                seconds: 20.0
            }
        );
        assert_eq!(
            tap.phase_writes(),
            vec![("J".to_string(), 40.0), ("J".to_string(), 20.0)]
        );
    }

    #[test]
    fn signals_are_tracked_separately() {
        let mut sim = ScriptedSimulator::builder()
            .light("J", &["a"])
            .light("K", &["b"])
            .build();
        let tap = sim.tap();
        let recorder = DecisionRecorder::new();
        let mut act = PhaseDurationActuator::with_recorder(recorder.clone());

        act.apply(&mut sim, &decision("J")).unwrap();
        act.apply(&mut sim, &decision("K")).unwrap();
        act.apply(&mut sim, &decision("J")).unwrap();

        assert_eq!(
            tap.phase_writes(),
            vec![("J".to_string(), 40.0), ("K".to_string(), 40.0)]
        );
        assert_eq!(recorder.len(), 3);
    }

    #[test]
    fn phase_duration_reports_unknown_signal() {
        let mut sim = ScriptedSimulator::builder().light("J", &["a"]).build();
        let mut act = PhaseDurationActuator::new();
        assert!(act.apply(&mut sim, &decision("nope")).is_err());
    }
}
