// src/sim/scripted.rs
//
// Deterministic in-memory simulator.
//
// Used for dry runs and tests:
// - a fixed set of signals, each controlling a list of lanes
// - per-lane (vehicles, halting) series, indexed by step (cyclic)
// - optional natural completion after N steps
// - lanes can be marked as failing to exercise error paths
// - each signal runs a fixed-time program whose running phase can be
//   shortened or stretched with `set_phase_duration`, as in SUMO
// - every command is visible through a shared `SimTap`

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use crate::config::ScenarioConfig;
use crate::error::SimError;
use crate::sim::{Simulator, SimulatorLauncher};
use crate::types::IntersectionId;

/// Default program: green, yellow, green, yellow (seconds = steps).
const DEFAULT_PROGRAM: [u64; 4] = [30, 3, 30, 3];

#[derive(Debug, Default)]
struct TapState {
    launches: usize,
    steps: u64,
    close_calls: usize,
    phase_writes: Vec<(IntersectionId, f64)>,
    phase_starts: Vec<(IntersectionId, u64, u32)>,
}

/// Shared view of what the control loop did to a scripted simulator.
#[derive(Debug, Clone, Default)]
pub struct SimTap {
    inner: Arc<Mutex<TapState>>,
}

impl SimTap {
    fn with<R>(&self, f: impl FnOnce(&mut TapState) -> R) -> Option<R> {
        self.inner.lock().ok().map(|mut s| f(&mut s))
    }

    pub fn launches(&self) -> usize {
        self.with(|s| s.launches).unwrap_or(0)
    }

    pub fn steps(&self) -> u64 {
        self.with(|s| s.steps).unwrap_or(0)
    }

    pub fn close_calls(&self) -> usize {
        self.with(|s| s.close_calls).unwrap_or(0)
    }

    /// (signal id, seconds) for every `set_phase_duration` call, in order.
    pub fn phase_writes(&self) -> Vec<(IntersectionId, f64)> {
        self.with(|s| s.phase_writes.clone()).unwrap_or_default()
    }

    /// Phases `tl_id` entered through program progression, in order.
    pub fn phases_entered(&self, tl_id: &str) -> Vec<u32> {
        self.with(|s| {
            s.phase_starts
                .iter()
                .filter(|(id, _, _)| id == tl_id)
                .map(|&(_, _, phase)| phase)
                .collect()
        })
        .unwrap_or_default()
    }
}

/// Running phase of one signal and the steps left in it.
#[derive(Debug, Clone, Copy)]
struct PhaseClock {
    phase: usize,
    remaining: u64,
}

#[derive(Debug, Clone)]
struct LaneScript {
    /// (vehicles, halting) per step; the series repeats.
    series: Vec<(u32, u32)>,
}

impl LaneScript {
    fn at(&self, step: u64) -> (u32, u32) {
        if self.series.is_empty() {
            return (0, 0);
        }
        self.series[(step % self.series.len() as u64) as usize]
    }
}

pub struct ScriptedSimulator {
    lights: Vec<(IntersectionId, Vec<String>)>,
    lanes: HashMap<String, LaneScript>,
    failing_lanes: HashSet<String>,
    finish_after: Option<u64>,
    program: Vec<u64>,
    clocks: HashMap<IntersectionId, PhaseClock>,
    step: u64,
    closed: bool,
    tap: SimTap,
}

impl ScriptedSimulator {
    pub fn builder() -> ScriptedBuilder {
        ScriptedBuilder::default()
    }

    pub fn tap(&self) -> SimTap {
        self.tap.clone()
    }

    /// Steps completed so far.
    pub fn current_step(&self) -> u64 {
        self.step
    }

    fn ensure_open(&self) -> Result<(), SimError> {
        if self.closed {
            Err(SimError::Closed)
        } else {
            Ok(())
        }
    }

    fn lane(&self, lane_id: &str) -> Result<(u32, u32), SimError> {
        self.ensure_open()?;
        if self.failing_lanes.contains(lane_id) {
            return Err(SimError::Command {
                command: 0xa3,
                message: format!("scripted failure reading lane {lane_id}"),
            });
        }
        self.lanes
            .get(lane_id)
            .map(|l| l.at(self.step))
            .ok_or_else(|| SimError::UnknownObject {
                kind: "lane",
                id: lane_id.to_string(),
            })
    }

    fn clock(&mut self, tl_id: &str) -> Result<&mut PhaseClock, SimError> {
        self.ensure_open()?;
        self.clocks
            .get_mut(tl_id)
            .ok_or_else(|| SimError::UnknownObject {
                kind: "traffic light",
                id: tl_id.to_string(),
            })
    }

    fn light(&self, tl_id: &str) -> Result<&[String], SimError> {
        self.ensure_open()?;
        self.lights
            .iter()
            .find(|(id, _)| id == tl_id)
            .map(|(_, lanes)| lanes.as_slice())
            .ok_or_else(|| SimError::UnknownObject {
                kind: "traffic light",
                id: tl_id.to_string(),
            })
    }
}

impl Simulator for ScriptedSimulator {
    fn step(&mut self) -> Result<(), SimError> {
        self.ensure_open()?;
        self.step += 1;

        let mut started = Vec::new();
        for (id, clock) in self.clocks.iter_mut() {
            clock.remaining = clock.remaining.saturating_sub(1);
            if clock.remaining == 0 {
                clock.phase = (clock.phase + 1) % self.program.len();
                clock.remaining = self.program[clock.phase];
                started.push((id.clone(), self.step, clock.phase as u32));
            }
        }
        self.tap.with(|s| {
            s.steps += 1;
            s.phase_starts.extend(started);
        });
        Ok(())
    }

    fn traffic_light_ids(&mut self) -> Result<Vec<IntersectionId>, SimError> {
        self.ensure_open()?;
        Ok(self.lights.iter().map(|(id, _)| id.clone()).collect())
    }

    fn controlled_lanes(&mut self, tl_id: &str) -> Result<Vec<String>, SimError> {
        self.light(tl_id).map(|lanes| lanes.to_vec())
    }

    fn lane_vehicle_count(&mut self, lane_id: &str) -> Result<u32, SimError> {
        self.lane(lane_id).map(|(vehicles, _)| vehicles)
    }

    fn lane_halting_count(&mut self, lane_id: &str) -> Result<u32, SimError> {
        self.lane(lane_id).map(|(_, halting)| halting)
    }

    fn min_expected_agents(&mut self) -> Result<u32, SimError> {
        self.ensure_open()?;
        match self.finish_after {
            Some(n) if self.step >= n => Ok(0),
            _ => Ok(1),
        }
    }

    fn current_phase(&mut self, tl_id: &str) -> Result<u32, SimError> {
        Ok(self.clock(tl_id)?.phase as u32)
    }

    /// Replaces the time left in the running phase (one step per second).
    fn set_phase_duration(&mut self, tl_id: &str, seconds: f64) -> Result<(), SimError> {
        let clock = self.clock(tl_id)?;
        clock.remaining = (seconds.max(0.0).ceil() as u64).max(1);
        self.tap
            .with(|s| s.phase_writes.push((tl_id.to_string(), seconds)));
        Ok(())
    }

    fn close(&mut self) -> Result<(), SimError> {
        self.ensure_open()?;
        self.closed = true;
        self.tap.with(|s| s.close_calls += 1);
        Ok(())
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Builder for `ScriptedSimulator`.
#[derive(Debug, Default)]
pub struct ScriptedBuilder {
    lights: Vec<(IntersectionId, Vec<String>)>,
    lanes: HashMap<String, LaneScript>,
    failing_lanes: HashSet<String>,
    finish_after: Option<u64>,
    program: Option<Vec<u64>>,
}

impl ScriptedBuilder {
    /// Add a signal controlling `lanes` (duplicates allowed, as in SUMO).
    /// Lanes without an explicit script read as (0, 0).
    pub fn light(mut self, id: &str, lanes: &[&str]) -> Self {
        for lane in lanes {
            self.lanes
                .entry(lane.to_string())
                .or_insert_with(|| LaneScript { series: Vec::new() });
        }
        self.lights.push((
            id.to_string(),
            lanes.iter().map(|l| l.to_string()).collect(),
        ));
        self
    }

    /// Constant (vehicles, halting) reading for a lane.
    pub fn lane(self, id: &str, vehicles: u32, halting: u32) -> Self {
        self.lane_series(id, vec![(vehicles, halting)])
    }

    /// Per-step (vehicles, halting) readings for a lane; repeats cyclically.
    pub fn lane_series(mut self, id: &str, series: Vec<(u32, u32)>) -> Self {
        self.lanes.insert(id.to_string(), LaneScript { series });
        self
    }

    /// Every query on this lane fails.
    pub fn failing_lane(mut self, id: &str) -> Self {
        self.failing_lanes.insert(id.to_string());
        self
    }

    /// Report zero expected agents once `steps` steps have completed.
    pub fn finish_after(mut self, steps: u64) -> Self {
        self.finish_after = Some(steps);
        self
    }

    /// Phase durations in steps, shared by every signal. Zero-length
    /// phases are stretched to one step.
    pub fn program(mut self, durations: &[u64]) -> Self {
        self.program = Some(durations.iter().map(|&d| d.max(1)).collect());
        self
    }

    pub fn build(self) -> ScriptedSimulator {
        let program = match self.program {
            Some(p) if !p.is_empty() => p,
            _ => DEFAULT_PROGRAM.to_vec(),
        };
        let clocks = self
            .lights
            .iter()
            .map(|(id, _)| {
                let clock = PhaseClock {
                    phase: 0,
                    remaining: program[0],
                };
                (id.clone(), clock)
            })
            .collect();
        ScriptedSimulator {
            lights: self.lights,
            lanes: self.lanes,
            failing_lanes: self.failing_lanes,
            finish_after: self.finish_after,
            program,
            clocks,
            step: 0,
            closed: false,
            tap: SimTap::default(),
        }
    }
}

/// Hands out a prepared `ScriptedSimulator` once.
pub struct ScriptedLauncher {
    sim: Option<ScriptedSimulator>,
    tap: SimTap,
}

impl ScriptedLauncher {
    pub fn new(sim: ScriptedSimulator) -> Self {
        let tap = sim.tap();
        Self {
            sim: Some(sim),
            tap,
        }
    }

    pub fn tap(&self) -> SimTap {
        self.tap.clone()
    }
}

impl SimulatorLauncher for ScriptedLauncher {
    type Sim = ScriptedSimulator;

    fn launch(&mut self, _scenario: &ScenarioConfig) -> Result<ScriptedSimulator, SimError> {
        self.tap.with(|s| s.launches += 1);
        self.sim
            .take()
            .ok_or_else(|| SimError::Protocol("scripted simulator already launched".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lane_series_cycles_with_step() {
        let mut sim = ScriptedSimulator::builder()
            .light("A", &["a0"])
            .lane_series("a0", vec![(1, 0), (2, 1), (3, 2)])
            .build();

        let mut seen = Vec::new();
        for _ in 0..4 {
            seen.push(sim.lane_vehicle_count("a0").unwrap());
            sim.step().unwrap();
        }
        assert_eq!(seen, vec![1, 2, 3, 1]);
    }

    #[test]
    fn natural_completion_after_configured_steps() {
        let mut sim = ScriptedSimulator::builder().finish_after(2).build();
        assert_eq!(sim.min_expected_agents().unwrap(), 1);
        sim.step().unwrap();
        sim.step().unwrap();
        assert_eq!(sim.min_expected_agents().unwrap(), 0);
    }

    #[test]
    fn unknown_and_failing_objects_error() {
        let mut sim = ScriptedSimulator::builder()
            .light("A", &["a0"])
            .failing_lane("a0")
            .build();
        assert!(matches!(
            sim.controlled_lanes("Z"),
            Err(SimError::UnknownObject { .. })
        ));
        assert!(sim.lane_halting_count("a0").is_err());
        assert!(matches!(
            sim.lane_halting_count("nope"),
            Err(SimError::UnknownObject { .. })
        ));
    }

    #[test]
    fn closed_simulator_rejects_calls() {
        let mut sim = ScriptedSimulator::builder().light("A", &["a0"]).build();
        sim.close().unwrap();
        assert!(matches!(sim.step(), Err(SimError::Closed)));
        assert!(matches!(sim.close(), Err(SimError::Closed)));
    }

    #[test]
    fn program_advances_and_phase_duration_overrides_remaining_time() {
        let mut sim = ScriptedSimulator::builder()
            .light("A", &["a0"])
            .program(&[2, 1, 2, 1])
            .build();
        let tap = sim.tap();

        let mut phases = Vec::new();
        for _ in 0..6 {
            phases.push(sim.current_phase("A").unwrap());
            sim.step().unwrap();
        }
        assert_eq!(phases, vec![0, 0, 1, 2, 2, 3]);
        assert_eq!(tap.phases_entered("A"), vec![1, 2, 3, 0]);

        // Back in phase 0: stretch it to 5 steps.
        sim.set_phase_duration("A", 5.0).unwrap();
        for _ in 0..4 {
            sim.step().unwrap();
            assert_eq!(sim.current_phase("A").unwrap(), 0);
        }
        sim.step().unwrap();
        assert_eq!(sim.current_phase("A").unwrap(), 1);
    }

    #[test]
    fn launcher_hands_out_once() {
        let mut launcher = ScriptedLauncher::new(ScriptedSimulator::builder().build());
        let scenario = ScenarioConfig::default();
        assert!(launcher.launch(&scenario).is_ok());
        assert!(launcher.launch(&scenario).is_err());
        assert_eq!(launcher.tap().launches(), 2);
    }
}
