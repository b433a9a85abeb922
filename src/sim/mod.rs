// src/sim/mod.rs
//
// Simulator boundary layer.
//
// The control loop never talks to SUMO directly: it drives a `Simulator`
// obtained from a `SimulatorLauncher`. Implementations:
// - traci:    spawns SUMO and speaks the TraCI TCP protocol
// - scripted: deterministic in-memory network for dry runs and tests
//
// Every query is synchronous and step-scoped: values refer to the last
// completed simulation step.

pub mod scripted;
pub mod traci;

use crate::config::ScenarioConfig;
use crate::error::SimError;
use crate::types::IntersectionId;

/// Capabilities the control loop needs from a running simulation.
///
/// Calls are not reentrant; the single control thread owns the value.
pub trait Simulator {
    /// Advance the simulation by exactly one step.
    fn step(&mut self) -> Result<(), SimError>;

    /// All signal-controlled intersection ids, in simulator order.
    fn traffic_light_ids(&mut self) -> Result<Vec<IntersectionId>, SimError>;

    /// Lanes controlled by a signal, one entry per signal link (so lanes
    /// usually repeat).
    fn controlled_lanes(&mut self, tl_id: &str) -> Result<Vec<String>, SimError>;

    /// Vehicles on the lane during the last step.
    fn lane_vehicle_count(&mut self, lane_id: &str) -> Result<u32, SimError>;

    /// Halting vehicles (speed < 0.1 m/s) on the lane during the last step.
    fn lane_halting_count(&mut self, lane_id: &str) -> Result<u32, SimError>;

    /// Vehicles still running or waiting to be inserted. Zero means the
    /// scenario has run out of traffic.
    fn min_expected_agents(&mut self) -> Result<u32, SimError>;

    /// Index of the running phase in the signal's active program.
    fn current_phase(&mut self, tl_id: &str) -> Result<u32, SimError>;

    /// Set the remaining duration of the running phase (seconds).
    fn set_phase_duration(&mut self, tl_id: &str, seconds: f64) -> Result<(), SimError>;

    /// Release the connection / process. Further calls fail with `Closed`.
    fn close(&mut self) -> Result<(), SimError>;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

/// Starts a simulation for a scenario.
pub trait SimulatorLauncher {
    type Sim: Simulator;

    fn launch(&mut self, scenario: &ScenarioConfig) -> Result<Self::Sim, SimError>;
}

/// Owns a running simulator and guarantees it is closed exactly once.
///
/// `close` is explicit so its error can be reported; if it was never
/// called (early return, panic unwinding) `Drop` closes and discards the
/// error.
pub struct SimSession<S: Simulator> {
    sim: S,
    closed: bool,
}

impl<S: Simulator> SimSession<S> {
    pub fn new(sim: S) -> Self {
        Self { sim, closed: false }
    }

    pub fn sim(&mut self) -> &mut S {
        &mut self.sim
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn close(&mut self) -> Result<(), SimError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.sim.close()
    }
}

impl<S: Simulator> Drop for SimSession<S> {
    fn drop(&mut self) {
        if !self.closed {
            self.closed = true;
            if let Err(err) = self.sim.close() {
                tracing::warn!(backend = self.sim.name(), %err, "close on drop failed");
            }
        }
    }
}
