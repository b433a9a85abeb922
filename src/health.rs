// src/health.rs
//
// Read-only queue observation for controlled intersections.
//
// Runs for every controlled intersection on every step. It never changes
// control flow: read failures are counted and logged at debug, nothing is
// returned to the loop as an error.

use std::collections::{BTreeMap, HashMap};

use crate::error::SimError;
use crate::metrics::{OnlineStats, StatsSummary};
use crate::sim::Simulator;
use crate::types::{IntersectionId, Step};

/// Halting vehicles summed over every controlled lane entry of `tl_id`.
///
/// Lanes are summed per signal link, so a lane feeding several links is
/// counted once per link.
pub fn total_halting<S>(sim: &mut S, tl_id: &str) -> Result<u64, SimError>
where
    S: Simulator + ?Sized,
{
    let mut total = 0u64;
    for lane in sim.controlled_lanes(tl_id)? {
        total += u64::from(sim.lane_halting_count(&lane)?);
    }
    Ok(total)
}

#[derive(Debug, Clone)]
pub struct HealthObserver {
    log_every: Step,
    stats: HashMap<IntersectionId, OnlineStats>,
}

impl HealthObserver {
    /// `log_every` of 0 disables the periodic info line.
    pub fn new(log_every: Step) -> Self {
        Self {
            log_every,
            stats: HashMap::new(),
        }
    }

    fn log_due(&self, step: Step) -> bool {
        self.log_every > 0 && step % self.log_every == 0
    }

    /// Sample the queue at `tl_id`. Returns the halting total when the read
    /// succeeded.
    pub fn observe<S>(&mut self, sim: &mut S, tl_id: &str, step: Step) -> Option<u64>
    where
        S: Simulator + ?Sized,
    {
        let log_due = self.log_due(step);
        let stats = self.stats.entry(tl_id.to_string()).or_default();

        match total_halting(sim, tl_id) {
            Ok(halting) => {
                stats.add(halting as f64);
                if log_due {
                    tracing::info!(step, tl = tl_id, halting, "queue");
                }
                Some(halting)
            }
            Err(err) => {
                stats.miss();
                tracing::debug!(step, tl = tl_id, error = %err, "no data");
                None
            }
        }
    }

    /// Per-intersection queue statistics, ordered by id.
    pub fn summaries(&self) -> BTreeMap<IntersectionId, StatsSummary> {
        self.stats
            .iter()
            .map(|(id, s)| (id.clone(), s.summary()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::scripted::ScriptedSimulator;

    #[test]
    fn sums_every_link_entry() {
        let mut sim = ScriptedSimulator::builder()
            .light("J", &["a", "a", "b"])
            .lane("a", 9, 3)
            .lane("b", 9, 4)
            .build();
        assert_eq!(total_halting(&mut sim, "J").unwrap(), 10);
    }

    #[test]
    fn failures_are_swallowed_and_counted() {
        let mut sim = ScriptedSimulator::builder()
            .light("J", &["a", "bad"])
            .lane("a", 1, 1)
            .failing_lane("bad")
            .light("K", &["a"])
            .build();

        let mut obs = HealthObserver::new(100);
        assert_eq!(obs.observe(&mut sim, "J", 0), None);
        assert_eq!(obs.observe(&mut sim, "K", 0), Some(1));
        assert_eq!(obs.observe(&mut sim, "missing", 1), None);

        let s = obs.summaries();
        assert_eq!(s["J"].samples, 0);
        assert_eq!(s["J"].missed, 1);
        assert_eq!(s["K"].samples, 1);
        assert_eq!(s["missing"].missed, 1);
    }

    #[test]
    fn zero_cadence_never_logs() {
        let obs = HealthObserver::new(0);
        assert!(!obs.log_due(0));
        let obs = HealthObserver::new(100);
        assert!(obs.log_due(0));
        assert!(obs.log_due(200));
        assert!(!obs.log_due(150));
    }
}
