// src/scheduler.rs
//
// Deterministic per-intersection decision cadence on the shared step clock.
//
// Each registered intersection is Idle or Due. It is Due when it has never
// decided, or when `step - last_decision_step >= interval`. Recording a
// decision puts it back to Idle until the interval has elapsed again.

use std::collections::HashMap;

use crate::types::{IntersectionId, Step};

/// Per-intersection tracking slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecisionSlot {
    /// `None` until the first decision.
    pub last_decision_step: Option<Step>,
    /// Decisions recorded for this intersection during the run.
    pub decisions: u64,
}

#[derive(Debug, Clone)]
pub struct DecisionScheduler {
    interval: Step,
    slots: HashMap<IntersectionId, DecisionSlot>,
}

impl DecisionScheduler {
    /// Track `ids`, all initially Due. An interval of 0 is treated as 1.
    pub fn new<I>(interval: Step, ids: I) -> Self
    where
        I: IntoIterator<Item = IntersectionId>,
    {
        Self {
            interval: interval.max(1),
            slots: ids
                .into_iter()
                .map(|id| (id, DecisionSlot::default()))
                .collect(),
        }
    }

    pub fn interval(&self) -> Step {
        self.interval
    }

    /// Whether `id` needs a decision at `step`. Unregistered ids never do.
    pub fn is_due(&self, id: &str, step: Step) -> bool {
        match self.slots.get(id) {
            Some(slot) => match slot.last_decision_step {
                None => true,
                Some(last) => step.saturating_sub(last) >= self.interval,
            },
            None => false,
        }
    }

    /// Record a completed decision for `id` at `step`.
    pub fn mark_decided(&mut self, id: &str, step: Step) {
        if let Some(slot) = self.slots.get_mut(id) {
            slot.last_decision_step = Some(step);
            slot.decisions += 1;
        }
    }

    pub fn slot(&self, id: &str) -> Option<&DecisionSlot> {
        self.slots.get(id)
    }

    /// Decision counts per intersection.
    pub fn decision_counts(&self) -> HashMap<IntersectionId, u64> {
        self.slots
            .iter()
            .map(|(id, slot)| (id.clone(), slot.decisions))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sched(interval: Step, ids: &[&str]) -> DecisionScheduler {
        DecisionScheduler::new(interval, ids.iter().map(|s| s.to_string()))
    }

    /// Drive the scheduler like the control loop does; returns fire steps.
    fn fire_steps(s: &mut DecisionScheduler, id: &str, steps: Step) -> Vec<Step> {
        let mut fired = Vec::new();
        for step in 0..steps {
            if s.is_due(id, step) {
                s.mark_decided(id, step);
                fired.push(step);
            }
        }
        fired
    }

    #[test]
    fn first_decision_is_immediate() {
        let s = sched(10, &["A"]);
        assert!(s.is_due("A", 0));
    }

    #[test]
    fn fires_once_per_interval() {
        let mut s = sched(10, &["A"]);
        assert_eq!(fire_steps(&mut s, "A", 21), vec![0, 10, 20]);
        assert_eq!(s.slot("A").unwrap().decisions, 3);
        assert_eq!(s.slot("A").unwrap().last_decision_step, Some(20));
    }

    #[test]
    fn never_fires_twice_within_interval() {
        for interval in [1, 2, 3, 7, 10, 50] {
            let mut s = sched(interval, &["A"]);
            let fired = fire_steps(&mut s, "A", 500);
            assert_eq!(fired.first(), Some(&0));
            for pair in fired.windows(2) {
                assert!(pair[1] - pair[0] >= interval, "interval={interval}");
            }
        }
    }

    #[test]
    fn intersections_are_independent() {
        let mut s = sched(10, &["A", "B"]);
        s.mark_decided("A", 0);
        assert!(!s.is_due("A", 5));
        assert!(s.is_due("B", 5));
        s.mark_decided("B", 5);
        assert!(s.is_due("A", 10));
        assert!(!s.is_due("B", 10));
        assert!(s.is_due("B", 15));
    }

    #[test]
    fn unregistered_ids_are_never_due() {
        let mut s = sched(10, &["A"]);
        assert!(!s.is_due("C", 0));
        s.mark_decided("C", 0);
        assert!(s.slot("C").is_none());
    }

    #[test]
    fn zero_interval_fires_every_step() {
        let mut s = sched(0, &["A"]);
        assert_eq!(s.interval(), 1);
        assert_eq!(fire_steps(&mut s, "A", 4), vec![0, 1, 2, 3]);
    }
}
