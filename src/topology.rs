// src/topology.rs
//
// Controlled-intersection selection.

use std::collections::HashSet;

use crate::types::IntersectionId;

/// Which of the simulator's signals get active decisioning.
///
/// Returns the ids present both in `all` and in `targets`, in simulator
/// order, each at most once. Targets the simulator does not know are
/// dropped silently. An empty `targets` selects the whole network.
pub fn select_controlled(all: &[IntersectionId], targets: &[IntersectionId]) -> Vec<IntersectionId> {
    let mut seen: HashSet<&str> = HashSet::with_capacity(all.len());

    if targets.is_empty() {
        let selected: Vec<IntersectionId> = all
            .iter()
            .filter(|id| seen.insert(id.as_str()))
            .cloned()
            .collect();
        tracing::warn!(
            total = all.len(),
            controlled = selected.len(),
            "no target junctions configured, controlling the whole network (not recommended)"
        );
        return selected;
    }

    let wanted: HashSet<&str> = targets.iter().map(String::as_str).collect();
    let selected: Vec<IntersectionId> = all
        .iter()
        .filter(|id| wanted.contains(id.as_str()) && seen.insert(id.as_str()))
        .cloned()
        .collect();

    tracing::info!(
        total = all.len(),
        controlled = selected.len(),
        "selected target junctions; others keep the simulator's default programs"
    );
    if selected.len() < wanted.len() {
        let missing: Vec<&str> = wanted
            .iter()
            .copied()
            .filter(|t| !seen.contains(t))
            .collect();
        tracing::debug!(?missing, "target junctions not present in the network");
    }

    selected
}
