// src/actions.rs
//
// Discrete action space -> enforced signal timings.
//
// An action is an index into the timing-combination table. Each leg of
// the chosen (primary, secondary) pair is raised to the minimum green
// independently; the pair is never rescaled as a whole.

use crate::config::Config;
use crate::types::Timings;

#[derive(Debug, Clone)]
pub struct ActionMapper {
    table: Vec<(u32, u32)>,
    min_green_s: u32,
}

impl ActionMapper {
    pub fn new(table: Vec<(u32, u32)>, min_green_s: u32) -> Self {
        Self { table, min_green_s }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(cfg.control.timing_table.clone(), cfg.control.min_green_s)
    }

    /// Size of the action space.
    pub fn action_count(&self) -> usize {
        self.table.len()
    }

    pub fn min_green_s(&self) -> u32 {
        self.min_green_s
    }

    /// Enforced timings for `action`, or `None` if the index is outside
    /// the table.
    pub fn action_to_timings(&self, action: usize) -> Option<Timings> {
        self.table.get(action).map(|&(primary, secondary)| Timings {
            primary_s: primary.max(self.min_green_s),
            secondary_s: secondary.max(self.min_green_s),
        })
    }
}
