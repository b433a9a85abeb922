// src/features.rs
//
// Versioned per-intersection feature vector for policy input.
//
// The layout is a contract with the exported policy artifact, which was
// trained against exactly this construction:
//
//   [0..4)   vehicle counts on the first four distinct controlled lanes
//   [4..8)   halting counts on the same lanes
//   [8]      time of day in [0, 1), wrapping every 86400 s
//   [9]      congestion proxy min(sum(halting) / 100, 1)
//   [10..15) weather one-hot (clear, rain, fog, snow, storm)
//
// The first four distinct lanes stand in for the N/S/E/W approaches. SUMO
// does not order controlled lanes by compass direction, so this is an
// approximation; it is kept as-is because the model was fit against it.

use serde::{Deserialize, Serialize};

use crate::error::SimError;
use crate::sim::Simulator;

/// Current feature schema version.
/// Increment when adding/removing/reordering elements.
pub const FEATURE_VERSION: u32 = 1;

/// Total feature dimension.
pub const FEATURE_DIM: usize = 15;

/// Number of lanes sampled as approach proxies.
pub const APPROACHES: usize = 4;

pub const IDX_VEHICLES: usize = 0;
pub const IDX_HALTING: usize = IDX_VEHICLES + APPROACHES;
pub const IDX_TIME_OF_DAY: usize = IDX_HALTING + APPROACHES;
pub const IDX_DENSITY: usize = IDX_TIME_OF_DAY + 1;
pub const IDX_WEATHER: usize = IDX_DENSITY + 1;

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Halting vehicles at which the congestion proxy saturates.
const DENSITY_SATURATION: f64 = 100.0;

/// Weather condition slot of the feature vector.
///
/// No weather sensor is wired in; every vector reports `Clear`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Weather {
    Clear,
    Rain,
    Fog,
    Snow,
    Storm,
}

impl Weather {
    pub const COUNT: usize = 5;

    pub fn one_hot(self) -> [f32; Weather::COUNT] {
        let mut out = [0.0; Weather::COUNT];
        out[self as usize] = 1.0;
        out
    }
}

/// Fixed-length policy input for one intersection at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector(pub [f32; FEATURE_DIM]);

impl FeatureVector {
    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn vehicles(&self) -> &[f32] {
        &self.0[IDX_VEHICLES..IDX_VEHICLES + APPROACHES]
    }

    pub fn halting(&self) -> &[f32] {
        &self.0[IDX_HALTING..IDX_HALTING + APPROACHES]
    }

    pub fn time_of_day(&self) -> f32 {
        self.0[IDX_TIME_OF_DAY]
    }

    pub fn density(&self) -> f32 {
        self.0[IDX_DENSITY]
    }

    pub fn weather(&self) -> &[f32] {
        &self.0[IDX_WEATHER..IDX_WEATHER + Weather::COUNT]
    }
}

/// Normalised time of day: `(t mod 86400) / 86400`, always in [0, 1).
pub fn time_of_day(sim_time_s: f64) -> f64 {
    let tod = sim_time_s.rem_euclid(SECONDS_PER_DAY) / SECONDS_PER_DAY;
    // rem_euclid can round up to exactly the modulus for tiny negatives.
    if tod >= 1.0 {
        0.0
    } else {
        tod
    }
}

/// Saturating congestion proxy from total halting vehicles.
pub fn density_proxy(total_halting: f64) -> f64 {
    (total_halting / DENSITY_SATURATION).clamp(0.0, 1.0)
}

/// Controlled lanes with duplicates removed, first-seen order kept.
pub fn distinct_lanes(lanes: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(lanes.len());
    for lane in lanes {
        if !out.contains(&lane) {
            out.push(lane);
        }
    }
    out
}

/// Assemble the vector from already-read lane counts.
pub fn assemble(
    counts: [u32; APPROACHES],
    halts: [u32; APPROACHES],
    sim_time_s: f64,
    weather: Weather,
) -> FeatureVector {
    let mut v = [0.0f32; FEATURE_DIM];
    for i in 0..APPROACHES {
        v[IDX_VEHICLES + i] = counts[i] as f32;
        v[IDX_HALTING + i] = halts[i] as f32;
    }
    let total_halting: f64 = halts.iter().map(|&h| h as f64).sum();
    // The f32 cast can round values just below 1.0 up to 1.0.
    v[IDX_TIME_OF_DAY] = (time_of_day(sim_time_s) as f32).min(1.0 - f32::EPSILON);
    v[IDX_DENSITY] = density_proxy(total_halting) as f32;
    v[IDX_WEATHER..IDX_WEATHER + Weather::COUNT].copy_from_slice(&weather.one_hot());
    FeatureVector(v)
}

/// Read lane state for `tl_id` and build its feature vector.
///
/// Simulator errors are returned unchanged; the caller decides what a
/// failed read means for the current cycle.
pub fn build_features<S>(sim: &mut S, tl_id: &str, sim_time_s: f64) -> Result<FeatureVector, SimError>
where
    S: Simulator + ?Sized,
{
    let lanes = distinct_lanes(sim.controlled_lanes(tl_id)?);

    let mut counts = [0u32; APPROACHES];
    let mut halts = [0u32; APPROACHES];
    for (i, lane) in lanes.iter().take(APPROACHES).enumerate() {
        counts[i] = sim.lane_vehicle_count(lane)?;
        halts[i] = sim.lane_halting_count(lane)?;
    }

    Ok(assemble(counts, halts, sim_time_s, Weather::Clear))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::scripted::ScriptedSimulator;

    #[test]
    fn layout_indices_cover_all_dims() {
        assert_eq!(IDX_WEATHER + Weather::COUNT, FEATURE_DIM);
        assert_eq!(IDX_TIME_OF_DAY, 8);
        assert_eq!(IDX_DENSITY, 9);
    }

    #[test]
    fn distinct_lanes_keeps_first_seen_order() {
        let lanes = ["n_0", "n_0", "e_0", "n_1", "e_0", "s_0"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(distinct_lanes(lanes), vec!["n_0", "e_0", "n_1", "s_0"]);
    }

    #[test]
    fn time_of_day_wraps_daily() {
        for t in [0.0, 1.0, 3_600.5, 43_200.0, 86_399.0, 200_000.0] {
            let a = time_of_day(t);
            let b = time_of_day(t + 86_400.0);
            assert!((0.0..1.0).contains(&a));
            assert!((a - b).abs() < 1e-9, "t={t}: {a} vs {b}");
        }
        assert_eq!(time_of_day(86_400.0), 0.0);
        assert!((time_of_day(43_200.0) - 0.5).abs() < 1e-12);
        assert!((0.0..1.0).contains(&time_of_day(-1.0)));
    }

    #[test]
    fn time_of_day_feature_stays_below_one_near_midnight() {
        let zeros = [0u32; APPROACHES];
        for t in [86_399.999, 86_399.9999, 2.0 * 86_400.0 - 0.001] {
            let v = assemble(zeros, zeros, t, Weather::Clear);
            assert!(
                (0.0..1.0).contains(&v.time_of_day()),
                "t={t}: {}",
                v.time_of_day()
            );
        }
    }

    #[test]
    fn density_saturates() {
        assert_eq!(density_proxy(0.0), 0.0);
        assert!((density_proxy(25.0) - 0.25).abs() < 1e-12);
        assert_eq!(density_proxy(100.0), 1.0);
        assert_eq!(density_proxy(1_000.0), 1.0);
    }

    #[test]
    fn builds_from_first_four_distinct_lanes() {
        let mut sim = ScriptedSimulator::builder()
            .light("J", &["a", "a", "b", "c", "b", "d", "e"])
            .lane("a", 5, 1)
            .lane("b", 6, 2)
            .lane("c", 7, 3)
            .lane("d", 8, 4)
            .lane("e", 99, 99)
            .build();

        let fv = build_features(&mut sim, "J", 21_600.0).unwrap();
        assert_eq!(fv.vehicles(), &[5.0, 6.0, 7.0, 8.0]);
        assert_eq!(fv.halting(), &[1.0, 2.0, 3.0, 4.0]);
        assert!((fv.time_of_day() - 0.25).abs() < 1e-6);
        assert!((fv.density() - 0.10).abs() < 1e-6);
        assert_eq!(fv.weather(), &[1.0, 0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn pads_missing_approaches_with_zero() {
        let mut sim = ScriptedSimulator::builder()
            .light("J", &["a", "a", "b"])
            .lane("a", 3, 2)
            .lane("b", 4, 60)
            .build();

        let fv = build_features(&mut sim, "J", 0.0).unwrap();
        assert_eq!(fv.as_slice().len(), FEATURE_DIM);
        assert_eq!(fv.vehicles(), &[3.0, 4.0, 0.0, 0.0]);
        assert_eq!(fv.halting(), &[2.0, 60.0, 0.0, 0.0]);
        assert!((fv.density() - 0.62).abs() < 1e-6);
    }

    #[test]
    fn heavy_queues_keep_density_in_range() {
        let mut sim = ScriptedSimulator::builder()
            .light("J", &["a", "b", "c", "d"])
            .lane("a", 80, 80)
            .lane("b", 80, 80)
            .lane("c", 80, 80)
            .lane("d", 80, 80)
            .build();

        let fv = build_features(&mut sim, "J", 90_000.0).unwrap();
        assert_eq!(fv.density(), 1.0);
        assert!((0.0..1.0).contains(&fv.time_of_day()));
    }

    #[test]
    fn lane_read_failure_propagates() {
        let mut sim = ScriptedSimulator::builder()
            .light("J", &["a", "b"])
            .failing_lane("b")
            .build();
        assert!(build_features(&mut sim, "J", 0.0).is_err());
    }
}
