// src/metrics.rs
//
// Online statistics for queue-length observation.
// - OnlineStats:  Welford running mean/variance with min/max and a
//                 count of failed reads.
// - StatsSummary: serialisable snapshot for run summaries.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy)]
pub struct OnlineStats {
    n: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
    missed: u64,
}

impl Default for OnlineStats {
    fn default() -> Self {
        Self {
            n: 0,
            mean: 0.0,
            m2: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            missed: 0,
        }
    }
}

impl OnlineStats {
    /// Record one sample. Non-finite values count as missed.
    pub fn add(&mut self, x: f64) {
        if !x.is_finite() {
            self.missed += 1;
            return;
        }
        self.n += 1;
        self.min = self.min.min(x);
        self.max = self.max.max(x);

        let delta = x - self.mean;
        self.mean += delta / self.n as f64;
        self.m2 += delta * (x - self.mean);
    }

    /// Record an observation that could not be taken.
    pub fn miss(&mut self) {
        self.missed += 1;
    }

    pub fn n(&self) -> u64 {
        self.n
    }

    pub fn missed(&self) -> u64 {
        self.missed
    }

    pub fn mean(&self) -> f64 {
        if self.n == 0 {
            0.0
        } else {
            self.mean
        }
    }

    pub fn min(&self) -> f64 {
        if self.n == 0 {
            0.0
        } else {
            self.min
        }
    }

    pub fn max(&self) -> f64 {
        if self.n == 0 {
            0.0
        } else {
            self.max
        }
    }

    /// Population standard deviation.
    pub fn stddev(&self) -> f64 {
        if self.n == 0 {
            0.0
        } else {
            (self.m2 / self.n as f64).sqrt()
        }
    }

    pub fn summary(&self) -> StatsSummary {
        StatsSummary {
            samples: self.n,
            missed: self.missed,
            mean: self.mean(),
            stddev: self.stddev(),
            min: self.min(),
            max: self.max(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StatsSummary {
    pub samples: u64,
    pub missed: u64,
    pub mean: f64,
    pub stddev: f64,
    pub min: f64,
    pub max: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_stats_are_zero() {
        let s = OnlineStats::default().summary();
        assert_eq!(s.samples, 0);
        assert_eq!((s.mean, s.min, s.max, s.stddev), (0.0, 0.0, 0.0, 0.0));
    }

    #[test]
    fn tracks_mean_spread_and_extremes() {
        let mut s = OnlineStats::default();
        for x in [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0] {
            s.add(x);
        }
        assert_eq!(s.n(), 8);
        assert!((s.mean() - 5.0).abs() < 1e-12);
        assert!((s.stddev() - 2.0).abs() < 1e-12);
        assert_eq!(s.min(), 2.0);
        assert_eq!(s.max(), 9.0);
    }

    #[test]
    fn misses_are_counted_separately() {
        let mut s = OnlineStats::default();
        s.add(3.0);
        s.add(f64::NAN);
        s.miss();
        assert_eq!(s.n(), 1);
        assert_eq!(s.missed(), 2);
        assert_eq!(s.mean(), 3.0);
    }
}
