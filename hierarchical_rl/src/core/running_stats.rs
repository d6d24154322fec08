//! Running statistics over episode returns using Welford's online algorithm.
//!
//! Returns are only ever reported, never fed back into control, so the
//! tracker here is a plain value type: each collect call builds one, and the
//! pool merges per-worker trackers with the parallel form of the algorithm.

use serde::{Deserialize, Serialize};

/// Running mean and population standard deviation of scalar values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunningScalarStats {
    mean: f64,
    var_sum: f64,
    count: u64,
}

impl RunningScalarStats {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self {
            mean: 0.0,
            var_sum: 0.0,
            count: 0,
        }
    }

    /// Build a tracker from a batch of values.
    pub fn from_values(values: &[f32]) -> Self {
        let mut stats = Self::new();
        stats.update_batch(values);
        stats
    }

    /// Update with a single value.
    pub fn update(&mut self, x: f32) {
        self.count += 1;
        let x = x as f64;
        let delta = x - self.mean;
        self.mean += delta / self.count as f64;
        let delta2 = x - self.mean;
        self.var_sum += delta * delta2;
    }

    /// Update with multiple values.
    pub fn update_batch(&mut self, values: &[f32]) {
        for &x in values {
            self.update(x);
        }
    }

    /// Mean of the values seen so far (0 when empty).
    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Population variance (0 with fewer than two samples).
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.var_sum / self.count as f64
        }
    }

    /// Population standard deviation.
    pub fn std(&self) -> f64 {
        self.variance().sqrt()
    }

    /// Number of samples.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Whether nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Merge with another instance (parallel Welford).
    pub fn merge(&mut self, other: &RunningScalarStats) {
        if other.count == 0 {
            return;
        }
        if self.count == 0 {
            *self = other.clone();
            return;
        }

        let n_a = self.count as f64;
        let n_b = other.count as f64;
        let total = n_a + n_b;
        let delta = other.mean - self.mean;

        self.mean += delta * n_b / total;
        self.var_sum += other.var_sum + delta * delta * n_a * n_b / total;
        self.count += other.count;
    }

    /// Reset to initial state.
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

impl Default for RunningScalarStats {
    fn default() -> Self {
        Self::new()
    }
}
