//! Per-key change tracking: deltas between samples and exponential moving
//! averages. The evaluator uses it to turn step counters and timestamps into
//! a smoothed images/second figure.

use std::collections::HashMap;
use std::time::Instant;

/// Smoothed value returned by [`Change::moving_metrics`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MovingValue {
    pub mean: f64,
    /// Exponentially weighted standard deviation, when requested.
    pub std: Option<f64>,
}

#[derive(Debug, Clone, Copy)]
struct MovingState {
    mean: f64,
    variance: f64,
}

/// Keyed delta and moving-average state.
#[derive(Debug, Clone, Default)]
pub struct Change {
    previous: HashMap<String, f64>,
    moving: HashMap<String, MovingState>,
}

impl Change {
    pub fn new() -> Self {
        Self::default()
    }

    /// Difference from the last value stored under `key`, then store `value`.
    ///
    /// The first call for a key has nothing to compare against and returns 0.
    pub fn delta(&mut self, key: &str, value: f64) -> f64 {
        match self.previous.insert(key.to_string(), value) {
            Some(previous) => value - previous,
            None => 0.0,
        }
    }

    /// Fold `sample` into the exponential moving average kept under `key`.
    ///
    /// The decay is `2 / (window + 1)`, so the average has an effective memory
    /// of roughly `window` samples. The first sample seeds the mean directly.
    /// With `with_std`, an exponentially weighted variance is tracked as well
    /// and its square root returned.
    pub fn moving_metrics(
        &mut self,
        key: &str,
        sample: f64,
        with_std: bool,
        window: usize,
    ) -> MovingValue {
        let alpha = 2.0 / (window.max(1) as f64 + 1.0);
        let state = self
            .moving
            .entry(key.to_string())
            .and_modify(|s| {
                let diff = sample - s.mean;
                let increment = alpha * diff;
                s.mean += increment;
                s.variance = (1.0 - alpha) * (s.variance + diff * increment);
            })
            .or_insert(MovingState {
                mean: sample,
                variance: 0.0,
            });
        MovingValue {
            mean: state.mean,
            std: with_std.then(|| state.variance.sqrt()),
        }
    }

    /// Forget every key.
    pub fn reset(&mut self) {
        self.previous.clear();
        self.moving.clear();
    }
}

/// Source of wall-clock seconds for rate computations.
pub trait Clock: Send {
    fn now_secs(&self) -> f64;
}

/// Monotonic clock measuring seconds since its creation.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_secs(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}
