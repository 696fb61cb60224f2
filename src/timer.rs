use rand::Rng;

use crate::params::Range;

/// Countdown deciding when free play moves on to the next pattern.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DurationTimer {
    duration: f64,
    started_at: f64,
}

impl DurationTimer {
    /// Arm a timer with a duration drawn uniformly from `range`. Equal bounds
    /// give a fixed duration.
    pub fn new<R: Rng>(range: Range, now: f64, rng: &mut R) -> Self {
        Self {
            duration: range.sample(rng),
            started_at: now,
        }
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn remaining(&self, now: f64) -> f64 {
        (self.started_at + self.duration - now).max(0.0)
    }

    pub fn is_expired(&self, now: f64) -> bool {
        now - self.started_at >= self.duration
    }
}
