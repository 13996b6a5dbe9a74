//! Exponential backoff with jitter for transient feed failures.

use std::time::Duration;

use rand::Rng;
use serde::Deserialize;

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_seconds: f64,
    pub max_seconds: f64,
    /// Fraction of the backoff added as random jitter.
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_seconds: 1.0,
            max_seconds: 60.0,
            jitter_factor: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Delay before the retry following `attempts` completed attempts.
    pub fn backoff(&self, attempts: u32) -> Duration {
        let exp = attempts.min(16) as i32;
        let backoff = (self.base_seconds * 2f64.powi(exp)).min(self.max_seconds);
        let jitter_ceiling = self.jitter_factor * backoff;
        let jitter = if jitter_ceiling > 0.0 {
            rand::thread_rng().gen_range(0.0..jitter_ceiling)
        } else {
            0.0
        };
        Duration::from_secs_f64(backoff + jitter)
    }
}
