//! Retry policy
//!
//! Exponential backoff with uniform jitter, shared by executor retries and
//! retried orchestrator writes.

use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Delays are spread uniformly over `±jitter_ratio` of the nominal value
    pub jitter_ratio: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter_ratio: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Policy for orchestrator writes, independent of the executor budget
    pub fn for_store_writes() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
            jitter_ratio: 0.2,
        }
    }

    /// Nominal delay after `attempt` failed: `base * 2^(attempt-1)`, capped
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20);
        self.base_delay
            .saturating_mul(1 << exponent)
            .min(self.max_delay)
    }

    /// Backoff with jitter applied
    pub fn delay(&self, attempt: u32) -> Duration {
        let sample = rand::rng().random_range(-1.0..=1.0);
        jittered(self.backoff(attempt), self.jitter_ratio, sample)
    }

    pub fn has_attempts_left(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_attempts == 0 {
            anyhow::bail!("max_attempts must be at least 1");
        }

        if self.base_delay > self.max_delay {
            anyhow::bail!("backoff base must not exceed the backoff cap");
        }

        if !(0.0..=1.0).contains(&self.jitter_ratio) {
            anyhow::bail!("jitter_ratio must be between 0 and 1");
        }

        Ok(())
    }
}

/// Scale `delay` by `1 + ratio * sample`, with `sample` in `[-1, 1]`
fn jittered(delay: Duration, ratio: f64, sample: f64) -> Duration {
    delay.mul_f64((1.0 + ratio * sample).max(0.0))
}
