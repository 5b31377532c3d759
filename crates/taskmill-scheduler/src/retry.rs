//! Retry delay policy for failed tasks.

use chrono::Duration;

use crate::TaskManagerConfig;

/// Exponential backoff: `base * 2^(attempts - 1)`, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    base: Duration,
    max: Duration,
}

impl RetryPolicy {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    pub fn from_config(config: &TaskManagerConfig) -> Self {
        Self::new(config.retry_base.to_chrono(), config.retry_max.to_chrono())
    }

    /// Delay before the next run after `attempts` consecutive failures.
    pub fn delay(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(30);
        let factor = 1i32 << exponent;
        self.base
            .checked_mul(factor)
            .unwrap_or(self.max)
            .min(self.max)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Duration::minutes(5), Duration::hours(1))
    }
}
