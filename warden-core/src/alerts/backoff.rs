use std::time::Duration;

use crate::config::AlertPolicy;

/// Exponential retry schedule for alert delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_policy(policy: &AlertPolicy) -> Self {
        Self {
            max_retries: policy.max_retries,
            initial_backoff: Duration::from_millis(policy.initial_backoff_ms),
            max_backoff: Duration::from_millis(policy.max_backoff_ms),
        }
    }

    /// Total delivery attempts including the first.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Delay before retry number `retry` (0-based): initial, 2x, 4x, ... capped.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.min(16));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_policy(&AlertPolicy::default())
    }
}
