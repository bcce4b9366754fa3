//! Retry schedule for failed batches: exponential backoff with a ceiling.

use std::time::Duration;

use crate::config::ReplicationConfig;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first failure. Attempt count total is
    /// `max_attempts + 1`.
    pub max_attempts: u32,

    /// Delay before the first retry.
    pub initial_delay: Duration,

    /// Ceiling for the exponential backoff.
    pub max_delay: Duration,

    /// Backoff multiplier (2.0 = double the delay each retry).
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &ReplicationConfig) -> Self {
        Self {
            max_attempts: config.retry_attempts,
            initial_delay: Duration::from_millis(config.retry_initial_delay_ms),
            max_delay: Duration::from_secs(config.retry_max_delay_secs),
            ..Self::default()
        }
    }

    /// Delay for a given retry attempt (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return self.initial_delay;
        }

        let multiplier = self.backoff_factor.powi((attempt - 1) as i32);
        let delay = Duration::from_secs_f64(self.initial_delay.as_secs_f64() * multiplier);

        std::cmp::min(delay, self.max_delay)
    }
}
