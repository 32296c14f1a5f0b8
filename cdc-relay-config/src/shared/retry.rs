use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Retry policy configuration for stream opening and transport reconnection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RetryConfig {
    /// Maximum number of retry attempts before giving up.
    pub max_attempts: u32,
    /// Initial delay, in milliseconds, before the first retry.
    pub initial_delay_ms: u64,
    /// Maximum delay between retries.
    pub max_delay_ms: u64,
    /// Exponential backoff multiplier applied to the delay after each attempt.
    pub backoff_factor: f32,
}

impl RetryConfig {
    /// Returns the delay to wait before the retry with the given 1-based `attempt` number.
    ///
    /// The delay grows by `backoff_factor` after every attempt and is capped at `max_delay_ms`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let delay_ms = self.initial_delay_ms as f64 * (self.backoff_factor as f64).powi(exponent);
        let delay_ms = delay_ms.min(self.max_delay_ms as f64).max(0.0);

        Duration::from_millis(delay_ms as u64)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 500,
            max_delay_ms: 10_000,
            backoff_factor: 2.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_exponentially_up_to_the_cap() {
        let retry = RetryConfig::default();

        assert_eq!(retry.delay_for_attempt(1), Duration::from_millis(500));
        assert_eq!(retry.delay_for_attempt(2), Duration::from_millis(1_000));
        assert_eq!(retry.delay_for_attempt(3), Duration::from_millis(2_000));
        assert_eq!(retry.delay_for_attempt(10), Duration::from_millis(10_000));
    }

    #[test]
    fn attempt_zero_uses_the_initial_delay() {
        let retry = RetryConfig {
            initial_delay_ms: 10,
            ..RetryConfig::default()
        };

        assert_eq!(retry.delay_for_attempt(0), Duration::from_millis(10));
    }
}
