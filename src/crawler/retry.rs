//! Retry policy for transiently failed tasks

use crate::config::CrawlerConfig;
use std::time::Duration;

/// Bounded attempts with capped exponential backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Executions per task, including the first one
    pub max_attempts: u32,

    /// Delay before the first retry
    pub backoff_base: Duration,

    /// Upper bound for any single delay
    pub backoff_cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_millis(500),
            backoff_cap: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &CrawlerConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            backoff_base: config.backoff_base(),
            backoff_cap: config.backoff_cap(),
        }
    }

    /// Returns true if a task that has run `attempts` times may run again
    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    /// Delay before retry number `retry` (0 for the first retry)
    ///
    /// `base * 2^retry`, saturating, never above the cap.
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        self.backoff_base
            .checked_mul(factor)
            .unwrap_or(self.backoff_cap)
            .min(self.backoff_cap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            backoff_base: Duration::from_millis(100),
            backoff_cap: Duration::from_millis(1000),
        }
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = policy();
        assert_eq!(policy.backoff_for(0), Duration::from_millis(100));
        assert_eq!(policy.backoff_for(1), Duration::from_millis(200));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(400));
        assert_eq!(policy.backoff_for(3), Duration::from_millis(800));
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = policy();
        assert_eq!(policy.backoff_for(4), Duration::from_millis(1000));
        assert_eq!(policy.backoff_for(31), Duration::from_millis(1000));
        assert_eq!(policy.backoff_for(200), Duration::from_millis(1000));
    }

    #[test]
    fn test_should_retry() {
        let policy = policy();
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
        assert!(!policy.should_retry(4));
    }

    #[test]
    fn test_from_config() {
        let config = CrawlerConfig {
            max_attempts: 5,
            backoff_base_ms: 250,
            backoff_cap_ms: 4000,
            ..CrawlerConfig::default()
        };

        let policy = RetryPolicy::from_config(&config);
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.backoff_for(0), Duration::from_millis(250));
        assert_eq!(policy.backoff_for(10), Duration::from_millis(4000));
    }
}
