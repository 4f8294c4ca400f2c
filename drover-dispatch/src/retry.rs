//! Retry policy for chunk attempts.
//!
//! Deliberately deterministic: the wait is a pure function of the
//! attempt number, so scheduler behaviour is reproducible in tests and
//! explainable from logs.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Hard ceiling on `max_retries`, whatever the configuration says.
const MAX_RETRIES_CEILING: u32 = 10;

/// Exponential backoff with a capped wait and a bounded attempt count.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Base wait before the first retry, seconds.
    ///
    /// Default: 30 seconds
    #[serde(default = "defaults::base_wait_secs")]
    pub base_wait_secs: u64,

    /// Cap on any single wait, seconds.
    ///
    /// Default: 900 seconds (15 minutes)
    #[serde(default = "defaults::max_wait_secs")]
    pub max_wait_secs: u64,

    /// Retries before a chunk is abandoned. Clamped to 0..=10.
    ///
    /// Default: 3
    #[serde(default = "defaults::max_retries")]
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_wait_secs: defaults::base_wait_secs(),
            max_wait_secs: defaults::max_wait_secs(),
            max_retries: defaults::max_retries(),
        }
    }
}

mod defaults {
    pub const fn base_wait_secs() -> u64 {
        30
    }

    pub const fn max_wait_secs() -> u64 {
        900
    }

    pub const fn max_retries() -> u32 {
        3
    }
}

impl RetryPolicy {
    /// Wait before the attempt after `attempt` failures:
    /// `min(base * 2^attempt, max_wait)`.
    #[must_use]
    pub fn next_wait(&self, attempt: u32) -> Duration {
        let secs = if attempt >= 63 {
            self.max_wait_secs
        } else {
            self.base_wait_secs
                .saturating_mul(1u64 << attempt)
                .min(self.max_wait_secs)
        };
        Duration::from_secs(secs)
    }

    /// Whether the chunk has used up its retries.
    #[must_use]
    pub const fn should_abandon(&self, attempt: u32) -> bool {
        attempt > self.effective_max_retries()
    }

    #[must_use]
    pub const fn effective_max_retries(&self) -> u32 {
        if self.max_retries > MAX_RETRIES_CEILING {
            MAX_RETRIES_CEILING
        } else {
            self.max_retries
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_wait_doubles_and_caps() {
        let policy = RetryPolicy {
            base_wait_secs: 30,
            max_wait_secs: 900,
            max_retries: 3,
        };
        assert_eq!(policy.next_wait(0), Duration::from_secs(30));
        assert_eq!(policy.next_wait(1), Duration::from_secs(60));
        assert_eq!(policy.next_wait(2), Duration::from_secs(120));
        assert_eq!(policy.next_wait(5), Duration::from_secs(900));
        assert_eq!(policy.next_wait(200), Duration::from_secs(900));
    }

    #[test]
    fn test_should_abandon_past_max_retries() {
        let policy = RetryPolicy {
            max_retries: 3,
            ..Default::default()
        };
        assert!(!policy.should_abandon(0));
        assert!(!policy.should_abandon(3));
        assert!(policy.should_abandon(4));
    }

    #[test]
    fn test_max_retries_clamped() {
        let policy = RetryPolicy {
            max_retries: 1_000,
            ..Default::default()
        };
        assert_eq!(policy.effective_max_retries(), 10);
        assert!(policy.should_abandon(11));
        assert!(!policy.should_abandon(10));
    }
}
