//! Reconnect policy

use std::time::Duration;

/// When to retry after a failed connect attempt.
///
/// Fixed interval, no growth. Unbounded unless `max_attempts` is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    interval: Duration,
    max_attempts: Option<u32>,
}

impl ReconnectPolicy {
    /// Retry forever every `interval`
    pub fn fixed(interval: Duration) -> Self {
        Self {
            interval,
            max_attempts: None,
        }
    }

    /// Give up after `attempts` consecutive failures
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Pause between attempts
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Failure cutoff, if any
    pub fn max_attempts(&self) -> Option<u32> {
        self.max_attempts
    }

    /// Delay before the next attempt after `failures` consecutive
    /// failures, or `None` once the policy is exhausted
    pub fn next_delay(&self, failures: u32) -> Option<Duration> {
        match self.max_attempts {
            Some(max) if failures >= max => None,
            _ => Some(self.interval),
        }
    }
}
