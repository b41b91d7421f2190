//! Reconnection delay policy.

use std::time::Duration;

/// Exponential backoff with a hard cap: `min(base * 2^(attempt-1), max)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    base: Duration,
    max: Duration,
}

impl BackoffPolicy {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    /// Delay before the retry numbered `attempt` (1-based).
    ///
    /// Attempt 0 is treated as the first attempt. The multiplication
    /// saturates, so very large attempt numbers settle on `max`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        self.base.saturating_mul(1u32 << exp).min(self.max)
    }
}
