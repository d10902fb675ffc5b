//! Reconnect backoff policy
//!
//! Bounded exponential backoff: the delay before reconnect attempt `n` is
//! `min(max_delay, initial_delay * 2^n)`.

use std::time::Duration;

/// Default delay before the first reconnect
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_millis(500);

/// Default upper bound on the reconnect delay
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(5000);

/// Exponential backoff with a cap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    /// Delay for attempt 0
    pub initial_delay: Duration,
    /// Upper bound for any attempt
    pub max_delay: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial_delay: DEFAULT_INITIAL_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl Backoff {
    pub fn new(initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            initial_delay,
            max_delay,
        }
    }

    /// Delay before reconnect attempt `attempt`
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// The first `count` delays of the schedule
    pub fn schedule(&self, count: u32) -> Vec<Duration> {
        (0..count).map(|attempt| self.delay(attempt)).collect()
    }
}
