//! Backoff schedule for destination deletion
//!
//! Deleting a destination right after its webhook binding is released can
//! race the control plane, which answers 409 "destination is in use" until
//! the release propagates. That conflict is the only retried failure.

use std::time::Duration;

/// Capped exponential backoff; the number of attempts is bounded by the
/// caller's deadline rather than a retry count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteBackoff {
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl DeleteBackoff {
    pub const DEFAULT: Self = Self {
        initial_delay: Duration::from_millis(250),
        max_delay: Duration::from_secs(5),
    };

    /// Delay after the given failed attempt (0-indexed): doubles, then holds at the cap
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(31)).unwrap_or(u32::MAX);
        self.initial_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    /// Unbounded, non-decreasing sequence of delays
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        (0u32..).map(|attempt| self.delay_for_attempt(attempt))
    }
}

impl Default for DeleteBackoff {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// 409 bodies mentioning "destination is in use" (any case) are retryable
pub fn is_destination_in_use_conflict(body: &str) -> bool {
    let lower = body.trim().to_lowercase();
    !lower.is_empty() && lower.contains("destination is in use")
}
