//! Capped exponential backoff.

use std::time::Duration;

use keel_core::RecoveryConfig;

/// Delay schedule for retries: `min(base * 2^(n-1), cap)` before attempt `n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub cap: Duration,
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self { base, cap }
    }

    pub fn from_config(config: &RecoveryConfig) -> Self {
        Self::new(config.base_delay, config.max_delay)
    }

    /// Delay before attempt `attempt` (1-indexed). Attempt 0 has no delay.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        2u32.checked_pow(attempt - 1)
            .and_then(|factor| self.base.checked_mul(factor))
            .map_or(self.cap, |delay| delay.min(self.cap))
    }

    /// Delays for attempts `1..=attempts`.
    pub fn schedule(&self, attempts: u32) -> impl Iterator<Item = Duration> + '_ {
        (1..=attempts).map(move |attempt| self.delay_for_attempt(attempt))
    }
}
