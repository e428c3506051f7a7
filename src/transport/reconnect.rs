//! Exponential backoff for BLE reconnects.
//!
//! Attempt `n` (zero-based) waits `min(base * 2^n, max)`. After
//! `max_attempts` scheduled attempts the policy gives up until it is reset
//! by a successful connection or an explicit disconnect.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Delay before the first reconnect attempt.
pub const RECONNECT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Ceiling on the delay between attempts.
pub const RECONNECT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Attempts before giving up.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;

// ============================================================================
// ReconnectOptions
// ============================================================================

/// Backoff parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectOptions {
    /// Delay before the first attempt.
    pub base_delay: Duration,
    /// Ceiling on any single delay.
    pub max_delay: Duration,
    /// Attempts before giving up. Zero disables reconnecting.
    pub max_attempts: u32,
}

impl Default for ReconnectOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl ReconnectOptions {
    /// Creates the default backoff: 1s doubling to 30s, five attempts.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            base_delay: RECONNECT_BASE_DELAY,
            max_delay: RECONNECT_MAX_DELAY,
            max_attempts: MAX_RECONNECT_ATTEMPTS,
        }
    }

    /// Sets the first delay.
    #[inline]
    #[must_use]
    pub const fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Sets the delay ceiling.
    #[inline]
    #[must_use]
    pub const fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the attempt limit.
    #[inline]
    #[must_use]
    pub const fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Validates the backoff parameters.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a delay is zero or the base exceeds the
    /// ceiling.
    pub fn validate(&self) -> Result<()> {
        if self.base_delay.is_zero() {
            return Err(Error::config("reconnect base delay must be non-zero"));
        }
        if self.base_delay > self.max_delay {
            return Err(Error::config(format!(
                "reconnect base delay {:?} exceeds max delay {:?}",
                self.base_delay, self.max_delay
            )));
        }
        Ok(())
    }
}

// ============================================================================
// ReconnectPolicy
// ============================================================================

/// Backoff state for one adapter.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    options: ReconnectOptions,
    attempts: u32,
}

impl ReconnectPolicy {
    /// Creates a policy with no attempts made.
    #[inline]
    #[must_use]
    pub const fn new(options: ReconnectOptions) -> Self {
        Self {
            options,
            attempts: 0,
        }
    }

    /// Returns the number of attempts scheduled since the last reset.
    #[inline]
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Returns `true` while attempts remain.
    #[inline]
    #[must_use]
    pub const fn can_retry(&self) -> bool {
        self.attempts < self.options.max_attempts
    }

    /// Returns the delay the next attempt would wait.
    #[must_use]
    pub fn next_delay(&self) -> Duration {
        let factor = 1u32.checked_shl(self.attempts).unwrap_or(u32::MAX);
        self.options
            .base_delay
            .checked_mul(factor)
            .map_or(self.options.max_delay, |delay| delay.min(self.options.max_delay))
    }

    /// Schedules the next attempt.
    ///
    /// Returns its delay, or `None` once the limit is reached.
    pub fn schedule(&mut self) -> Option<Duration> {
        if !self.can_retry() {
            return None;
        }
        let delay = self.next_delay();
        self.attempts += 1;
        Some(delay)
    }

    /// Clears the attempt count.
    #[inline]
    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    #[test]
    fn test_default_schedule() {
        let mut policy = ReconnectPolicy::new(ReconnectOptions::new());
        let delays: Vec<u64> = std::iter::from_fn(|| policy.schedule())
            .map(|d| d.as_secs())
            .collect();

        assert_eq!(delays, vec![1, 2, 4, 8, 16]);
        assert_eq!(policy.attempts(), 5);
        assert!(!policy.can_retry());
    }

    #[test]
    fn test_delay_is_capped() {
        let options = ReconnectOptions::new().with_max_attempts(10);
        let mut policy = ReconnectPolicy::new(options);
        let last = std::iter::from_fn(|| policy.schedule()).last();
        assert_eq!(last, Some(RECONNECT_MAX_DELAY));
    }

    #[test]
    fn test_reset() {
        let mut policy = ReconnectPolicy::new(ReconnectOptions::new());
        policy.schedule();
        policy.schedule();
        policy.reset();

        assert_eq!(policy.attempts(), 0);
        assert_eq!(policy.next_delay(), RECONNECT_BASE_DELAY);
    }

    #[test]
    fn test_zero_attempts_never_retries() {
        let mut policy = ReconnectPolicy::new(ReconnectOptions::new().with_max_attempts(0));
        assert_eq!(policy.schedule(), None);
    }

    #[test]
    fn test_validate() {
        assert!(ReconnectOptions::new().validate().is_ok());
        assert!(
            ReconnectOptions::new()
                .with_base_delay(Duration::ZERO)
                .validate()
                .is_err()
        );
        assert!(
            ReconnectOptions::new()
                .with_base_delay(Duration::from_secs(60))
                .validate()
                .is_err()
        );
    }

    proptest! {
        #[test]
        fn prop_attempts_bounded_and_delays_monotonic(
            base_ms in 1u64..5_000,
            extra_ms in 0u64..60_000,
            max_attempts in 0u32..64,
        ) {
            let options = ReconnectOptions::new()
                .with_base_delay(Duration::from_millis(base_ms))
                .with_max_delay(Duration::from_millis(base_ms + extra_ms))
                .with_max_attempts(max_attempts);
            let mut policy = ReconnectPolicy::new(options);

            let mut previous = Duration::ZERO;
            while let Some(delay) = policy.schedule() {
                prop_assert!(delay >= previous);
                prop_assert!(delay <= options.max_delay);
                previous = delay;
            }
            prop_assert_eq!(policy.attempts(), max_attempts);
        }
    }
}
