//! Status poll scheduler.
//!
//! The poller owns at most one interval. Starting a running poller is a
//! no-op, so a restart can never leave two timers behind.

// ============================================================================
// Imports
// ============================================================================

use std::future;
use std::time::Duration;

use tokio::time::{Interval, MissedTickBehavior, interval};

// ============================================================================
// StatusPoller
// ============================================================================

/// Periodic status request timer.
#[derive(Debug)]
pub struct StatusPoller {
    period: Duration,
    interval: Option<Interval>,
}

impl StatusPoller {
    /// Creates a stopped poller.
    ///
    /// # Panics
    ///
    /// [`start`](Self::start) panics if `period` is zero.
    #[inline]
    #[must_use]
    pub const fn new(period: Duration) -> Self {
        Self {
            period,
            interval: None,
        }
    }

    /// Starts polling. The first tick is immediate.
    ///
    /// Returns `false` if the poller was already running.
    pub fn start(&mut self) -> bool {
        if self.interval.is_some() {
            return false;
        }

        let mut ticks = interval(self.period);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.interval = Some(ticks);
        true
    }

    /// Stops polling. Returns `false` if it was not running.
    pub fn stop(&mut self) -> bool {
        self.interval.take().is_some()
    }

    /// Stops and starts again, issuing an immediate tick.
    pub fn restart(&mut self) {
        self.stop();
        self.start();
    }

    /// Returns `true` while running.
    #[inline]
    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.interval.is_some()
    }

    /// Completes on the next tick; never completes while stopped.
    pub async fn tick(&mut self) {
        match self.interval.as_mut() {
            Some(ticks) => {
                ticks.tick().await;
            }
            None => future::pending().await,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
