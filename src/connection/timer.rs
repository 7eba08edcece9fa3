//! Cancellable timer handles for the connection event loop.
//!
//! Both handles are polled from a `tokio::select!` loop. A disarmed handle
//! is pending forever, so its branch simply never fires. Cancelling is
//! idempotent.

// ============================================================================
// Imports
// ============================================================================

use std::future::pending;
use std::pin::Pin;
use std::time::Duration;

use tokio::time::{Instant, Interval, MissedTickBehavior, Sleep, interval_at, sleep};

// ============================================================================
// Deadline
// ============================================================================

/// One-shot timer.
#[derive(Debug, Default)]
pub(crate) struct Deadline {
    sleep: Option<Pin<Box<Sleep>>>,
}

impl Deadline {
    /// Creates a disarmed deadline.
    pub(crate) const fn new() -> Self {
        Self { sleep: None }
    }

    /// Arms the deadline to fire `after` from now, replacing any pending one.
    pub(crate) fn arm(&mut self, after: Duration) {
        self.sleep = Some(Box::pin(sleep(after)));
    }

    /// Disarms the deadline.
    pub(crate) fn cancel(&mut self) {
        self.sleep = None;
    }

    /// Returns `true` while armed and not yet fired.
    #[cfg(test)]
    pub(crate) fn is_armed(&self) -> bool {
        self.sleep.is_some()
    }

    /// Completes once when the deadline passes, then disarms itself.
    ///
    /// Cancel safe: dropping the future leaves the deadline armed.
    pub(crate) async fn expired(&mut self) {
        match self.sleep.as_mut() {
            Some(sleep) => {
                sleep.as_mut().await;
                self.sleep = None;
            }
            None => pending().await,
        }
    }
}

// ============================================================================
// Ticker
// ============================================================================

/// Periodic timer. The first tick fires one full period after arming.
#[derive(Debug, Default)]
pub(crate) struct Ticker {
    interval: Option<Interval>,
}

impl Ticker {
    /// Creates a disarmed ticker.
    pub(crate) const fn new() -> Self {
        Self { interval: None }
    }

    /// Starts ticking every `period`, replacing any running schedule.
    pub(crate) fn arm(&mut self, period: Duration) {
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.interval = Some(interval);
    }

    /// Stops ticking.
    pub(crate) fn cancel(&mut self) {
        self.interval = None;
    }

    /// Returns `true` while ticking.
    #[cfg(test)]
    pub(crate) fn is_armed(&self) -> bool {
        self.interval.is_some()
    }

    /// Completes on the next tick.
    pub(crate) async fn tick(&mut self) {
        match self.interval.as_mut() {
            Some(interval) => {
                interval.tick().await;
            }
            None => pending().await,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
