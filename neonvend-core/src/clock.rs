//! Injected time source.
//!
//! Lease expiry, session TTLs and replay windows all read time through a
//! [`Clock`] so tests can move time forward deterministically.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use thiserror::Error;

/// Source of the current UTC time.
pub trait Clock: Send + Sync + fmt::Debug + 'static {
    /// Current UTC datetime
    fn now(&self) -> DateTime<Utc>;
}

/// An expiry instant past the end of the representable calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("expiry {ttl} after {start} is out of range")]
pub struct ExpiryOverflow {
    /// Instant the expiry was computed from.
    pub start: DateTime<Utc>,
    /// Span that did not fit.
    pub ttl: Duration,
}

/// `start + ttl`, or [`ExpiryOverflow`] when the sum does not fit.
pub fn expiry_after(start: DateTime<Utc>, ttl: Duration) -> Result<DateTime<Utc>, ExpiryOverflow> {
    start
        .checked_add_signed(ttl)
        .ok_or(ExpiryOverflow { start, ttl })
}

/// Wall-clock time.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock for tests and simulations.
///
/// Clones share the same instant, so a handle kept by a test moves time for
/// every component that was given a clone.
#[derive(Clone, Debug)]
pub struct ManualClock {
    current: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    /// Start at the given instant.
    pub fn new_at(start: DateTime<Utc>) -> Self {
        Self {
            current: Arc::new(Mutex::new(start)),
        }
    }

    /// Start at the current wall-clock time.
    pub fn starting_now() -> Self {
        Self::new_at(Utc::now())
    }

    /// Move time forward. Negative durations are ignored; the clock never
    /// goes backwards.
    pub fn advance(&self, by: Duration) {
        if by <= Duration::zero() {
            return;
        }
        let mut current = self.current.lock();
        *current += by;
    }

    /// Jump to an absolute instant if it lies in the future.
    pub fn set(&self, to: DateTime<Utc>) {
        let mut current = self.current.lock();
        if to > *current {
            *current = to;
        }
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::starting_now()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.current.lock()
    }
}
