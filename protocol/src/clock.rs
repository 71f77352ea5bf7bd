//! Wall-clock abstraction.
//!
//! The withdrawal delay and oracle staleness are both evaluated against
//! "now" at read time. Production code uses [`SystemClock`]; tests and
//! scenario replay drive a [`ManualClock`] forward explicitly.

use chrono::{DateTime, Duration, TimeZone, Utc};
use parking_lot::RwLock;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClockError {
    /// The target time is outside the representable range.
    #[error("cannot advance the clock by {0} seconds")]
    OutOfRange(u64),
}

/// Source of the current time.
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// Reads the operating system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: RwLock<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: RwLock::new(start),
        }
    }

    /// Starts at the given unix timestamp (seconds).
    pub fn at_unix(secs: i64) -> Self {
        let start = Utc.timestamp_opt(secs, 0).single().unwrap_or_default();
        Self::new(start)
    }

    /// Moves the clock forward by `secs` and returns the new time. The
    /// clock is left untouched when the result would not be representable.
    pub fn advance_secs(&self, secs: u64) -> Result<DateTime<Utc>, ClockError> {
        let by = i64::try_from(secs)
            .ok()
            .and_then(Duration::try_seconds)
            .ok_or(ClockError::OutOfRange(secs))?;
        let mut now = self.now.write();
        *now = now.checked_add_signed(by).ok_or(ClockError::OutOfRange(secs))?;
        Ok(*now)
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.write() = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read()
    }
}
