//! Time source abstraction.
//!
//! Every staleness and retention comparison goes through a [`Clock`] so
//! tests can drive the executor with a [`ManualClock`].

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

/// Source of the current wall-clock time.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Returns the current time in UTC.
    fn now(&self) -> DateTime<Utc>;
}

/// Returns `now - window`, saturating at the earliest representable time.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use chrono::{DateTime, TimeZone, Utc};
/// use edge_executor::clock::cutoff;
///
/// let now = Utc.with_ymd_and_hms(2023, 1, 1, 1, 0, 0).unwrap();
/// assert_eq!(
///     cutoff(now, Duration::from_secs(60)),
///     Utc.with_ymd_and_hms(2023, 1, 1, 0, 59, 0).unwrap()
/// );
/// assert_eq!(cutoff(now, Duration::MAX), DateTime::<Utc>::MIN_UTC);
/// ```
pub fn cutoff(now: DateTime<Utc>, window: std::time::Duration) -> DateTime<Utc> {
    Duration::from_std(window)
        .ok()
        .and_then(|window| now.checked_sub_signed(window))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Production clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to. Clones share the same time.
///
/// # Examples
///
/// ```
/// use chrono::{Duration, TimeZone, Utc};
/// use edge_executor::clock::{Clock, ManualClock};
///
/// let start = Utc.with_ymd_and_hms(2023, 1, 1, 1, 0, 0).unwrap();
/// let clock = ManualClock::new(start);
/// clock.advance(Duration::seconds(30));
/// assert_eq!(clock.now(), start + Duration::seconds(30));
/// ```
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    /// Creates a clock frozen at `now`.
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(now)),
        }
    }

    /// Moves the clock forward by `by`.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }

    /// Jumps the clock to `to`.
    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock() = to;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}
