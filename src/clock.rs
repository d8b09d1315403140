//! Wall-clock time source.
//!
//! Token buckets are shared between workers through the store, so refill
//! arithmetic runs on wall-clock epoch time rather than `Instant`. The
//! [`Clock`] trait lets tests drive that time explicitly with [`MockClock`].

use std::fmt::Debug;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;

/// Source of wall-clock time.
pub trait Clock: Send + Sync + Debug {
    /// Current time as fractional seconds since the Unix epoch.
    fn now_secs(&self) -> f64;

    /// Current time as whole milliseconds since the Unix epoch.
    fn now_millis(&self) -> i64 {
        (self.now_secs() * 1000.0).floor() as i64
    }
}

/// System clock backed by `chrono::Utc::now()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    pub fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    fn now_secs(&self) -> f64 {
        let now = Utc::now();
        now.timestamp() as f64 + f64::from(now.timestamp_subsec_micros()) / 1_000_000.0
    }

    fn now_millis(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// Manually driven clock for tests.
///
/// Clones share the same underlying time, so a test can hand one clone to a
/// limiter and advance another.
///
/// ```
/// use mailer_guard::clock::{Clock, MockClock};
/// use std::time::Duration;
///
/// let clock = MockClock::new(1_700_000_000.0);
/// clock.advance(Duration::from_millis(1500));
/// assert_eq!(clock.now_secs(), 1_700_000_001.5);
/// ```
#[derive(Debug, Clone)]
pub struct MockClock {
    current_secs: Arc<Mutex<f64>>,
}

impl MockClock {
    /// Create a clock frozen at `epoch_secs`.
    pub fn new(epoch_secs: f64) -> Self {
        Self {
            current_secs: Arc::new(Mutex::new(epoch_secs)),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, duration: Duration) {
        let mut now = self
            .current_secs
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *now += duration.as_secs_f64();
    }

    /// Jump to an absolute epoch time (may move backwards).
    pub fn set(&self, epoch_secs: f64) {
        let mut now = self
            .current_secs
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *now = epoch_secs;
    }
}

impl Clock for MockClock {
    fn now_secs(&self) -> f64 {
        *self
            .current_secs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
