//! Clock port: the single indirection for "now".
//!
//! Claim stamps, lease expiries and scheduling deadlines are all instants
//! derived from one `now()` reading, so every component takes its time from
//! this trait (or a per-call override threaded down through `poll`,
//! `execute` and the sweeper) and never reads the wall clock directly.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

/// Provides the current instant.
///
/// `Send + Sync` so one clock can back every worker on a scheduler.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time; what a scheduler runs on outside of tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Settable clock for deterministic tests.
///
/// Starts frozen at the given instant; `advance` and `set` move it. Clones
/// share one timeline, so a test can hold the clock it handed to a
/// scheduler and walk a task through claim, lease expiry and retry without
/// sleeping.
#[derive(Debug, Clone)]
pub struct FixedClock {
    time: Arc<Mutex<DateTime<Utc>>>,
}

impl FixedClock {
    pub fn new(time: DateTime<Utc>) -> Self {
        Self {
            time: Arc::new(Mutex::new(time)),
        }
    }

    /// Moves the clock forward by `span`.
    pub fn advance(&self, span: Duration) {
        let mut time = self.time.lock();
        *time = *time + span;
    }

    /// Jumps the clock to an absolute instant.
    pub fn set(&self, to: DateTime<Utc>) {
        *self.time.lock() = to;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.time.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 6, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn system_clock_moves_with_the_wall() {
        let clock = SystemClock;
        let first = clock.now();
        let second = clock.now();
        assert!(second >= first);
    }

    #[test]
    fn fixed_clock_is_frozen_until_moved() {
        let clock = FixedClock::new(t0());
        assert_eq!(clock.now(), t0());
        assert_eq!(clock.now(), t0());

        clock.advance(Duration::milliseconds(600_000));
        assert_eq!(clock.now(), t0() + Duration::milliseconds(600_000));

        clock.set(t0());
        assert_eq!(clock.now(), t0());
    }

    #[test]
    fn clones_share_one_timeline() {
        let held = FixedClock::new(t0());
        let handed_out: Arc<dyn Clock> = Arc::new(held.clone());

        held.advance(Duration::seconds(90));
        assert_eq!(handed_out.now(), t0() + Duration::seconds(90));
    }
}
