//! Injectable time source.
//!
//! All time-dependent logic takes its notion of "now" from a [`Clock`], so
//! production code uses the system clock while tests drive a [`ManualClock`]
//! through timeouts and history expiry without sleeping.

use chrono::{DateTime, Duration, Utc};
use std::sync::Mutex;

/// A source of the current time.
pub trait Clock: Send + Sync {
    /// Returns the current instant.
    fn now(&self) -> DateTime<Utc>;

    /// Returns the current instant as milliseconds since the epoch.
    fn millis(&self) -> i64 {
        self.now().timestamp_millis()
    }
}

/// The system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A manually advanced clock, for tests.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Creates a manual clock starting at the given instant.
    #[must_use]
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Advances the clock by the given duration.
    ///
    /// # Panics
    ///
    /// Panics if the duration does not fit in a `chrono::Duration`.
    pub fn advance(&self, duration: std::time::Duration) {
        let mut now = self.now.lock().expect("clock lock poisoned");
        *now += Duration::from_std(duration).expect("duration out of range");
    }

    /// Sets the clock to the given instant.
    pub fn set(&self, instant: DateTime<Utc>) {
        *self.now.lock().expect("clock lock poisoned") = instant;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("clock lock poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances() {
        let start = Utc::now();
        let clock = ManualClock::new(start);
        assert_eq!(clock.now(), start);

        clock.advance(std::time::Duration::from_secs(90));
        assert_eq!(clock.now(), start + Duration::seconds(90));
    }

    #[test]
    fn millis_follow_now() {
        let start = Utc::now();
        let clock = ManualClock::new(start);
        assert_eq!(clock.millis(), start.timestamp_millis());
    }
}
