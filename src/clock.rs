//! Injectable wall clock.
//!
//! Every time-dependent decision in the crate (token expiry, window planning,
//! poll timestamps) reads the clock through [`Clock`] so tests can pin time.

use chrono::{Duration, Local, NaiveDateTime};
use std::sync::Mutex;

/// Timezone-naive wall-clock time in the data provider's local market time.
pub type Timestamp = NaiveDateTime;

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Reads the local system clock.
///
/// Local time repeats an hour at the autumn DST fallback. Through the second
/// pass the clock sits behind the watermark, so every cycle is a NO_OP until
/// it catches up; rows published only for that repeated hour are never
/// requested.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Local::now().naive_local()
    }
}

/// Manually driven clock for deterministic tests and dry runs.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Timestamp>,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, now: Timestamp) {
        *self.now.lock().unwrap() = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.now.lock().unwrap()
    }
}
