use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;

/// Source of transaction creation timestamps.
///
/// Values must never decrease. They are only compared against each other to
/// decide which transaction of a deadlock cycle is the youngest.
pub trait TimeSource: Send + Sync {
    fn now(&self) -> i64;
}

/// Wall-clock milliseconds since the Unix epoch.
///
/// Clamped so a backwards system clock step never yields a smaller value
/// than one already handed out.
#[derive(Debug, Default)]
pub struct SystemClock {
    last: AtomicI64,
}

impl SystemClock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TimeSource for SystemClock {
    fn now(&self) -> i64 {
        let wall = Utc::now().timestamp_millis();
        let prev = self.last.fetch_max(wall, Ordering::AcqRel);
        prev.max(wall)
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start: i64) -> Self {
        Self {
            now: AtomicI64::new(start),
        }
    }

    /// Move the clock to `at`. Ignored if `at` lies in the past.
    pub fn set(&self, at: i64) {
        self.now.fetch_max(at, Ordering::AcqRel);
    }

    pub fn advance(&self, by: i64) -> i64 {
        self.now.fetch_add(by.max(0), Ordering::AcqRel) + by.max(0)
    }
}

impl TimeSource for ManualClock {
    fn now(&self) -> i64 {
        self.now.load(Ordering::Acquire)
    }
}
