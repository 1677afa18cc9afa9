//! Time sources.

use crate::types::Timestamp;
use std::sync::atomic::{AtomicI64, Ordering};

/// Source of timestamps for new entities and messages.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Wall clock that never repeats or goes backwards.
///
/// Two calls always return strictly increasing values, so messages sent
/// back to back keep their send order after sorting by timestamp.
#[derive(Debug, Default)]
pub struct SystemClock {
    last: AtomicI64,
}

impl SystemClock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        let wall = Timestamp::now().0;
        let mut prev = self.last.load(Ordering::SeqCst);
        loop {
            let next = wall.max(prev + 1);
            match self
                .last
                .compare_exchange(prev, next, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return Timestamp(next),
                Err(actual) => prev = actual,
            }
        }
    }
}

/// Manually driven clock for tests and replays.
///
/// Each call to `now` returns the current value and then advances by
/// `step` milliseconds.
#[derive(Debug)]
pub struct ManualClock {
    current: AtomicI64,
    step: i64,
}

impl ManualClock {
    pub fn new(start: i64, step: i64) -> Self {
        Self {
            current: AtomicI64::new(start),
            step,
        }
    }

    /// Jump to an absolute time.
    pub fn set(&self, millis: i64) {
        self.current.store(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp(self.current.fetch_add(self.step, Ordering::SeqCst))
    }
}
