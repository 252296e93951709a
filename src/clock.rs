//! Injectable time source
//!
//! The database never reads the system clock directly. A `Clock` is
//! injected at open time so embedders can supply their own source and
//! tests can drive time deterministically with `ManualClock`.

use crate::types::Timestamp;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Source of "current time in nanoseconds"
pub trait Clock: Send + Sync {
    /// Current time in nanoseconds since the Unix epoch
    fn now(&self) -> Timestamp;
}

/// Wall clock backed by `SystemTime`
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(elapsed) => elapsed.as_nanos() as Timestamp,
            Err(_) => 0,
        }
    }
}

/// Settable clock for tests and embedders that own their time source
#[derive(Debug)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    /// Create a clock pinned at `now`
    pub fn new(now: Timestamp) -> Self {
        Self {
            now: AtomicI64::new(now),
        }
    }

    /// Pin the clock to a new time
    pub fn set(&self, now: Timestamp) {
        self.now.store(now, Ordering::SeqCst);
    }

    /// Move the clock forward by `delta` nanoseconds
    pub fn advance(&self, delta: i64) {
        self.now.fetch_add(delta, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        self.now.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(1000);
        assert_eq!(clock.now(), 1000);

        clock.set(5000);
        assert_eq!(clock.now(), 5000);

        clock.advance(500);
        assert_eq!(clock.now(), 5500);
    }

    #[test]
    fn test_system_clock_moves() {
        let clock = SystemClock;
        let a = clock.now();
        assert!(a > 0);
        assert!(clock.now() >= a);
    }
}
