//! Monotonic time source, mockable for deterministic round-closure tests.
//!
//! Grounded on the teacher's use of `std::time::Instant`/`chrono::Utc::now()`
//! sprinkled directly through `perf.rs`/`main.rs`; here it is pulled behind a
//! trait so `RoundScheduler`/`BidEngine` tests can fast-forward past a
//! round's `endTime` without a real sleep (SPEC_FULL.md §8 scenario A-E).

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock: wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Test clock: starts at a fixed instant and only advances when told to.
#[derive(Clone)]
pub struct MockClock {
    millis_since_epoch: Arc<AtomicI64>,
}

impl MockClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            millis_since_epoch: Arc::new(AtomicI64::new(start.timestamp_millis())),
        }
    }

    pub fn advance(&self, duration: chrono::Duration) {
        self.millis_since_epoch
            .fetch_add(duration.num_milliseconds(), Ordering::SeqCst);
    }

    pub fn set(&self, at: DateTime<Utc>) {
        self.millis_since_epoch
            .store(at.timestamp_millis(), Ordering::SeqCst);
    }
}

impl Clock for MockClock {
    fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.millis_since_epoch.load(Ordering::SeqCst))
            .expect("mock clock millis always in range")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_clock_advances_deterministically() {
        let start = Utc::now();
        let clock = MockClock::new(start);
        assert_eq!(clock.now(), start);

        clock.advance(chrono::Duration::minutes(5));
        assert_eq!(clock.now(), start + chrono::Duration::minutes(5));
    }
}
