//! Injectable wall-clock so backoff and health-check timing are deterministic in tests.
//!
//! Grounded on the teacher's preference for explicit, swappable collaborators
//! (`Docker`, `Logger`) over ambient globals; spec.md §9 calls this out directly
//! ("Do not rely on wall-clock subtraction for delays").

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// A monotonic-enough wall-clock instant used as a version / deadline.
pub type Timestamp = DateTime<Utc>;

pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

#[derive(Clone, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Utc::now()
    }
}

/// Deterministic clock for tests: starts at the Unix epoch and only advances
/// when told to.
#[derive(Clone)]
pub struct TestClock {
    millis: Arc<AtomicI64>,
}

impl TestClock {
    pub fn new() -> Self {
        TestClock {
            millis: Arc::new(AtomicI64::new(0)),
        }
    }

    pub fn advance(&self, duration: chrono::Duration) {
        self.millis.fetch_add(duration.num_milliseconds(), Ordering::SeqCst);
    }

    pub fn set(&self, timestamp: Timestamp) {
        self.millis.store(timestamp.timestamp_millis(), Ordering::SeqCst);
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TestClock {
    fn now(&self) -> Timestamp {
        DateTime::from_timestamp_millis(self.millis.load(Ordering::SeqCst)).expect("valid test timestamp")
    }
}
