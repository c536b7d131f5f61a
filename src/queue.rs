//! Launch queue and per-app exponential backoff rate limiter (spec.md §4.2).
//!
//! Grounded on the teacher's retry/backoff usage (`Cargo.toml`'s `retry`
//! crate, used around cloud RPCs) generalized into an explicit, clock-
//! injected limiter rather than a blocking retry loop, since here the
//! backoff gates *future* launch attempts rather than retrying a single
//! call.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use crate::clock::{Clock, Timestamp};
use crate::id::PathId;
use crate::model::app::AppDefinition;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Delay {
    until: Timestamp,
    factor: f64,
}

impl Delay {
    fn has_time_left(&self, now: Timestamp) -> bool {
        now < self.until
    }
}

type DelayKey = (PathId, Timestamp);

/// Per-`(appId, version)` exponential backoff, matching spec.md §4.2 exactly:
/// `factor` is capped so that `factor * backoffSeconds` never exceeds
/// `maxLaunchDelaySeconds` (`factor <= max/current`), and `until` advances by
/// `factor * backoffSeconds` each failure.
#[derive(Default)]
pub struct RateLimiter {
    delays: Mutex<HashMap<DelayKey, Delay>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        RateLimiter::default()
    }

    fn key(app: &AppDefinition) -> DelayKey {
        (app.id.clone(), app.version)
    }

    /// Called when a `QueuedTask` is first added for an app with no existing delay.
    pub fn add_delay(&self, app: &AppDefinition, now: Timestamp) {
        let mut delays = self.delays.lock().unwrap();
        delays.entry(Self::key(app)).or_insert(Delay {
            until: now + chrono::Duration::seconds(app.backoff_seconds as i64),
            factor: 1.0,
        });
    }

    /// Called on a terminal failure that counts toward backoff (spec.md §4.2).
    pub fn add_failure(&self, app: &AppDefinition, now: Timestamp) {
        let mut delays = self.delays.lock().unwrap();
        let current = delays.entry(Self::key(app)).or_insert(Delay { until: now, factor: 1.0 });

        let max_factor = if app.backoff_seconds > 0 {
            app.max_launch_delay_seconds as f64 / app.backoff_seconds as f64
        } else {
            1.0
        };
        current.factor = (current.factor * app.backoff_factor).min(max_factor.max(1.0));

        let delay_seconds = (current.factor * app.backoff_seconds as f64).min(app.max_launch_delay_seconds as f64);
        current.until = now + chrono::Duration::milliseconds((delay_seconds * 1000.0) as i64);
    }

    /// Called on first successful transition to `RUNNING`: resets the delay.
    pub fn reset(&self, app_id: &PathId, app_version: Timestamp) {
        let mut delays = self.delays.lock().unwrap();
        delays.remove(&(app_id.clone(), app_version));
    }

    pub fn has_time_left(&self, app_id: &PathId, app_version: Timestamp, now: Timestamp) -> bool {
        let delays = self.delays.lock().unwrap();
        delays.get(&(app_id.clone(), app_version)).map(|d| d.has_time_left(now)).unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueuedTask {
    pub app_id: PathId,
    pub app_version: Timestamp,
    pub launch_by: Timestamp,
}

/// FIFO holding pending launches, paired with the rate limiter.
#[derive(Default)]
pub struct TaskQueue {
    entries: Mutex<VecDeque<QueuedTask>>,
    pub limiter: RateLimiter,
}

impl TaskQueue {
    pub fn new() -> Self {
        TaskQueue::default()
    }

    pub fn add(&self, app: &AppDefinition, clock: &dyn Clock) {
        let now = clock.now();
        self.limiter.add_delay(app, now);
        self.entries.lock().unwrap().push_back(QueuedTask {
            app_id: app.id.clone(),
            app_version: app.version,
            launch_by: now,
        });
    }

    pub fn add_n(&self, app: &AppDefinition, count: u32, clock: &dyn Clock) {
        for _ in 0..count {
            self.add(app, clock);
        }
    }

    pub fn snapshot(&self) -> Vec<QueuedTask> {
        self.entries.lock().unwrap().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes the first entry equal to `entry` (used after the offer
    /// matcher successfully launches it).
    pub fn remove_one(&self, entry: &QueuedTask) {
        let mut entries = self.entries.lock().unwrap();
        if let Some(pos) = entries.iter().position(|e| e == entry) {
            entries.remove(pos);
        }
    }

    /// Drops stale entries whose app version is no longer current
    /// (spec.md §4.2, invoked from the offer handler).
    pub fn retain(&self, mut predicate: impl FnMut(&QueuedTask) -> bool) {
        self.entries.lock().unwrap().retain(|e| predicate(e));
    }
}
