//! Authoritative in-memory task index, mirrored to the key-value store
//! (spec.md §4.4). Backed by per-app serialization, matching §5's "The task
//! tracker uses per-app serialization".
//!
//! Grounded on the teacher's `ApplicationService`/`Service` repository
//! pattern (`environment/models/mod.rs`) for "a typed collection keyed by
//! id with narrow mutation methods", generalized here to per-app sharded
//! locks since nothing in the teacher needed that granularity.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crate::clock::{Clock, Timestamp};
use crate::errors::CoreError;
use crate::id::PathId;
use crate::task::{Task, TaskStatus};

type AppTasks = BTreeMap<String, Task>;

#[derive(Default)]
pub struct TaskTracker {
    apps: Mutex<BTreeMap<PathId, Arc<Mutex<AppTasks>>>>,
}

impl TaskTracker {
    pub fn new() -> Self {
        TaskTracker::default()
    }

    fn shard(&self, app_id: &PathId) -> Arc<Mutex<AppTasks>> {
        let mut apps = self.apps.lock().unwrap();
        apps.entry(app_id.clone()).or_insert_with(|| Arc::new(Mutex::new(BTreeMap::new()))).clone()
    }

    pub fn created(&self, app_id: &PathId, task: Task) {
        let shard = self.shard(app_id);
        let mut tasks = shard.lock().unwrap();
        tasks.insert(task.id.clone(), task);
    }

    /// Records `startedAt` and promotes `STAGING` -> `RUNNING` on the first
    /// running status (spec.md §3 Task lifecycle).
    pub fn running(&self, app_id: &PathId, task_id: &str, clock: &dyn Clock) -> Option<Task> {
        let shard = self.shard(app_id);
        let mut tasks = shard.lock().unwrap();
        let task = tasks.get_mut(task_id)?;
        if task.last_known_status == TaskStatus::Staging {
            task.started_at = Some(clock.now());
        }
        task.last_known_status = TaskStatus::Running;
        Some(task.clone())
    }

    /// Non-terminal status mutation (health bits, staying RUNNING, etc).
    pub fn status_update(&self, app_id: &PathId, task_id: &str, status: TaskStatus, healthy: Option<bool>) -> Option<Task> {
        let shard = self.shard(app_id);
        let mut tasks = shard.lock().unwrap();
        let task = tasks.get_mut(task_id)?;
        task.last_known_status = status;
        if let Some(healthy) = healthy {
            task.health_results = Some(vec![healthy]);
        }
        Some(task.clone())
    }

    /// Removes and returns the task on a terminal status.
    pub fn terminated(&self, app_id: &PathId, task_id: &str, status: TaskStatus) -> Option<Task> {
        debug_assert!(status.is_terminal());
        let shard = self.shard(app_id);
        let mut tasks = shard.lock().unwrap();
        let mut task = tasks.remove(task_id)?;
        task.last_known_status = status;
        Some(task)
    }

    /// Tasks still `STAGING` past `taskLaunchTimeout` (fed to the scheduler
    /// to be killed, spec.md §4.4).
    pub fn check_staged_tasks(&self, timeout: std::time::Duration, now: Timestamp) -> Vec<Task> {
        let apps = self.apps.lock().unwrap();
        let mut stale = Vec::new();
        for shard in apps.values() {
            let tasks = shard.lock().unwrap();
            for task in tasks.values() {
                if task.last_known_status == TaskStatus::Staging {
                    let age = now.signed_duration_since(task.staged_at);
                    if age.to_std().map(|d| d > timeout).unwrap_or(false) {
                        stale.push(task.clone());
                    }
                }
            }
        }
        stale
    }

    pub fn get(&self, app_id: &PathId) -> Vec<Task> {
        let shard = self.shard(app_id);
        let result = shard.lock().unwrap().values().cloned().collect();
        result
    }

    pub fn contains(&self, app_id: &PathId, task_id: &str) -> bool {
        let shard = self.shard(app_id);
        let result = shard.lock().unwrap().contains_key(task_id);
        result
    }

    pub fn get_version(&self, app_id: &PathId, task_id: &str) -> Result<Timestamp, CoreError> {
        let shard = self.shard(app_id);
        let tasks = shard.lock().unwrap();
        tasks
            .get(task_id)
            .map(|t| t.app_version)
            .ok_or_else(|| CoreError::UnknownApp(app_id.clone()))
    }

    /// Count of currently-alive (non-terminal) tasks for an app.
    pub fn alive_count(&self, app_id: &PathId) -> usize {
        self.get(app_id).iter().filter(|t| t.is_alive()).count()
    }

    /// Every tracked task across every app, for cluster-wide reconciliation
    /// (spec.md §4.4 "reconcileTasks considers every currently tracked
    /// task, not just one app's").
    pub fn all_tasks(&self) -> Vec<Task> {
        let apps = self.apps.lock().unwrap();
        apps.values().flat_map(|shard| shard.lock().unwrap().values().cloned().collect::<Vec<_>>()).collect()
    }

    /// Removes every tracked task for an app, returning what was removed
    /// (spec.md §4.7 "Stop: kill all tracked tasks").
    pub fn drain(&self, app_id: &PathId) -> Vec<Task> {
        let shard = self.shard(app_id);
        let mut tasks = shard.lock().unwrap();
        std::mem::take(&mut *tasks).into_values().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TestClock;
    use chrono::{TimeZone, Utc};

    fn ts() -> Timestamp {
        Utc.timestamp_opt(0, 0).unwrap()
    }

    fn app_id() -> PathId {
        PathId::parse_absolute("/app1").unwrap()
    }

    #[test]
    fn test_created_then_running_promotes_status_and_sets_started_at() {
        // setup:
        let tracker = TaskTracker::new();
        let clock = TestClock::new();
        let task = Task::new_staging("t1", app_id(), ts(), "host1", vec![], ts());
        tracker.created(&app_id(), task);

        // execute:
        clock.advance(chrono::Duration::seconds(5));
        let updated = tracker.running(&app_id(), "t1", &clock).unwrap();

        // verify:
        assert_eq!(updated.last_known_status, TaskStatus::Running);
        assert!(updated.started_at.is_some());
    }

    #[test]
    fn test_terminated_removes_task() {
        // setup:
        let tracker = TaskTracker::new();
        let task = Task::new_staging("t1", app_id(), ts(), "host1", vec![], ts());
        tracker.created(&app_id(), task);

        // execute:
        let removed = tracker.terminated(&app_id(), "t1", TaskStatus::Failed);

        // verify:
        assert!(removed.is_some());
        assert!(!tracker.contains(&app_id(), "t1"));
    }

    #[test]
    fn test_check_staged_tasks_returns_only_stale_staging() {
        // setup:
        let tracker = TaskTracker::new();
        let old_task = Task::new_staging("old", app_id(), ts(), "host1", vec![], ts());
        tracker.created(&app_id(), old_task);
        let fresh_task = Task::new_staging("fresh", app_id(), ts(), "host1", vec![], ts() + chrono::Duration::seconds(290));
        tracker.created(&app_id(), fresh_task);

        // execute:
        let now = ts() + chrono::Duration::seconds(300);
        let stale = tracker.check_staged_tasks(std::time::Duration::from_secs(60), now);

        // verify:
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id, "old");
    }

    #[test]
    fn test_get_version_unknown_task() {
        let tracker = TaskTracker::new();
        assert!(tracker.get_version(&app_id(), "missing").is_err());
    }

    #[test]
    fn test_alive_count_excludes_terminal() {
        let tracker = TaskTracker::new();
        tracker.created(&app_id(), Task::new_staging("t1", app_id(), ts(), "h", vec![], ts()));
        tracker.created(&app_id(), Task::new_staging("t2", app_id(), ts(), "h", vec![], ts()));
        tracker.terminated(&app_id(), "t2", TaskStatus::Finished);
        assert_eq!(tracker.alive_count(&app_id()), 1);
    }

    #[test]
    fn test_all_tasks_spans_every_app() {
        // setup:
        let tracker = TaskTracker::new();
        let other_app = PathId::parse_absolute("/app2").unwrap();
        tracker.created(&app_id(), Task::new_staging("t1", app_id(), ts(), "h", vec![], ts()));
        tracker.created(&other_app, Task::new_staging("t2", other_app.clone(), ts(), "h", vec![], ts()));

        // execute + verify:
        let mut ids: Vec<String> = tracker.all_tasks().into_iter().map(|t| t.id).collect();
        ids.sort();
        assert_eq!(ids, vec!["t1".to_string(), "t2".to_string()]);
    }

    #[test]
    fn test_drain_removes_all_tasks_for_app() {
        // setup:
        let tracker = TaskTracker::new();
        tracker.created(&app_id(), Task::new_staging("t1", app_id(), ts(), "h", vec![], ts()));
        tracker.created(&app_id(), Task::new_staging("t2", app_id(), ts(), "h", vec![], ts()));

        // execute:
        let drained = tracker.drain(&app_id());

        // verify:
        assert_eq!(drained.len(), 2);
        assert!(tracker.get(&app_id()).is_empty());
    }
}
