//! Observed task instance (spec.md §3 "Task") and its lifecycle.
//!
//! Grounded on the teacher's `Task` trait (`engine_task/mod.rs`: `id`,
//! `created_at`, `run`, `cancel`) for the "identity + lifecycle" shape,
//! generalized to the Mesos task-status state machine spec.md names.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::clock::Timestamp;
use crate::id::PathId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Staging,
    Running,
    Failed,
    Finished,
    Killed,
    Lost,
    Error,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Failed | TaskStatus::Finished | TaskStatus::Killed | TaskStatus::Lost | TaskStatus::Error
        )
    }

    /// §4.2: which terminal statuses count toward launch-backoff escalation.
    /// `TASK_KILLED` only counts if the task was unhealthy at the time.
    pub fn counts_as_failure(&self, was_healthy: bool) -> bool {
        match self {
            TaskStatus::Failed | TaskStatus::Error => true,
            TaskStatus::Killed => !was_healthy,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub app_id: PathId,
    pub app_version: Timestamp,
    pub host: String,
    pub host_ports: Vec<u16>,
    /// Agent attributes of the host this task landed on, captured from the
    /// offer at launch time — used to re-evaluate placement constraints
    /// (§4.3) against already-placed tasks.
    pub host_attributes: BTreeMap<String, String>,
    pub staged_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub last_known_status: TaskStatus,
    /// Last known health check result per configured checker, `None` if the
    /// app has no health checks or none have reported yet.
    pub health_results: Option<Vec<bool>>,
}

impl Task {
    pub fn new_staging(id: impl Into<String>, app_id: PathId, app_version: Timestamp, host: impl Into<String>, host_ports: Vec<u16>, now: Timestamp) -> Self {
        Task {
            id: id.into(),
            app_id,
            app_version,
            host: host.into(),
            host_ports,
            host_attributes: BTreeMap::new(),
            staged_at: now,
            started_at: None,
            last_known_status: TaskStatus::Staging,
            health_results: None,
        }
    }

    pub fn with_attributes(mut self, attributes: BTreeMap<String, String>) -> Self {
        self.host_attributes = attributes;
        self
    }

    /// Is this task considered "alive" for counting toward an app's desired instances?
    pub fn is_alive(&self) -> bool {
        !self.last_known_status.is_terminal()
    }

    /// An app with no health checks treats `RUNNING` as healthy (spec.md §4.7).
    pub fn is_healthy_assuming_no_health_checks(&self) -> bool {
        self.last_known_status == TaskStatus::Running
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn ts() -> Timestamp {
        Utc.timestamp_opt(0, 0).unwrap()
    }

    #[test]
    fn test_is_terminal() {
        assert!(!TaskStatus::Staging.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Lost.is_terminal());
    }

    #[test]
    fn test_counts_as_failure() {
        assert!(TaskStatus::Failed.counts_as_failure(true));
        assert!(TaskStatus::Error.counts_as_failure(false));
        assert!(TaskStatus::Killed.counts_as_failure(false));
        assert!(!TaskStatus::Killed.counts_as_failure(true));
        assert!(!TaskStatus::Finished.counts_as_failure(false));
    }

    #[test]
    fn test_new_staging_task_is_alive() {
        let task = Task::new_staging("t1", PathId::parse_absolute("/app1").unwrap(), ts(), "host1", vec![], ts());
        assert!(task.is_alive());
        assert_eq!(task.last_known_status, TaskStatus::Staging);
    }
}
