//! Event taxonomy (spec.md §6 "Event taxonomy") and the `EventSink`
//! collaborator that replaces the teacher's `Logger` trait.
//!
//! Grounded on the teacher's `src/events/mod.rs` (`EngineEvent`, `Stage`,
//! `Transmitter`, `EventMessage`) and `src/logger.rs` (`Logger`,
//! `StdIoLogger`). The teacher's Infrastructure/Environment stage split
//! becomes this crate's Scheduler/Deployment/Health split; the
//! safe-message/full-details/env-vars split on `EventMessage` is dropped
//! (this core has no credential-bearing user messages to obfuscate) in
//! favor of a plain message string, noted in DESIGN.md.

use std::fmt;
use uuid::Uuid;

use crate::errors::CoreError;
use crate::id::PathId;

/// One entry per named event in spec.md §6.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    SchedulerRegistered { framework_id: String },
    SchedulerReregistered { framework_id: String },
    SchedulerDisconnected,
    DeploymentInfo { deployment_id: Uuid, message: String },
    DeploymentSuccess { deployment_id: Uuid },
    DeploymentFailed { deployment_id: Uuid, reason: String },
    DeploymentStepSuccess { deployment_id: Uuid, step_index: usize },
    DeploymentStepFailure { deployment_id: Uuid, step_index: usize, reason: String },
    GroupChangeSuccess { group_id: PathId },
    GroupChangeFailed { group_id: PathId, reason: String },
    AddHealthCheckEvent { app_id: PathId },
    RemoveHealthCheckEvent { app_id: PathId },
    FailedHealthCheckEvent { app_id: PathId, task_id: String },
    HealthStatusChangedEvent { app_id: PathId, task_id: String, healthy: bool },
    StatusUpdateEvent { app_id: PathId, task_id: String, status: String },
}

impl Event {
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            Event::DeploymentFailed { .. }
                | Event::DeploymentStepFailure { .. }
                | Event::GroupChangeFailed { .. }
                | Event::FailedHealthCheckEvent { .. }
        )
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::SchedulerRegistered { framework_id } => write!(f, "scheduler_registered({framework_id})"),
            Event::SchedulerReregistered { framework_id } => write!(f, "scheduler_reregistered({framework_id})"),
            Event::SchedulerDisconnected => write!(f, "scheduler_disconnected"),
            Event::DeploymentInfo { deployment_id, message } => write!(f, "deployment_info({deployment_id}): {message}"),
            Event::DeploymentSuccess { deployment_id } => write!(f, "deployment_success({deployment_id})"),
            Event::DeploymentFailed { deployment_id, reason } => write!(f, "deployment_failed({deployment_id}): {reason}"),
            Event::DeploymentStepSuccess { deployment_id, step_index } => {
                write!(f, "deployment_step_success({deployment_id}, step={step_index})")
            }
            Event::DeploymentStepFailure {
                deployment_id,
                step_index,
                reason,
            } => write!(f, "deployment_step_failure({deployment_id}, step={step_index}): {reason}"),
            Event::GroupChangeSuccess { group_id } => write!(f, "group_change_success({group_id})"),
            Event::GroupChangeFailed { group_id, reason } => write!(f, "group_change_failed({group_id}): {reason}"),
            Event::AddHealthCheckEvent { app_id } => write!(f, "add_health_check_event({app_id})"),
            Event::RemoveHealthCheckEvent { app_id } => write!(f, "remove_health_check_event({app_id})"),
            Event::FailedHealthCheckEvent { app_id, task_id } => write!(f, "failed_health_check_event({app_id}/{task_id})"),
            Event::HealthStatusChangedEvent { app_id, task_id, healthy } => {
                write!(f, "health_status_changed_event({app_id}/{task_id}, healthy={healthy})")
            }
            Event::StatusUpdateEvent { app_id, task_id, status } => {
                write!(f, "status_update_event({app_id}/{task_id}, status={status})")
            }
        }
    }
}

/// Destination for engine events. Out of scope per spec.md §1 ("event-bus
/// transport... logging and metrics sinks") is the production backend;
/// this trait is the seam that a host crate implements. The default
/// `TracingEventSink` (teacher's `StdIoLogger` idiom) is the only
/// implementation carried here.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: Event);

    fn emit_error(&self, event: Event, error: &CoreError) {
        tracing::error!(%event, %error, "core error event");
        self.emit(event);
    }
}

#[derive(Clone, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: Event) {
        if event.is_error() {
            tracing::warn!(%event, "engine event");
        } else {
            tracing::info!(%event, "engine event");
        }
    }
}

#[cfg(test)]
pub(crate) mod test_utils {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct RecordingEventSink {
        pub events: Mutex<Vec<Event>>,
    }

    impl EventSink for RecordingEventSink {
        fn emit(&self, event: Event) {
            self.events.lock().unwrap().push(event);
        }
    }
}
