//! Scheduler coordinator (spec.md §4.8 "Scheduler loop"): the single owner
//! of the launch queue, task tracker and rate limiter, reacting to the
//! Mesos-style callback taxonomy.
//!
//! Grounded on the teacher's single-coordinator-owns-shared-state pattern
//! (`engine_task::environment_task::EnvironmentTask` is the sole mutator of
//! its deployment's state; everything else goes through it) generalized
//! into an explicit enum of inbound callbacks processed one at a time, so
//! no lock is ever held across the `MasterDriver` network call (spec.md §5
//! "suspension-point discipline").

use std::sync::Arc;

use crate::clock::Clock;
use crate::config::CoreConfig;
use crate::driver::MasterDriver;
use crate::errors::{CoreError, ProcessAbdication};
use crate::events::{Event, EventSink};
use crate::health::HealthCheckManager;
use crate::id::PathId;
use crate::matcher;
use crate::model::app::AppDefinition;
use crate::offer::Offer;
use crate::queue::TaskQueue;
use crate::task::{Task, TaskStatus};
use crate::tracker::TaskTracker;

/// Mirrors the Mesos `Scheduler` callback surface (spec.md §4.8).
pub enum SchedulerEvent {
    Registered { framework_id: String },
    Reregistered { framework_id: String },
    ResourceOffers { offers: Vec<Offer> },
    OfferRescinded { offer_id: String },
    StatusUpdate { app_id: PathId, task_id: String, status: TaskStatus, healthy: Option<bool> },
    Disconnected,
    Error { message: String },
}

/// Looks up the `AppDefinition` and currently-placed tasks for an app; the
/// coordinator doesn't own the declared-state tree itself (the group store
/// does), so it depends on this narrow accessor instead of holding a lock
/// across an offer-matching pass.
pub trait AppLookup: Send + Sync {
    fn app(&self, app_id: &PathId) -> Option<AppDefinition>;
}

pub struct SchedulerCoordinator {
    tracker: Arc<TaskTracker>,
    queue: Arc<TaskQueue>,
    health: Arc<HealthCheckManager>,
    driver: Arc<dyn MasterDriver>,
    sink: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
    apps: Arc<dyn AppLookup>,
    config: CoreConfig,
}

impl SchedulerCoordinator {
    pub fn new(
        tracker: Arc<TaskTracker>,
        queue: Arc<TaskQueue>,
        health: Arc<HealthCheckManager>,
        driver: Arc<dyn MasterDriver>,
        sink: Arc<dyn EventSink>,
        clock: Arc<dyn Clock>,
        apps: Arc<dyn AppLookup>,
        config: CoreConfig,
    ) -> Self {
        SchedulerCoordinator {
            tracker,
            queue,
            health,
            driver,
            sink,
            clock,
            apps,
            config,
        }
    }

    /// Processes one inbound callback to completion. Returns `Err(reason)`
    /// only for `CoreError::is_fatal()` conditions (§7, §4.8): the host
    /// process is expected to abdicate leadership on `Err`.
    pub async fn handle(&self, event: SchedulerEvent) -> Result<(), ProcessAbdication> {
        match event {
            SchedulerEvent::Registered { framework_id } => {
                self.sink.emit(Event::SchedulerRegistered { framework_id });
                Ok(())
            }
            SchedulerEvent::Reregistered { framework_id } => {
                self.sink.emit(Event::SchedulerReregistered { framework_id });
                Ok(())
            }
            SchedulerEvent::Disconnected => {
                self.sink.emit(Event::SchedulerDisconnected);
                Ok(())
            }
            SchedulerEvent::Error { message } => Err(ProcessAbdication { reason: message }),
            SchedulerEvent::OfferRescinded { offer_id } => {
                // Nothing outstanding references offer ids past the match pass; no-op.
                let _ = offer_id;
                Ok(())
            }
            SchedulerEvent::StatusUpdate {
                app_id,
                task_id,
                status,
                healthy,
            } => self.handle_status_update(app_id, task_id, status, healthy).await,
            SchedulerEvent::ResourceOffers { offers } => self.handle_offers(offers).await,
        }
    }

    async fn handle_status_update(&self, app_id: PathId, task_id: String, status: TaskStatus, healthy: Option<bool>) -> Result<(), ProcessAbdication> {
        self.sink.emit(Event::StatusUpdateEvent {
            app_id: app_id.clone(),
            task_id: task_id.clone(),
            status: format!("{status:?}"),
        });

        if status == TaskStatus::Running {
            self.tracker.running(&app_id, &task_id, self.clock.as_ref());
            return Ok(());
        }

        if status.is_terminal() {
            let was_healthy = healthy.unwrap_or(true);
            if let Some(app) = self.apps.app(&app_id) {
                if status.counts_as_failure(was_healthy) {
                    self.queue.limiter.add_failure(&app, self.clock.now());
                } else {
                    self.queue.limiter.reset(&app_id, app.version);
                }
            }
            self.health.forget_task(&app_id, &task_id);
            self.tracker.terminated(&app_id, &task_id, status);
        } else {
            self.tracker.status_update(&app_id, &task_id, status, healthy);
        }
        Ok(())
    }

    /// Matches queued launches against incoming offers, one task per offer
    /// per pass (spec.md §4.3). Offers with no match are declined; a fatal
    /// `DriverError` aborts the whole pass (suspension-point discipline: the
    /// queue snapshot taken before the loop is never locked across the
    /// await boundary in `launch_task`/`decline_offer`).
    async fn handle_offers(&self, offers: Vec<Offer>) -> Result<(), ProcessAbdication> {
        for offer in offers {
            let mut matched = false;
            for entry in self.queue.snapshot() {
                let Some(app) = self.apps.app(&entry.app_id) else { continue };
                if self.queue.limiter.has_time_left(&app.id, app.version, self.clock.now()) {
                    continue;
                }
                let placed = self.tracker.get(&app.id);
                match matcher::try_match(&app, &offer, &placed, &self.config) {
                    Ok(plan) => {
                        let task_id = uuid::Uuid::new_v4().to_string();
                        match self.driver.launch_task(&offer.id, &task_id, &plan).await {
                            Ok(()) => {
                                self.queue.remove_one(&entry);
                                let task = Task::new_staging(task_id, app.id.clone(), app.version, plan.host.clone(), plan.host_ports.clone(), self.clock.now());
                                self.tracker.created(&app.id, task);
                                matched = true;
                                break;
                            }
                            Err(e) if e.is_fatal() => {
                                return Err(ProcessAbdication { reason: e.to_string() });
                            }
                            Err(_) => continue,
                        }
                    }
                    Err(reason) => {
                        tracing::debug!(app_id = %app.id, ?reason, "offer declined for app");
                        continue;
                    }
                }
            }
            if !matched {
                if let Err(e) = self.driver.decline_offer(&offer.id).await {
                    if e.is_fatal() {
                        return Err(ProcessAbdication { reason: e.to_string() });
                    }
                }
            }
        }
        Ok(())
    }

    /// Kills tasks stuck in `STAGING` past `taskLaunchTimeout` (spec.md §4.4).
    pub async fn reap_stale_staging_tasks(&self, timeout: std::time::Duration) -> Result<(), ProcessAbdication> {
        for task in self.tracker.check_staged_tasks(timeout, self.clock.now()) {
            if let Err(e) = self.driver.kill_task(&task.id).await {
                if e.is_fatal() {
                    return Err(ProcessAbdication { reason: e.to_string() });
                }
            }
        }
        Ok(())
    }

    /// Reconciles every currently tracked task's status with the master
    /// (spec.md §4.8 "reconcileTasks"). With nothing tracked this degenerates
    /// to the Mesos "full reconciliation" call: an empty list asking the
    /// master to resend the status of everything it still knows about.
    pub async fn reconcile_tasks(&self) -> Result<(), ProcessAbdication> {
        let task_ids: Vec<String> = self.tracker.all_tasks().into_iter().map(|t| t.id).collect();
        if let Err(e) = self.driver.reconcile_tasks(&task_ids).await {
            if e.is_fatal() {
                return Err(ProcessAbdication { reason: e.to_string() });
            }
        }
        Ok(())
    }
}
