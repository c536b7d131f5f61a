//! Deployment executor: turns a `DeploymentPlan` into queued launch/kill
//! requests, bounding restarts by `UpgradeStrategy` and supporting forced
//! cancellation (spec.md §4.6, §4.7).
//!
//! Grounded on the teacher's `EnvironmentTask` (`deployment_task/
//! environment_task.rs`): an `Arc<AtomicBool> cancel_requested` flag
//! checked between units of work, generalized here to be checked between
//! plan actions rather than between environment actions. The kill/launch
//! calls themselves go through the same `MasterDriver`/`ArtifactStore`/
//! `AppRepository` collaborator seams as the scheduler and artifact module,
//! so this executor holds no network code of its own.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use uuid::Uuid;

use crate::artifact::{resolve_artifacts, ArtifactStore};
use crate::clock::Clock;
use crate::deploy::plan::{DeploymentPlan, StepAction};
use crate::driver::MasterDriver;
use crate::errors::CoreError;
use crate::events::{Event, EventSink};
use crate::health::HealthCheckManager;
use crate::id::PathId;
use crate::model::app::AppDefinition;
use crate::queue::TaskQueue;
use crate::repository::AppRepository;
use crate::task::Task;
use crate::tracker::TaskTracker;

/// One batch of a rolling restart: how many old instances may be killed and
/// how many new instances may be launched in this round without violating
/// `minimumHealthCapacity` / `maximumOverCapacity` (spec.md §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartBatch {
    pub to_kill: u32,
    pub to_start: u32,
}

/// Computes one rolling-restart round. `old_alive`/`new_alive` are alive
/// instance counts of the previous and new app versions respectively.
pub fn next_restart_batch(desired: u32, min_health_capacity: f64, max_over_capacity: f64, old_alive: u32, new_alive: u32) -> RestartBatch {
    let min_healthy = (desired as f64 * min_health_capacity).ceil() as u32;
    let max_capacity = desired + (desired as f64 * max_over_capacity).floor() as u32;

    let current_total = old_alive + new_alive;
    let capacity_room = max_capacity.saturating_sub(current_total);
    let to_start = capacity_room.min(old_alive);

    let current_healthy = old_alive + new_alive;
    let to_kill = current_healthy.saturating_sub(min_healthy).min(old_alive);

    RestartBatch { to_kill, to_start }
}

/// Caps how many rounds `drive_restart` will loop through before giving up
/// on convergence; a round that both starts and kills zero instances (no
/// capacity room, no healthy slack) never makes progress on its own, so
/// this bounds the wait on external health/capacity changes rather than
/// the restart's legitimate step count.
const MAX_RESTART_ROUNDS: u32 = 600;
const RESTART_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Handle returned for an in-flight deployment; `request_cancel` sets the
/// shared flag the executor checks between actions.
#[derive(Clone)]
pub struct DeploymentHandle {
    pub id: Uuid,
    cancel_requested: Arc<AtomicBool>,
}

impl DeploymentHandle {
    pub fn request_cancel(&self) {
        self.cancel_requested.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }
}

/// Per-app advisory locks (spec.md §4.6 "concurrent deployments touching
/// the same app are rejected, not queued"), plus the in-flight deployment
/// registry used for forced cancellation, and the collaborators needed to
/// actually execute scale/restart/stop/resolve-artifacts actions.
pub struct DeploymentExecutor {
    app_locks: Mutex<HashMap<PathId, Uuid>>,
    in_flight: Mutex<HashMap<Uuid, Arc<AtomicBool>>>,
    queue: Arc<TaskQueue>,
    sink: Arc<dyn EventSink>,
    tracker: Arc<TaskTracker>,
    health: Arc<HealthCheckManager>,
    driver: Arc<dyn MasterDriver>,
    repository: Arc<dyn AppRepository>,
    artifacts: Arc<dyn ArtifactStore>,
}

impl DeploymentExecutor {
    pub fn new(
        queue: Arc<TaskQueue>,
        sink: Arc<dyn EventSink>,
        tracker: Arc<TaskTracker>,
        health: Arc<HealthCheckManager>,
        driver: Arc<dyn MasterDriver>,
        repository: Arc<dyn AppRepository>,
        artifacts: Arc<dyn ArtifactStore>,
    ) -> Self {
        DeploymentExecutor {
            app_locks: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
            queue,
            sink,
            tracker,
            health,
            driver,
            repository,
            artifacts,
        }
    }

    fn affected_apps(plan: &DeploymentPlan) -> Vec<PathId> {
        plan.steps
            .iter()
            .flat_map(|s| &s.actions)
            .map(|a| match a {
                StepAction::ResolveArtifacts(app, _) | StepAction::Start(app) | StepAction::Scale(app) | StepAction::Restart(app) => app.id.clone(),
                StepAction::Stop(id) => id.clone(),
            })
            .collect()
    }

    /// Acquires advisory locks on every app the plan touches, failing with
    /// `AppLocked` (naming the deployments holding the conflicting locks) if
    /// any is already under deployment. On success, registers the
    /// deployment and returns a cancellable handle.
    pub fn begin(&self, deployment_id: Uuid, plan: &DeploymentPlan) -> Result<DeploymentHandle, CoreError> {
        let affected = Self::affected_apps(plan);
        let mut locks = self.app_locks.lock().unwrap();

        let conflicts: Vec<Uuid> = affected.iter().filter_map(|id| locks.get(id).copied()).collect();
        if !conflicts.is_empty() {
            return Err(CoreError::AppLocked(conflicts));
        }
        for id in &affected {
            locks.insert(id.clone(), deployment_id);
        }

        let cancel_requested = Arc::new(AtomicBool::new(false));
        self.in_flight.lock().unwrap().insert(deployment_id, cancel_requested.clone());

        Ok(DeploymentHandle {
            id: deployment_id,
            cancel_requested,
        })
    }

    /// Like `begin`, but a lock conflict cancels the conflicting
    /// deployment(s) instead of being rejected (spec.md §4.6 "forced
    /// deployment"): their cancel flags flip (so their own executor loop
    /// observes cancellation on its next action) and their app locks
    /// transfer to `deployment_id`.
    pub fn begin_forced(&self, deployment_id: Uuid, plan: &DeploymentPlan) -> Result<DeploymentHandle, CoreError> {
        let affected = Self::affected_apps(plan);
        let mut locks = self.app_locks.lock().unwrap();
        let in_flight = self.in_flight.lock().unwrap();

        let conflicting: std::collections::BTreeSet<Uuid> = affected.iter().filter_map(|id| locks.get(id).copied()).collect();
        for conflict_id in &conflicting {
            if let Some(flag) = in_flight.get(conflict_id) {
                flag.store(true, Ordering::SeqCst);
            }
            self.sink.emit(Event::DeploymentFailed {
                deployment_id: *conflict_id,
                reason: format!("cancelled by forced deployment {deployment_id}"),
            });
        }
        drop(in_flight);

        for id in &affected {
            locks.insert(id.clone(), deployment_id);
        }
        drop(locks);

        let cancel_requested = Arc::new(AtomicBool::new(false));
        self.in_flight.lock().unwrap().insert(deployment_id, cancel_requested.clone());

        Ok(DeploymentHandle {
            id: deployment_id,
            cancel_requested,
        })
    }

    /// Releases every lock held by `deployment_id` (called on completion,
    /// failure, or cancellation).
    pub fn finish(&self, deployment_id: Uuid) {
        self.in_flight.lock().unwrap().remove(&deployment_id);
        self.app_locks.lock().unwrap().retain(|_, holder| *holder != deployment_id);
    }

    /// Runs `body` with a deployment's locks held, releasing them (even if
    /// `body` returns `Err` or panics) before returning.
    pub fn with_deployment<R>(&self, deployment_id: Uuid, plan: &DeploymentPlan, body: impl FnOnce(&DeploymentHandle) -> Result<R, CoreError>) -> Result<R, CoreError> {
        let handle = self.begin(deployment_id, plan)?;
        let _release = scopeguard::guard(deployment_id, |id| self.finish(id));
        body(&handle)
    }

    pub fn request_cancel(&self, deployment_id: Uuid) -> Result<(), CoreError> {
        self.in_flight
            .lock()
            .unwrap()
            .get(&deployment_id)
            .map(|flag| flag.store(true, Ordering::SeqCst))
            .ok_or(CoreError::UnknownDeployment(deployment_id))
    }

    fn check_not_cancelled(&self, deployment_id: Uuid) -> Result<(), CoreError> {
        let cancelled = self
            .in_flight
            .lock()
            .unwrap()
            .get(&deployment_id)
            .map(|f| f.load(Ordering::SeqCst))
            .unwrap_or(false);
        if cancelled {
            self.sink.emit(Event::DeploymentFailed {
                deployment_id,
                reason: "cancelled".to_string(),
            });
            return Err(CoreError::ConflictingChange("deployment cancelled".to_string()));
        }
        Ok(())
    }

    /// Executes every step of a plan in order, checking for cancellation
    /// before each action (spec.md §4.6 "forced deployment cancellation is
    /// observed between actions, not just between steps").
    pub async fn execute_plan(&self, deployment_id: Uuid, plan: &DeploymentPlan, clock: &dyn Clock) -> Result<(), CoreError> {
        self.check_not_cancelled(deployment_id)?;

        for (step_index, step) in plan.steps.iter().enumerate() {
            for action in &step.actions {
                self.check_not_cancelled(deployment_id)?;
                match action {
                    StepAction::ResolveArtifacts(_, urls) => {
                        resolve_artifacts(self.artifacts.as_ref(), urls).await?;
                    }
                    StepAction::Start(app) => self.queue_instances(app, clock),
                    StepAction::Scale(app) => self.apply_scale(app, clock).await?,
                    StepAction::Restart(app) => self.drive_restart(deployment_id, app, clock).await?,
                    StepAction::Stop(app_id) => self.apply_stop(app_id).await?,
                }
            }
            self.sink.emit(Event::DeploymentStepSuccess { deployment_id, step_index });
        }
        Ok(())
    }

    fn queue_instances(&self, app: &AppDefinition, clock: &dyn Clock) {
        self.queue.add_n(app, app.instances, clock);
    }

    /// Whether a task counts as healthy for batching/kill-preference
    /// purposes: an app with no configured health checks falls back to
    /// `RUNNING` (spec.md §4.7).
    fn task_is_healthy(&self, app: &AppDefinition, task: &Task) -> bool {
        if app.health_checks.is_empty() {
            task.is_healthy_assuming_no_health_checks()
        } else {
            self.health.task_is_healthy(&app.id, &task.id, app.health_checks.len())
        }
    }

    /// Picks `count` tasks to kill, preferring unhealthy ones, then oldest
    /// `staged_at` (spec.md §4.7 Scale-down tie-breaking).
    fn pick_kill_candidates(&self, app: &AppDefinition, tasks: &[Task], count: u32) -> Vec<Task> {
        let mut candidates = tasks.to_vec();
        candidates.sort_by_key(|t| (self.task_is_healthy(app, t), t.staged_at));
        candidates.into_iter().take(count as usize).collect()
    }

    /// Spec.md §4.7 "Scale(from → to)": enqueue the delta if growing, or
    /// kill the delta (preferring unhealthy, then oldest) and await their
    /// terminal status if shrinking.
    async fn apply_scale(&self, app: &AppDefinition, clock: &dyn Clock) -> Result<(), CoreError> {
        let alive = self.tracker.alive_count(&app.id) as u32;
        let desired = app.instances;

        if desired > alive {
            self.queue.add_n(app, desired - alive, clock);
        } else if desired < alive {
            let alive_tasks: Vec<Task> = self.tracker.get(&app.id).into_iter().filter(|t| t.is_alive()).collect();
            let to_kill = self.pick_kill_candidates(app, &alive_tasks, alive - desired);
            for task in &to_kill {
                self.driver.kill_task(&task.id).await?;
            }
            self.await_alive_count_at_most(&app.id, desired as usize).await;
        }
        Ok(())
    }

    /// Polls the tracker for up to `errors::retry_policy`'s bounded backoff
    /// until `app_id` is down to `target` alive tasks, or gives up (a kill
    /// the driver accepted but the master never confirms leaves the step
    /// done anyway; the next reconcile pass will catch it).
    async fn await_alive_count_at_most(&self, app_id: &PathId, target: usize) {
        for delay in crate::errors::retry_policy() {
            if self.tracker.alive_count(app_id) <= target {
                return;
            }
            tokio::time::sleep(delay).await;
        }
    }

    /// Spec.md §4.7 "Stop": kill every tracked task for the app, drop its
    /// health-checker state, remove it from the repository, and drop any
    /// of its launches still sitting in the queue.
    async fn apply_stop(&self, app_id: &PathId) -> Result<(), CoreError> {
        let tasks = self.tracker.drain(app_id);
        for task in &tasks {
            self.driver.kill_task(&task.id).await?;
        }
        self.health.reconcile_with(app_id, &[]);
        self.queue.retain(|entry| &entry.app_id != app_id);
        self.repository.remove_app(app_id).await
    }

    /// Spec.md §4.7 "Restart": drives one rolling batch at a time —
    /// launching `to_start` new-version instances and killing `to_kill`
    /// old-version ones per round — until the old version is fully drained
    /// and every new instance is healthy.
    async fn drive_restart(&self, deployment_id: Uuid, app: &AppDefinition, clock: &dyn Clock) -> Result<(), CoreError> {
        let desired = app.instances;
        let min_health = app.upgrade_strategy.minimum_health_capacity;
        let max_over = app.upgrade_strategy.maximum_over_capacity;

        for _ in 0..MAX_RESTART_ROUNDS {
            self.check_not_cancelled(deployment_id)?;

            let alive = self.tracker.get(&app.id).into_iter().filter(|t| t.is_alive()).collect::<Vec<_>>();
            let (new_tasks, old_tasks): (Vec<Task>, Vec<Task>) = alive.into_iter().partition(|t| t.app_version == app.version);
            let old_alive = old_tasks.len() as u32;
            let new_alive = new_tasks.len() as u32;
            let new_healthy = new_tasks.iter().filter(|t| self.task_is_healthy(app, t)).count() as u32;

            if old_alive == 0 && new_healthy >= desired {
                return Ok(());
            }

            let batch = next_restart_batch(desired, min_health, max_over, old_alive, new_alive);

            if batch.to_start > 0 {
                self.queue.add_n(app, batch.to_start, clock);
            }
            if batch.to_kill > 0 {
                for task in self.pick_kill_candidates(app, &old_tasks, batch.to_kill) {
                    self.driver.kill_task(&task.id).await?;
                }
            }

            tokio::time::sleep(RESTART_POLL_INTERVAL).await;
        }

        Err(CoreError::ConflictingChange(format!("restart of {} did not converge", app.id)))
    }
}
