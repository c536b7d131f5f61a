//! Health check manager (spec.md §5 "Health checks").
//!
//! Grounded on the teacher's reader/writer-locked status cache pattern used
//! for deployment state (`deployment_task/mod.rs` tracks per-app progress
//! behind a lock that readers never block writers out of for long), adapted
//! here to a per-`(app, task, check index)` consecutive-failure counter.
//! Probing is abstracted behind `HealthProbe` so the manager itself has no
//! network code to fake in tests; the default `ReqwestProbe`/`TcpProbe`
//! implementations are the only production-facing network code in this
//! module.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use crate::clock::Timestamp;
use crate::id::PathId;
use crate::model::app::{HealthCheck, HealthCheckProtocol};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Unknown,
    Healthy,
    Unhealthy,
}

/// Outcome of a single probe attempt. `Ignored` covers the `ignoreHttp1xx`
/// case (spec.md §9 Open Question: a 1xx response neither counts as a
/// failure nor resets the consecutive-failure streak).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Success,
    Failure,
    Ignored,
}

pub trait HealthProbe: Send + Sync {
    fn probe(&self, check: &HealthCheck, host: &str, port: u16) -> ProbeOutcome;
}

/// Blocking HTTP probe (teacher already depends on `reqwest`; blocking
/// client mirrors how synchronous health probing is usually run off the
/// async scheduler loop, one blocking task per probe).
#[derive(Default)]
pub struct ReqwestProbe;

impl HealthProbe for ReqwestProbe {
    fn probe(&self, check: &HealthCheck, host: &str, port: u16) -> ProbeOutcome {
        let path = check.path.as_deref().unwrap_or("/");
        let url = format!("http://{host}:{port}{path}");
        let client = match reqwest::blocking::Client::builder().timeout(Duration::from_secs(check.timeout_seconds as u64)).build() {
            Ok(c) => c,
            Err(_) => return ProbeOutcome::Failure,
        };
        match client.get(&url).send() {
            Ok(response) => {
                let status = response.status().as_u16();
                if check.ignore_http1xx && (100..200).contains(&status) {
                    ProbeOutcome::Ignored
                } else if (200..300).contains(&status) {
                    ProbeOutcome::Success
                } else {
                    ProbeOutcome::Failure
                }
            }
            Err(_) => ProbeOutcome::Failure,
        }
    }
}

pub struct TcpProbe;

impl HealthProbe for TcpProbe {
    fn probe(&self, check: &HealthCheck, host: &str, port: u16) -> ProbeOutcome {
        let timeout = Duration::from_secs(check.timeout_seconds as u64);
        let addr = match format!("{host}:{port}").parse::<std::net::SocketAddr>() {
            Ok(addr) => addr,
            Err(_) => return ProbeOutcome::Failure,
        };
        match std::net::TcpStream::connect_timeout(&addr, timeout) {
            Ok(_) => ProbeOutcome::Success,
            Err(_) => ProbeOutcome::Failure,
        }
    }
}

#[derive(Debug, Clone)]
struct CheckerRecord {
    state: HealthState,
    consecutive_failures: u32,
}

impl Default for CheckerRecord {
    fn default() -> Self {
        CheckerRecord {
            state: HealthState::Unknown,
            consecutive_failures: 0,
        }
    }
}

type CheckerKey = (PathId, String, usize);

/// A status change worth emitting as `Event::HealthStatusChangedEvent` or
/// `Event::FailedHealthCheckEvent` (spec.md §6).
#[derive(Debug, Clone, PartialEq)]
pub enum HealthTransition {
    BecameHealthy,
    BecameUnhealthy,
    FailedButStillWithinThreshold,
    KillTask,
}

#[derive(Default)]
pub struct HealthCheckManager {
    records: RwLock<HashMap<CheckerKey, CheckerRecord>>,
}

impl HealthCheckManager {
    pub fn new() -> Self {
        HealthCheckManager::default()
    }

    /// Records one probe result for `(app_id, task_id, check_index)`. Before
    /// `staged_at + grace_period_seconds` has elapsed, probe results are
    /// observed but never count toward failure (spec.md §5 grace period).
    pub fn record(
        &self,
        app_id: &PathId,
        task_id: &str,
        check_index: usize,
        check: &HealthCheck,
        staged_at: Timestamp,
        now: Timestamp,
        outcome: ProbeOutcome,
    ) -> HealthTransition {
        let key = (app_id.clone(), task_id.to_string(), check_index);
        let in_grace_period = now.signed_duration_since(staged_at) < chrono::Duration::seconds(check.grace_period_seconds as i64);

        let mut records = self.records.write().unwrap();
        let record = records.entry(key).or_default();

        match outcome {
            ProbeOutcome::Ignored => {
                // Neither counts as failure nor resets the streak.
                HealthTransition::FailedButStillWithinThreshold
            }
            ProbeOutcome::Success => {
                record.consecutive_failures = 0;
                let was_healthy = record.state == HealthState::Healthy;
                record.state = HealthState::Healthy;
                if was_healthy {
                    HealthTransition::FailedButStillWithinThreshold
                } else {
                    HealthTransition::BecameHealthy
                }
            }
            ProbeOutcome::Failure if in_grace_period => HealthTransition::FailedButStillWithinThreshold,
            ProbeOutcome::Failure => {
                record.consecutive_failures += 1;
                if record.consecutive_failures >= check.max_consecutive_failures {
                    record.state = HealthState::Unhealthy;
                    HealthTransition::KillTask
                } else if record.state == HealthState::Healthy {
                    record.state = HealthState::Unhealthy;
                    HealthTransition::BecameUnhealthy
                } else {
                    HealthTransition::FailedButStillWithinThreshold
                }
            }
        }
    }

    pub fn state(&self, app_id: &PathId, task_id: &str, check_index: usize) -> HealthState {
        let key = (app_id.clone(), task_id.to_string(), check_index);
        self.records.read().unwrap().get(&key).map(|r| r.state).unwrap_or(HealthState::Unknown)
    }

    /// Overall task health: healthy only if every configured checker for the
    /// task reports healthy (spec.md §5 "combined health status").
    pub fn task_is_healthy(&self, app_id: &PathId, task_id: &str, check_count: usize) -> bool {
        if check_count == 0 {
            return true;
        }
        (0..check_count).all(|idx| self.state(app_id, task_id, idx) == HealthState::Healthy)
    }

    /// Drops all state for a task (spec.md §5, invoked when a task goes terminal).
    pub fn forget_task(&self, app_id: &PathId, task_id: &str) {
        self.records.write().unwrap().retain(|(a, t, _), _| !(a == app_id && t == task_id));
    }

    /// Per-checker states for one task, ordered by check index.
    pub fn status(&self, app_id: &PathId, task_id: &str) -> Vec<HealthState> {
        let records = self.records.read().unwrap();
        let mut entries: Vec<(usize, HealthState)> = records
            .iter()
            .filter(|((a, t, _), _)| a == app_id && t == task_id)
            .map(|((_, _, idx), record)| (*idx, record.state))
            .collect();
        entries.sort_by_key(|(idx, _)| *idx);
        entries.into_iter().map(|(_, state)| state).collect()
    }

    /// Per-checker states for every task tracked under an app.
    pub fn statuses(&self, app_id: &PathId) -> HashMap<String, Vec<HealthState>> {
        let task_ids: std::collections::BTreeSet<String> = self
            .records
            .read()
            .unwrap()
            .keys()
            .filter(|(a, _, _)| a == app_id)
            .map(|(_, t, _)| t.clone())
            .collect();
        task_ids.into_iter().map(|task_id| { let s = self.status(app_id, &task_id); (task_id, s) }).collect()
    }

    /// Tallies tasks by overall health (spec.md §5, drives the restart
    /// loop's "healthy_new=N" convergence check). A task counts as healthy
    /// only if every one of its configured checkers is healthy, unhealthy if
    /// any checker is unhealthy, unknown otherwise.
    pub fn health_counts(&self, app_id: &PathId) -> HealthCounts {
        let mut counts = HealthCounts::default();
        for states in self.statuses(app_id).values() {
            if states.iter().any(|s| *s == HealthState::Unhealthy) {
                counts.unhealthy += 1;
            } else if states.iter().all(|s| *s == HealthState::Healthy) {
                counts.healthy += 1;
            } else {
                counts.unknown += 1;
            }
        }
        counts
    }

    /// Drops checker state for every task of `app_id` no longer present in
    /// `live_task_ids` (spec.md §5 "reconcileWith": prune dead versions,
    /// leave live ones alone so in-progress grace periods survive).
    pub fn reconcile_with(&self, app_id: &PathId, live_task_ids: &[String]) {
        let live: std::collections::HashSet<&String> = live_task_ids.iter().collect();
        self.records.write().unwrap().retain(|(a, t, _), _| a != app_id || live.contains(t));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HealthCounts {
    pub healthy: usize,
    pub unhealthy: usize,
    pub unknown: usize,
}

/// Dispatches a probe to the right `HealthProbe` implementation for the
/// check's configured protocol. `COMMAND` checks have no network transport
/// here (spec.md Non-goals: executor-side command execution is out of
/// scope for this core); callers needing it supply their own `HealthProbe`.
pub fn probe_for(check: &HealthCheck) -> Box<dyn HealthProbe> {
    match check.protocol {
        HealthCheckProtocol::Http => Box::new(ReqwestProbe),
        HealthCheckProtocol::Tcp => Box::new(TcpProbe),
        HealthCheckProtocol::Command => Box::new(ReqwestProbe),
    }
}
