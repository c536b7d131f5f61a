//! Master driver seam: the boundary to the offer-sending cluster master
//! (spec.md §6 "External collaborators", §4.8 "Scheduler loop").
//!
//! Grounded on the same `ObjectStorage`/`ContainerRegistry`-style injected
//! `async_trait` collaborator pattern as `store.rs`, mirroring how the
//! teacher's deployment actions never talk to `kube`/cloud SDKs directly
//! but through a narrow trait they can fake in tests.

use async_trait::async_trait;
use std::sync::Mutex;

use crate::errors::CoreError;
use crate::matcher::LaunchPlan;

#[async_trait]
pub trait MasterDriver: Send + Sync {
    async fn launch_task(&self, offer_id: &str, task_id: &str, plan: &LaunchPlan) -> Result<(), CoreError>;
    async fn kill_task(&self, task_id: &str) -> Result<(), CoreError>;
    async fn decline_offer(&self, offer_id: &str) -> Result<(), CoreError>;
    async fn reconcile_tasks(&self, task_ids: &[String]) -> Result<(), CoreError>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum DriverCall {
    Launch { offer_id: String, task_id: String },
    Kill { task_id: String },
    Decline { offer_id: String },
    Reconcile { task_ids: Vec<String> },
}

/// Records every call for assertions; production code never constructs
/// this, tests do (same role as `FakeDriver` in a Mesos scheduler's own
/// test suite).
#[derive(Default)]
pub struct FakeDriver {
    pub calls: Mutex<Vec<DriverCall>>,
    pub fail_launches: Mutex<bool>,
}

impl FakeDriver {
    pub fn new() -> Self {
        FakeDriver::default()
    }

    pub fn set_fail_launches(&self, fail: bool) {
        *self.fail_launches.lock().unwrap() = fail;
    }
}

#[async_trait]
impl MasterDriver for FakeDriver {
    async fn launch_task(&self, offer_id: &str, task_id: &str, _plan: &LaunchPlan) -> Result<(), CoreError> {
        if *self.fail_launches.lock().unwrap() {
            return Err(CoreError::DriverError("launch rejected by fake driver".to_string()));
        }
        self.calls.lock().unwrap().push(DriverCall::Launch {
            offer_id: offer_id.to_string(),
            task_id: task_id.to_string(),
        });
        Ok(())
    }

    async fn kill_task(&self, task_id: &str) -> Result<(), CoreError> {
        self.calls.lock().unwrap().push(DriverCall::Kill { task_id: task_id.to_string() });
        Ok(())
    }

    async fn decline_offer(&self, offer_id: &str) -> Result<(), CoreError> {
        self.calls.lock().unwrap().push(DriverCall::Decline { offer_id: offer_id.to_string() });
        Ok(())
    }

    async fn reconcile_tasks(&self, task_ids: &[String]) -> Result<(), CoreError> {
        self.calls.lock().unwrap().push(DriverCall::Reconcile { task_ids: task_ids.to_vec() });
        Ok(())
    }
}
