//! Declared-state repository seam (spec.md §4.7 "Stop: ...then remove the
//! app from the repository"). The group tree itself lives behind a
//! `KvStore`-backed store owned elsewhere (§1 Non-goals: persistent-state
//! backing is out of this core's scope); the executor only needs the
//! narrow "forget this app" mutation, expressed as its own thin trait the
//! same way `store.rs`/`driver.rs`/`artifact.rs` wrap their collaborators.

use async_trait::async_trait;

use crate::errors::CoreError;
use crate::id::PathId;

#[async_trait]
pub trait AppRepository: Send + Sync {
    async fn remove_app(&self, app_id: &PathId) -> Result<(), CoreError>;
}

/// Test double and reference implementation backed by a `Group` tree held
/// behind a lock, matching the teacher's in-memory fakes for its own
/// declared-state repositories.
pub struct InMemoryAppRepository {
    group: std::sync::Mutex<crate::model::group::Group>,
}

impl InMemoryAppRepository {
    pub fn new(group: crate::model::group::Group) -> Self {
        InMemoryAppRepository { group: std::sync::Mutex::new(group) }
    }

    pub fn snapshot(&self) -> crate::model::group::Group {
        self.group.lock().unwrap().clone()
    }
}

#[async_trait]
impl AppRepository for InMemoryAppRepository {
    async fn remove_app(&self, app_id: &PathId) -> Result<(), CoreError> {
        self.group.lock().unwrap().remove_app(app_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Timestamp;
    use crate::model::app::{AppDefinition, Executable, UpgradeStrategy};
    use crate::model::group::Group;
    use chrono::{TimeZone, Utc};

    fn ts() -> Timestamp {
        Utc.timestamp_opt(0, 0).unwrap()
    }

    fn app(id: &str) -> AppDefinition {
        AppDefinition {
            id: PathId::parse_absolute(id).unwrap(),
            executable: Executable::Cmd("run".to_string()),
            instances: 1,
            cpus: 0.1,
            mem: 32.0,
            disk: 0.0,
            ports: vec![],
            require_ports: false,
            accepted_resource_roles: None,
            constraints: Vec::new(),
            health_checks: Vec::new(),
            backoff_seconds: 1,
            backoff_factor: 1.15,
            max_launch_delay_seconds: 3600,
            upgrade_strategy: UpgradeStrategy::default(),
            dependencies: Vec::new(),
            artifact_urls: Vec::new(),
            version: ts(),
        }
    }

    #[tokio::test]
    async fn test_remove_app_drops_it_from_the_tree() {
        // setup:
        let mut root = Group::new(PathId::root(), ts());
        root.insert_app(app("/app1")).unwrap();
        let repo = InMemoryAppRepository::new(root);

        // execute:
        repo.remove_app(&PathId::parse_absolute("/app1").unwrap()).await.unwrap();

        // verify:
        assert!(repo.snapshot().find_app(&PathId::parse_absolute("/app1").unwrap()).is_none());
    }
}
