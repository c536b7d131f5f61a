//! Declared service state (spec.md §3 "AppDefinition"). Immutable once
//! versioned: mutating an app means producing a new `AppDefinition` with a
//! fresh `version`.
//!
//! Grounded on the teacher's `environment/models/application.rs` for the
//! "declared spec struct with a builder-ish `new`, validated invariants,
//! canonical-equality helper" shape, adapted from k8s/Helm fields to the
//! Mesos-style fields spec.md actually names.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::clock::Timestamp;
use crate::errors::CoreError;
use crate::id::PathId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConstraintOp {
    Unique,
    Cluster,
    GroupBy,
    Like,
    Unlike,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constraint {
    pub field: String,
    pub op: ConstraintOp,
    pub value: Option<String>,
}

impl Constraint {
    pub fn new(field: impl Into<String>, op: ConstraintOp, value: Option<String>) -> Self {
        Constraint {
            field: field.into(),
            op,
            value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthCheckProtocol {
    Http,
    Tcp,
    Command,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheck {
    pub protocol: HealthCheckProtocol,
    /// HTTP only: path to GET.
    pub path: Option<String>,
    /// Index into the task's allocated host ports.
    pub port_index: usize,
    pub interval_seconds: u32,
    pub timeout_seconds: u32,
    pub grace_period_seconds: u32,
    pub max_consecutive_failures: u32,
    /// HTTP only: if set, 1xx responses don't count as failure and don't
    /// reset the streak either (see SPEC_FULL.md design decision).
    pub ignore_http1xx: bool,
    /// COMMAND only: the command the executor runs on the task's host.
    pub command: Option<String>,
}

impl HealthCheck {
    pub fn http(path: impl Into<String>, port_index: usize) -> Self {
        HealthCheck {
            protocol: HealthCheckProtocol::Http,
            path: Some(path.into()),
            port_index,
            interval_seconds: 10,
            timeout_seconds: 5,
            grace_period_seconds: 15,
            max_consecutive_failures: 3,
            ignore_http1xx: false,
            command: None,
        }
    }

    pub fn tcp(port_index: usize) -> Self {
        HealthCheck {
            protocol: HealthCheckProtocol::Tcp,
            path: None,
            port_index,
            interval_seconds: 10,
            timeout_seconds: 5,
            grace_period_seconds: 15,
            max_consecutive_failures: 3,
            ignore_http1xx: false,
            command: None,
        }
    }

    pub fn command(command: impl Into<String>) -> Self {
        HealthCheck {
            protocol: HealthCheckProtocol::Command,
            path: None,
            port_index: 0,
            interval_seconds: 10,
            timeout_seconds: 5,
            grace_period_seconds: 15,
            max_consecutive_failures: 3,
            ignore_http1xx: false,
            command: Some(command.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContainerEngine {
    Docker,
    Mesos,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    pub container_port: u16,
    /// `0` means dynamically allocated, same convention as `AppDefinition::ports`.
    pub host_port: i32,
    pub protocol: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    pub container_path: String,
    pub host_path: String,
    pub read_only: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkMode {
    Host,
    Bridge,
    Container,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Container {
    pub engine: ContainerEngine,
    pub image: String,
    pub volumes: Vec<Volume>,
    pub network_mode: NetworkMode,
    pub port_mappings: Vec<PortMapping>,
    pub parameters: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpgradeStrategy {
    pub minimum_health_capacity: f64,
    pub maximum_over_capacity: f64,
}

impl Default for UpgradeStrategy {
    fn default() -> Self {
        UpgradeStrategy {
            minimum_health_capacity: 1.0,
            maximum_over_capacity: 1.0,
        }
    }
}

impl UpgradeStrategy {
    pub fn validate(&self) -> Result<(), CoreError> {
        if !(0.0..=1.0).contains(&self.minimum_health_capacity) {
            return Err(CoreError::ValidationFailed(
                "minimumHealthCapacity must be in [0,1]".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.maximum_over_capacity) {
            return Err(CoreError::ValidationFailed(
                "maximumOverCapacity must be in [0,1]".to_string(),
            ));
        }
        Ok(())
    }
}

/// Executable payload for a task: exactly one of a bare command, an argv
/// vector, or a container image (spec.md §3 invariant).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Executable {
    Cmd(String),
    Args(Vec<String>),
    Container(Container),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppDefinition {
    pub id: PathId,
    pub executable: Executable,
    pub instances: u32,
    pub cpus: f64,
    pub mem: f64,
    pub disk: f64,
    /// Required host ports. `0` means "allocate dynamically"; non-zero
    /// requires that literal port in the offer only if `require_ports` is
    /// set, otherwise it's a service-port label (§3, §4.1).
    pub ports: Vec<i32>,
    pub require_ports: bool,
    pub accepted_resource_roles: Option<BTreeSet<String>>,
    pub constraints: Vec<Constraint>,
    pub health_checks: Vec<HealthCheck>,
    pub backoff_seconds: u64,
    pub backoff_factor: f64,
    pub max_launch_delay_seconds: u64,
    pub upgrade_strategy: UpgradeStrategy,
    /// Absolute or relative path ids, resolved via `PathId::resolve_relative`.
    pub dependencies: Vec<String>,
    /// URLs to fetch into the shared artifact store before the task is
    /// launched or restarted (spec.md §3 `ResolveArtifacts`, §4.7).
    #[serde(default)]
    pub artifact_urls: Vec<String>,
    pub version: Timestamp,
}

impl AppDefinition {
    pub fn validate(&self) -> Result<(), CoreError> {
        match &self.executable {
            Executable::Cmd(cmd) if cmd.trim().is_empty() => {
                return Err(CoreError::ValidationFailed(format!("{}: empty cmd", self.id)));
            }
            Executable::Args(args) if args.is_empty() => {
                return Err(CoreError::ValidationFailed(format!("{}: empty args", self.id)));
            }
            Executable::Container(c) if c.image.trim().is_empty() => {
                return Err(CoreError::ValidationFailed(format!("{}: empty container image", self.id)));
            }
            _ => {}
        }
        if self.cpus < 0.0 || self.mem < 0.0 || self.disk < 0.0 {
            return Err(CoreError::ValidationFailed(format!("{}: negative resource request", self.id)));
        }
        self.upgrade_strategy.validate()?;
        Ok(())
    }

    /// Resolves `dependencies` to absolute `PathId`s.
    pub fn resolved_dependencies(&self) -> Result<Vec<PathId>, CoreError> {
        self.dependencies.iter().map(|d| self.id.resolve_relative(d)).collect()
    }

    /// All declared ports (top-level `ports` plus any container port mappings).
    pub fn all_declared_host_ports(&self) -> Vec<i32> {
        let mut ports = self.ports.clone();
        if let Executable::Container(c) = &self.executable {
            ports.extend(c.port_mappings.iter().map(|p| p.host_port));
        }
        ports
    }

    pub fn has_dynamic_ports(&self) -> bool {
        self.all_declared_host_ports().iter().any(|p| *p == 0)
    }

    /// Canonical equality "modulo `version` and dynamic-port assignments"
    /// (spec.md §4.6 Restart classification rule).
    pub fn canonically_equal(&self, other: &AppDefinition) -> bool {
        fn normalize_ports(ports: &[i32]) -> Vec<i32> {
            ports.iter().map(|p| if *p == 0 { 0 } else { *p }).collect()
        }
        self.id == other.id
            && self.executable_equal_modulo_ports(other)
            && self.instances == other.instances
            && self.cpus == other.cpus
            && self.mem == other.mem
            && self.disk == other.disk
            && normalize_ports(&self.ports) == normalize_ports(&other.ports)
            && self.require_ports == other.require_ports
            && self.accepted_resource_roles == other.accepted_resource_roles
            && self.constraints == other.constraints
            && self.health_checks == other.health_checks
            && self.backoff_seconds == other.backoff_seconds
            && self.backoff_factor == other.backoff_factor
            && self.max_launch_delay_seconds == other.max_launch_delay_seconds
            && self.upgrade_strategy == other.upgrade_strategy
            && self.dependencies == other.dependencies
            && self.artifact_urls == other.artifact_urls
    }

    fn executable_equal_modulo_ports(&self, other: &AppDefinition) -> bool {
        match (&self.executable, &other.executable) {
            (Executable::Cmd(a), Executable::Cmd(b)) => a == b,
            (Executable::Args(a), Executable::Args(b)) => a == b,
            (Executable::Container(a), Executable::Container(b)) => {
                a.engine == b.engine
                    && a.image == b.image
                    && a.volumes == b.volumes
                    && a.network_mode == b.network_mode
                    && a.parameters == b.parameters
                    && a.port_mappings.len() == b.port_mappings.len()
                    && a.port_mappings
                        .iter()
                        .zip(&b.port_mappings)
                        .all(|(pa, pb)| pa.container_port == pb.container_port && pa.protocol == pb.protocol)
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono::Utc;

    fn base_app(id: &str) -> AppDefinition {
        AppDefinition {
            id: PathId::parse_absolute(id).unwrap(),
            executable: Executable::Cmd("sleep 100".to_string()),
            instances: 1,
            cpus: 0.5,
            mem: 128.0,
            disk: 0.0,
            ports: vec![0],
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
            version: Utc.timestamp_opt(0, 0).unwrap(),
        }
    }

    #[test]
    fn test_validate_rejects_empty_cmd() {
        let mut app = base_app("/app1");
        app.executable = Executable::Cmd("   ".to_string());
        assert!(app.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_negative_resources() {
        let mut app = base_app("/app1");
        app.cpus = -1.0;
        assert!(app.validate().is_err());
    }

    #[test]
    fn test_canonically_equal_ignores_dynamic_ports_and_version() {
        let mut a = base_app("/app1");
        let mut b = base_app("/app1");
        a.version = Utc.timestamp_opt(0, 0).unwrap();
        b.version = Utc.timestamp_opt(1000, 0).unwrap();
        a.ports = vec![0];
        b.ports = vec![0];
        assert!(a.canonically_equal(&b));
    }

    #[test]
    fn test_canonically_equal_detects_literal_port_change() {
        let mut a = base_app("/app1");
        let mut b = base_app("/app1");
        a.ports = vec![80];
        b.ports = vec![81];
        assert!(!a.canonically_equal(&b));
    }

    #[test]
    fn test_resolved_dependencies() {
        let mut app = base_app("/group1/app1");
        app.dependencies = vec!["app2".to_string(), "/other/app3".to_string()];
        let resolved = app.resolved_dependencies().unwrap();
        assert_eq!(resolved[0].as_str(), "/group1/app2");
        assert_eq!(resolved[1].as_str(), "/other/app3");
    }

    #[test]
    fn test_all_declared_host_ports_includes_container_mappings() {
        let mut app = base_app("/app1");
        app.ports = vec![0];
        app.executable = Executable::Container(Container {
            engine: ContainerEngine::Docker,
            image: "nginx".to_string(),
            volumes: Vec::new(),
            network_mode: NetworkMode::Bridge,
            port_mappings: vec![PortMapping {
                container_port: 80,
                host_port: 0,
                protocol: "tcp".to_string(),
            }],
            parameters: Vec::new(),
        });
        assert_eq!(app.all_declared_host_ports(), vec![0, 0]);
        assert!(app.has_dynamic_ports());
    }
}
