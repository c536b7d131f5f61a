//! Engine-wide configuration, trimmed from the teacher's `io_models::context`
//! style plain config structs down to the knobs spec.md actually names:
//! the dynamic service-port range (§4.1), staged-task kill timeout and
//! key-value store RPC timeout (§5 "Timeouts"), and the default
//! `acceptedResourceRoles` behavior (§4.3).

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// §4.1: dynamic service ports are assigned from `[local_port_min, local_port_max]`.
    pub local_port_min: u16,
    pub local_port_max: u16,

    /// §4.4 / §5: staged-task kill timeout (`taskLaunchTimeout`).
    #[serde(with = "duration_seconds")]
    pub task_launch_timeout: Duration,

    /// §5: key-value store RPC timeout (`zkTimeoutDuration`).
    #[serde(with = "duration_seconds")]
    pub store_timeout: Duration,

    /// §4.3: when true (the default), an app with unset `acceptedResourceRoles`
    /// only matches and consumes resources tagged with the `"*"` role; when
    /// false, unset means any role is accepted. Consulted by
    /// `matcher::try_match` via `CoreConfig`, never by the app definition
    /// itself.
    pub default_accepted_roles_is_star_only: bool,
}

impl Default for CoreConfig {
    fn default() -> Self {
        CoreConfig {
            local_port_min: 10000,
            local_port_max: 20000,
            task_launch_timeout: Duration::from_secs(300),
            store_timeout: Duration::from_secs(10),
            default_accepted_roles_is_star_only: true,
        }
    }
}

mod duration_seconds {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_round_trips_through_yaml() {
        // setup:
        let config = CoreConfig::default();

        // execute:
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: CoreConfig = serde_yaml::from_str(&yaml).unwrap();

        // verify:
        assert_eq!(parsed.local_port_min, config.local_port_min);
        assert_eq!(parsed.task_launch_timeout, config.task_launch_timeout);
    }
}
