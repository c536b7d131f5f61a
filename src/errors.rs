//! Error taxonomy (spec.md §7). Names are contractual: callers and tests
//! match on variants, not message text.
//!
//! Grounded on the teacher's `src/errors/mod.rs` (`thiserror`-based
//! `EngineError`), trimmed down: this core has a single flat error enum
//! rather than the teacher's per-cloud-provider proliferation, since
//! spec.md §7 already enumerates a flat list of kinds.

use crate::id::PathId;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum CoreError {
    #[error("validation failed: {0}")]
    ValidationFailed(String),

    #[error("unknown app: {0}")]
    UnknownApp(PathId),

    #[error("unknown group: {0}")]
    UnknownGroup(PathId),

    #[error("unknown deployment: {0}")]
    UnknownDeployment(Uuid),

    #[error("app(s) locked by deployment(s): {0:?}")]
    AppLocked(Vec<Uuid>),

    #[error("conflicting change: {0}")]
    ConflictingChange(String),

    #[error("port range [{min}, {max}] exhausted")]
    PortRangeExhausted { min: u16, max: u16 },

    #[error("key-value store operation timed out")]
    StoreTimeout,

    #[error("key-value store unavailable: {0}")]
    StoreUnavailable(String),

    /// Fatal: the process should abdicate leadership (§7, §4.8 `error`).
    #[error("resource master driver error: {0}")]
    DriverError(String),

    #[error("failed to resolve artifact: {0}")]
    ResolveArtifactFailed(String),
}

impl CoreError {
    /// §7: "driver `error` is fatal" — this flags the variants that should
    /// cause the host process to expunge its framework id and exit so a new
    /// leader registers fresh (§4.8 `disconnected / error`). The core cannot
    /// itself call `process::exit` (that's a host/CLI concern per §1); it
    /// only classifies.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CoreError::DriverError(_))
    }

    /// §7: "Transient store and driver RPC errors are retried with bounded
    /// exponential backoff before promotion to fatal."
    pub fn is_transient(&self) -> bool {
        matches!(self, CoreError::StoreTimeout | CoreError::StoreUnavailable(_))
    }
}

/// Signal raised when a `CoreError::is_fatal()` condition is observed by the
/// scheduler loop; the host process is expected to act on it (§4.8, §7).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessAbdication {
    pub reason: String,
}

impl std::fmt::Display for ProcessAbdication {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "abdicating leadership: {}", self.reason)
    }
}

/// Bounded exponential backoff retry for transient store/driver RPC errors,
/// matching §7's "retried with bounded exponential backoff before promotion
/// to fatal" and the teacher's use of the `retry` crate around cloud RPCs.
pub fn retry_policy() -> impl Iterator<Item = std::time::Duration> {
    retry::delay::Exponential::from_millis(50).map(|d| d.min(std::time::Duration::from_secs(5))).take(5)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_error_is_fatal() {
        assert!(CoreError::DriverError("boom".into()).is_fatal());
        assert!(!CoreError::ValidationFailed("x".into()).is_fatal());
    }

    #[test]
    fn test_store_errors_are_transient() {
        assert!(CoreError::StoreTimeout.is_transient());
        assert!(CoreError::StoreUnavailable("down".into()).is_transient());
        assert!(!CoreError::DriverError("x".into()).is_transient());
    }

    #[test]
    fn test_retry_policy_is_bounded() {
        let delays: Vec<_> = retry_policy().collect();
        assert_eq!(delays.len(), 5);
        assert!(delays.iter().all(|d| *d <= std::time::Duration::from_secs(5)));
    }
}
