#[macro_use]
extern crate tracing;

pub mod artifact;
pub mod clock;
pub mod config;
pub mod deploy;
pub mod driver;
pub mod errors;
pub mod events;
pub mod health;
pub mod id;
pub mod matcher;
pub mod model;
pub mod offer;
pub mod ports;
pub mod queue;
pub mod repository;
pub mod scheduler;
pub mod store;
pub mod task;
pub mod tracker;

pub use errors::CoreError;
pub use id::PathId;

/// Installs a `tracing-subscriber` pipeline reading filter directives from
/// `RUST_LOG` (teacher's `logger.rs` init convention, generalized from a
/// fixed stdout logger to an env-filtered one since this crate has no
/// single host binary to hardcode a destination for).
pub fn install_default_subscriber() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).json().try_init();
}
