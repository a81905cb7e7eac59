//! Container management core for Corral.
//!
//! This crate ties the schema codec and an engine client together into the
//! `Manager` (container CRUD with validation, identity and state derivation),
//! and runs the background machinery around it: the periodic task scheduler
//! (`monitor`), the volume remount reconciler (`volumes`) and the engine
//! lifecycle event dispatcher (`events`). `Corral` wires all of them from a
//! `CorralConfig`.

pub mod concurrency;
pub mod config;
pub mod events;
pub mod manager;
pub mod monitor;
pub mod service;
pub mod volumes;

pub use concurrency::{install_signal_handler, shutdown_requested, InFlight, InFlightGuard};
pub use config::CorralConfig;
pub use events::{EventOutcome, EventService, LifecycleDispatcher, NetworkOutcome};
pub use manager::Manager;
pub use monitor::{
    Monitor, MonitorHandle, MonitorInbox, MonitorService, MonitorTask, SweepReport, TaskHandler,
    TaskKind, VOLUMES_TASK,
};
pub use service::Corral;
pub use volumes::{RemountOutcome, Sleeper, ThreadSleeper, VolumeReconciler};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("schema error: {0}")]
    Schema(#[from] corral_schema::SchemaError),
    #[error("runtime error: {0}")]
    Runtime(#[from] corral_runtime::RuntimeError),
    #[error("invalid container: {0}")]
    Validation(String),
    #[error("container not found: {0}")]
    NotFound(String),
    #[error("image not found: {0}")]
    ImageNotFound(String),
    #[error("config error: {0}")]
    Config(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
