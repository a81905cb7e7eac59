//! Engine-facing interfaces for Corral.
//!
//! This crate defines the collaborators Corral drives but does not implement:
//! the `EngineClient` trait (container CRUD, state, file probes, image
//! lookup, sandbox profiles, and the notification stream) and the
//! `NetworkAttacher` trait (CNI attach/reattach). `mock` provides recording
//! in-memory implementations of both.

pub mod engine;
pub mod mock;
pub mod network;

pub use engine::{EngineClient, EngineContainer, EngineState};
pub use network::NetworkAttacher;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("engine object not found: {0}")]
    NotFound(String),
    #[error("engine object already exists: {0}")]
    AlreadyExists(String),
    #[error("file '{path}' not found in container {container}")]
    FileNotFound { container: String, path: String },
    #[error("engine request failed: {0}")]
    Engine(String),
    #[error("network attach failed: {0}")]
    Network(String),
}

impl RuntimeError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RuntimeError::NotFound(_))
    }
}
