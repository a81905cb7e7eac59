//! Container model and engine encoding for Corral.
//!
//! This crate defines the schema layer: the `Container`/`Sandbox` domain model,
//! the registry of config keys Corral reserves in the engine's flat key/value
//! configuration (`KeyRegistry`), the record codec (`encode`/`decode`), the
//! device aggregation rules, logical state derivation (`derive_state`), and
//! deterministic container id derivation (`create_id`). Nothing here performs
//! I/O.

pub mod codec;
pub mod device;
pub mod identity;
pub mod keys;
pub mod model;
pub mod state;
pub mod types;

pub use codec::{decode, encode, ContainerRecord, DecodedRecord, DEFAULT_PROFILE};
pub use device::{Block, Device, DeviceMap, DeviceProperties, Disk, Nic, Proxy};
pub use identity::{create_id, IdentityTuple};
pub use keys::{ConfigKey, ConfigMap, KeyRegistry, Namespace, PrefixRule, SCHEMA_VERSION};
pub use model::{
    Container, ContainerMetadata, ContainerState, ContainerStats, InterfaceAddress,
    NetworkConfig, NetworkInterface, NetworkMode, Sandbox, SandboxMetadata,
};
pub use state::{derive_state, EngineStatus, CREATED_MARKER};
pub use types::{ContainerId, SandboxId};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("container {id} is not in schema version {expected}, got '{found}'")]
    SchemaMismatch {
        id: String,
        expected: String,
        found: String,
    },
    #[error("invalid value '{value}' for '{key}': {reason}")]
    InvalidField {
        key: String,
        value: String,
        reason: String,
    },
    #[error("device name '{0}' is used by more than one device")]
    DeviceCollision(String),
    #[error("key registry overlap: {0}")]
    RegistryOverlap(String),
}
