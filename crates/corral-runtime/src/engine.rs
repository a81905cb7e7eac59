use crate::RuntimeError;
use corral_schema::{ContainerRecord, EngineStatus, NetworkInterface, Sandbox};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::mpsc::Receiver;

/// Runtime state the engine reports for one container.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EngineState {
    pub status: EngineStatus,
    pub pid: i64,
    pub cpu_usage: u64,
    pub memory_usage: u64,
    /// Usage of the root disk.
    pub disk_usage: u64,
    #[serde(default)]
    pub network: BTreeMap<String, NetworkInterface>,
}

impl EngineState {
    pub fn with_status(status: EngineStatus) -> Self {
        Self {
            status,
            pid: 0,
            cpu_usage: 0,
            memory_usage: 0,
            disk_usage: 0,
            network: BTreeMap::new(),
        }
    }
}

/// A container object as listed by the engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EngineContainer {
    pub name: String,
    pub record: ContainerRecord,
}

/// Client for the backing container engine.
///
/// The engine only understands flat records; everything richer lives in
/// `corral_schema`. Sandboxes are stored by the engine as profiles and are
/// returned already decoded.
pub trait EngineClient: Send + Sync {
    fn name(&self) -> &str;

    /// Create container `name` from the image with the given fingerprint.
    fn create_container(
        &self,
        name: &str,
        record: &ContainerRecord,
        image_fingerprint: &str,
    ) -> Result<(), RuntimeError>;

    /// Replace the writable part (config, devices, profiles) of `name`.
    fn update_container(&self, name: &str, record: &ContainerRecord) -> Result<(), RuntimeError>;

    fn delete_container(&self, name: &str) -> Result<(), RuntimeError>;

    fn start_container(&self, name: &str) -> Result<(), RuntimeError>;

    fn stop_container(&self, name: &str) -> Result<(), RuntimeError>;

    fn get_container(&self, name: &str) -> Result<ContainerRecord, RuntimeError>;

    /// Every container the engine knows, managed or not.
    fn list_containers(&self) -> Result<Vec<EngineContainer>, RuntimeError>;

    fn container_state(&self, name: &str) -> Result<EngineState, RuntimeError>;

    /// Read a file inside the container. Used to probe whether a mount path
    /// is visible.
    fn get_file(&self, name: &str, path: &str) -> Result<Vec<u8>, RuntimeError>;

    /// Resolve an image alias or hash to a local fingerprint. `None` when the
    /// image is not available locally.
    fn image_fingerprint(&self, reference: &str) -> Result<Option<String>, RuntimeError>;

    fn get_sandbox(&self, id: &str) -> Result<Sandbox, RuntimeError>;

    fn save_sandbox(&self, sandbox: &Sandbox) -> Result<(), RuntimeError>;

    /// Subscribe to engine notifications. Each item is one raw notification
    /// object (`{"type": ..., "metadata": ...}`). The stream ends when the
    /// sender side is dropped.
    fn subscribe(&self) -> Result<Receiver<serde_json::Value>, RuntimeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_state_json_shape() {
        let state = EngineState::with_status(EngineStatus::Running);
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["status"], "running");
        assert_eq!(json["pid"], 0);
        let back: EngineState = serde_json::from_value(json).unwrap();
        assert_eq!(back, state);
    }
}
