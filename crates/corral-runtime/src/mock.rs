//! In-memory engine and network attacher that record every call.

use crate::engine::{EngineClient, EngineContainer, EngineState};
use crate::network::NetworkAttacher;
use crate::RuntimeError;
use corral_schema::device::devices_of;
use corral_schema::{ContainerRecord, Disk, EngineStatus, NetworkInterface, Sandbox};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Mutex, MutexGuard};

/// Pid reported for running mock containers.
pub const MOCK_PID: i64 = 4242;

/// Engine-owned key rewritten on every start and stop.
pub const POWER_STATE_KEY: &str = "volatile.last_state.power";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "call", rename_all = "snake_case")]
pub enum EngineCall {
    Create { name: String, fingerprint: String },
    /// `disks` lists the mount paths of the disk devices in the update.
    Update { name: String, disks: Vec<String> },
    Delete { name: String },
    Start { name: String },
    Stop { name: String },
    Get { name: String },
    List,
    State { name: String },
    GetFile { name: String, path: String },
    ImageLookup { reference: String },
    GetSandbox { id: String },
    SaveSandbox { id: String },
    Subscribe,
}

struct MockContainer {
    record: ContainerRecord,
    state: EngineState,
    /// Disk paths whose mount is currently broken.
    unmounted: BTreeSet<String>,
}

#[derive(Default)]
struct MockState {
    containers: BTreeMap<String, MockContainer>,
    sandboxes: BTreeMap<String, Sandbox>,
    images: BTreeMap<String, String>,
    calls: Vec<EngineCall>,
    subscribers: Vec<Sender<serde_json::Value>>,
}

/// Engine double. Updates behave like a real engine re-applying devices: a
/// disk removed by an update becomes invisible, a disk (re)added is mounted.
#[derive(Default)]
pub struct MockEngine {
    state: Mutex<MockState>,
}

fn disk_paths(record: &ContainerRecord) -> Vec<String> {
    devices_of::<Disk>(&record.devices)
        .unwrap_or_default()
        .into_iter()
        .map(|d| d.path)
        .collect()
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MockState>, RuntimeError> {
        self.state
            .lock()
            .map_err(|e| RuntimeError::Engine(format!("mutex poisoned: {e}")))
    }

    fn with<T>(&self, f: impl FnOnce(&mut MockState) -> T) -> T {
        let mut guard = match self.state.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    pub fn add_image(&self, reference: &str, fingerprint: &str) {
        self.with(|s| {
            s.images.insert(reference.to_owned(), fingerprint.to_owned());
        });
    }

    pub fn add_sandbox(&self, sandbox: Sandbox) {
        self.with(|s| {
            s.sandboxes.insert(sandbox.id.to_string(), sandbox);
        });
    }

    /// Insert a raw object, bypassing `create_container`.
    pub fn insert_container(&self, name: &str, record: ContainerRecord, status: EngineStatus) {
        self.with(|s| {
            s.containers.insert(
                name.to_owned(),
                MockContainer {
                    record,
                    state: EngineState::with_status(status),
                    unmounted: BTreeSet::new(),
                },
            );
        });
        self.set_status(name, status);
    }

    pub fn set_status(&self, name: &str, status: EngineStatus) {
        self.with(|s| {
            if let Some(c) = s.containers.get_mut(name) {
                c.state.status = status;
                c.state.pid = if status == EngineStatus::Running {
                    MOCK_PID
                } else {
                    0
                };
            }
        });
    }

    pub fn set_network(&self, name: &str, iface: &str, info: NetworkInterface) {
        self.with(|s| {
            if let Some(c) = s.containers.get_mut(name) {
                c.state.network.insert(iface.to_owned(), info);
            }
        });
    }

    /// Break the mount at `path` until the disk is re-applied by an update.
    pub fn break_mount(&self, name: &str, path: &str) {
        self.with(|s| {
            if let Some(c) = s.containers.get_mut(name) {
                c.unmounted.insert(path.to_owned());
            }
        });
    }

    /// Stored record, without recording a call.
    pub fn record(&self, name: &str) -> Option<ContainerRecord> {
        self.with(|s| s.containers.get(name).map(|c| c.record.clone()))
    }

    /// Stored sandbox, without recording a call.
    pub fn sandbox(&self, id: &str) -> Option<Sandbox> {
        self.with(|s| s.sandboxes.get(id).cloned())
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.with(|s| s.calls.clone())
    }

    /// Calls that write to the engine.
    pub fn writes(&self) -> Vec<EngineCall> {
        self.calls()
            .into_iter()
            .filter(|c| {
                matches!(
                    c,
                    EngineCall::Create { .. }
                        | EngineCall::Update { .. }
                        | EngineCall::Delete { .. }
                        | EngineCall::SaveSandbox { .. }
                )
            })
            .collect()
    }

    pub fn clear_calls(&self) {
        self.with(|s| s.calls.clear());
    }

    /// Deliver a notification to every live subscriber.
    pub fn emit(&self, event: &serde_json::Value) {
        self.with(|s| {
            s.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        });
    }

    /// Drop every subscription sender, ending the streams.
    pub fn close_subscriptions(&self) {
        self.with(|s| s.subscribers.clear());
    }
}

impl EngineClient for MockEngine {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn create_container(
        &self,
        name: &str,
        record: &ContainerRecord,
        image_fingerprint: &str,
    ) -> Result<(), RuntimeError> {
        let mut s = self.lock()?;
        s.calls.push(EngineCall::Create {
            name: name.to_owned(),
            fingerprint: image_fingerprint.to_owned(),
        });
        if s.containers.contains_key(name) {
            return Err(RuntimeError::AlreadyExists(name.to_owned()));
        }
        s.containers.insert(
            name.to_owned(),
            MockContainer {
                record: record.clone(),
                state: EngineState::with_status(EngineStatus::Stopped),
                unmounted: BTreeSet::new(),
            },
        );
        Ok(())
    }

    fn update_container(&self, name: &str, record: &ContainerRecord) -> Result<(), RuntimeError> {
        let mut s = self.lock()?;
        let new_disks = disk_paths(record);
        s.calls.push(EngineCall::Update {
            name: name.to_owned(),
            disks: new_disks.clone(),
        });
        let c = s
            .containers
            .get_mut(name)
            .ok_or_else(|| RuntimeError::NotFound(name.to_owned()))?;

        let old_disks = disk_paths(&c.record);
        for path in &old_disks {
            if !new_disks.contains(path) {
                c.unmounted.insert(path.clone());
            }
        }
        for path in &new_disks {
            if !old_disks.contains(path) {
                c.unmounted.remove(path);
            }
        }
        c.record = record.clone();
        Ok(())
    }

    fn delete_container(&self, name: &str) -> Result<(), RuntimeError> {
        let mut s = self.lock()?;
        s.calls.push(EngineCall::Delete {
            name: name.to_owned(),
        });
        s.containers
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| RuntimeError::NotFound(name.to_owned()))
    }

    fn start_container(&self, name: &str) -> Result<(), RuntimeError> {
        let mut s = self.lock()?;
        s.calls.push(EngineCall::Start {
            name: name.to_owned(),
        });
        let c = s
            .containers
            .get_mut(name)
            .ok_or_else(|| RuntimeError::NotFound(name.to_owned()))?;
        c.state.status = EngineStatus::Running;
        c.state.pid = MOCK_PID;
        c.record
            .config
            .insert(POWER_STATE_KEY.to_owned(), "RUNNING".to_owned());
        Ok(())
    }

    fn stop_container(&self, name: &str) -> Result<(), RuntimeError> {
        let mut s = self.lock()?;
        s.calls.push(EngineCall::Stop {
            name: name.to_owned(),
        });
        let c = s
            .containers
            .get_mut(name)
            .ok_or_else(|| RuntimeError::NotFound(name.to_owned()))?;
        c.state.status = EngineStatus::Stopped;
        c.state.pid = 0;
        c.record
            .config
            .insert(POWER_STATE_KEY.to_owned(), "STOPPED".to_owned());
        Ok(())
    }

    fn get_container(&self, name: &str) -> Result<ContainerRecord, RuntimeError> {
        let mut s = self.lock()?;
        s.calls.push(EngineCall::Get {
            name: name.to_owned(),
        });
        s.containers
            .get(name)
            .map(|c| c.record.clone())
            .ok_or_else(|| RuntimeError::NotFound(name.to_owned()))
    }

    fn list_containers(&self) -> Result<Vec<EngineContainer>, RuntimeError> {
        let mut s = self.lock()?;
        s.calls.push(EngineCall::List);
        Ok(s.containers
            .iter()
            .map(|(name, c)| EngineContainer {
                name: name.clone(),
                record: c.record.clone(),
            })
            .collect())
    }

    fn container_state(&self, name: &str) -> Result<EngineState, RuntimeError> {
        let mut s = self.lock()?;
        s.calls.push(EngineCall::State {
            name: name.to_owned(),
        });
        s.containers
            .get(name)
            .map(|c| c.state.clone())
            .ok_or_else(|| RuntimeError::NotFound(name.to_owned()))
    }

    fn get_file(&self, name: &str, path: &str) -> Result<Vec<u8>, RuntimeError> {
        let mut s = self.lock()?;
        s.calls.push(EngineCall::GetFile {
            name: name.to_owned(),
            path: path.to_owned(),
        });
        let c = s
            .containers
            .get(name)
            .ok_or_else(|| RuntimeError::NotFound(name.to_owned()))?;
        if c.unmounted.contains(path) {
            return Err(RuntimeError::FileNotFound {
                container: name.to_owned(),
                path: path.to_owned(),
            });
        }
        Ok(Vec::new())
    }

    fn image_fingerprint(&self, reference: &str) -> Result<Option<String>, RuntimeError> {
        let mut s = self.lock()?;
        s.calls.push(EngineCall::ImageLookup {
            reference: reference.to_owned(),
        });
        if let Some(fp) = s.images.get(reference) {
            return Ok(Some(fp.clone()));
        }
        Ok(s.images.values().find(|fp| *fp == reference).cloned())
    }

    fn get_sandbox(&self, id: &str) -> Result<Sandbox, RuntimeError> {
        let mut s = self.lock()?;
        s.calls.push(EngineCall::GetSandbox { id: id.to_owned() });
        s.sandboxes
            .get(id)
            .cloned()
            .ok_or_else(|| RuntimeError::NotFound(format!("sandbox {id}")))
    }

    fn save_sandbox(&self, sandbox: &Sandbox) -> Result<(), RuntimeError> {
        let mut s = self.lock()?;
        s.calls.push(EngineCall::SaveSandbox {
            id: sandbox.id.to_string(),
        });
        s.sandboxes.insert(sandbox.id.to_string(), sandbox.clone());
        Ok(())
    }

    fn subscribe(&self) -> Result<Receiver<serde_json::Value>, RuntimeError> {
        let mut s = self.lock()?;
        s.calls.push(EngineCall::Subscribe);
        let (tx, rx) = channel();
        s.subscribers.push(tx);
        Ok(rx)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "call", rename_all = "snake_case")]
pub enum AttachCall {
    Attach {
        namespace: String,
        sandbox: String,
        container: String,
        pid: i64,
    },
    Reattach {
        namespace: String,
        sandbox: String,
        container: String,
        pid: i64,
        stored: String,
    },
}

/// Network attacher double returning a fixed result.
pub struct MockAttacher {
    result: String,
    fail: bool,
    calls: Mutex<Vec<AttachCall>>,
}

impl Default for MockAttacher {
    fn default() -> Self {
        Self {
            result: r#"{"interfaces":[{"name":"eth0"}],"ips":[{"address":"10.22.0.5/16"}]}"#
                .to_owned(),
            fail: false,
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl MockAttacher {
    pub fn new() -> Self {
        Self::default()
    }

    /// An attacher whose attach and reattach always fail.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn result(&self) -> &str {
        &self.result
    }

    pub fn calls(&self) -> Vec<AttachCall> {
        match self.calls.lock() {
            Ok(c) => c.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn push(&self, call: AttachCall) -> Result<(), RuntimeError> {
        self.calls
            .lock()
            .map_err(|e| RuntimeError::Network(format!("mutex poisoned: {e}")))?
            .push(call);
        if self.fail {
            return Err(RuntimeError::Network("mock attach failure".to_owned()));
        }
        Ok(())
    }
}

impl NetworkAttacher for MockAttacher {
    fn attach(
        &self,
        namespace: &str,
        sandbox_name: &str,
        container_id: &str,
        pid: i64,
    ) -> Result<String, RuntimeError> {
        self.push(AttachCall::Attach {
            namespace: namespace.to_owned(),
            sandbox: sandbox_name.to_owned(),
            container: container_id.to_owned(),
            pid,
        })?;
        Ok(self.result.clone())
    }

    fn reattach(
        &self,
        namespace: &str,
        sandbox_name: &str,
        container_id: &str,
        pid: i64,
        stored_result: &str,
    ) -> Result<(), RuntimeError> {
        self.push(AttachCall::Reattach {
            namespace: namespace.to_owned(),
            sandbox: sandbox_name.to_owned(),
            container: container_id.to_owned(),
            pid,
            stored: stored_result.to_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corral_schema::device::{add_devices, DeviceMap};

    fn record_with_disks(paths: &[&str]) -> ContainerRecord {
        let disks: Vec<Disk> = paths
            .iter()
            .map(|p| Disk {
                path: (*p).to_owned(),
                source: format!("/srv{p}"),
                ..Disk::default()
            })
            .collect();
        let mut devices = DeviceMap::new();
        add_devices(&mut devices, &disks).unwrap();
        ContainerRecord {
            devices,
            ..ContainerRecord::default()
        }
    }

    #[test]
    fn mock_lifecycle() {
        let engine = MockEngine::new();
        engine
            .create_container("c1", &ContainerRecord::default(), "fp")
            .unwrap();
        assert_eq!(
            engine.container_state("c1").unwrap().status,
            EngineStatus::Stopped
        );

        engine.start_container("c1").unwrap();
        let state = engine.container_state("c1").unwrap();
        assert_eq!(state.status, EngineStatus::Running);
        assert_eq!(state.pid, MOCK_PID);
        assert_eq!(
            engine.record("c1").unwrap().config[POWER_STATE_KEY],
            "RUNNING"
        );

        assert!(engine
            .create_container("c1", &ContainerRecord::default(), "fp")
            .is_err());

        engine.stop_container("c1").unwrap();
        engine.delete_container("c1").unwrap();
        assert!(engine.get_container("c1").is_err());
    }

    #[test]
    fn detach_then_reattach_remounts_disk() {
        let engine = MockEngine::new();
        engine.insert_container(
            "c1",
            record_with_disks(&["/a", "/b"]),
            EngineStatus::Running,
        );
        engine.break_mount("c1", "/b");
        assert!(engine.get_file("c1", "/b").is_err());

        // Re-applying an unchanged device set does not remount.
        engine
            .update_container("c1", &record_with_disks(&["/a", "/b"]))
            .unwrap();
        assert!(engine.get_file("c1", "/b").is_err());

        engine
            .update_container("c1", &record_with_disks(&["/a"]))
            .unwrap();
        engine
            .update_container("c1", &record_with_disks(&["/a", "/b"]))
            .unwrap();
        assert!(engine.get_file("c1", "/b").is_ok());
        assert!(engine.get_file("c1", "/a").is_ok());
    }

    #[test]
    fn subscribers_receive_emitted_events() {
        let engine = MockEngine::new();
        let rx = engine.subscribe().unwrap();
        engine.emit(&serde_json::json!({"type": "logging"}));
        assert_eq!(rx.recv().unwrap()["type"], "logging");
        engine.close_subscriptions();
        assert!(rx.recv().is_err());
    }

    #[test]
    fn images_resolve_by_alias_or_fingerprint() {
        let engine = MockEngine::new();
        engine.add_image("ubuntu:22.04", "f00d");
        assert_eq!(
            engine.image_fingerprint("ubuntu:22.04").unwrap().as_deref(),
            Some("f00d")
        );
        assert_eq!(
            engine.image_fingerprint("f00d").unwrap().as_deref(),
            Some("f00d")
        );
        assert_eq!(engine.image_fingerprint("alpine").unwrap(), None);
    }

    #[test]
    fn attacher_records_calls() {
        let attacher = MockAttacher::new();
        let result = attacher.attach("ns", "pod", "c1", 7).unwrap();
        attacher.reattach("ns", "pod", "c1", 8, &result).unwrap();
        let calls = attacher.calls();
        assert_eq!(calls.len(), 2);
        assert!(matches!(calls[0], AttachCall::Attach { pid: 7, .. }));
        assert!(matches!(calls[1], AttachCall::Reattach { ref stored, .. } if *stored == result));

        let failing = MockAttacher::failing();
        assert!(failing.attach("ns", "pod", "c1", 7).is_err());
        assert_eq!(failing.calls().len(), 1);
    }
}
