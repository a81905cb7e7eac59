use crate::monitor::{MonitorHandle, MonitorTask, VOLUMES_TASK};
use crate::CoreError;
use chrono::Utc;
use corral_runtime::{EngineClient, RuntimeError};
use corral_schema::{
    create_id, decode, derive_state, encode, Container, ContainerId, ContainerRecord,
    ContainerState, ContainerStats, IdentityTuple, Namespace, NetworkMode, Sandbox,
    CREATED_MARKER,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Container CRUD on top of an [`EngineClient`].
///
/// Every container written through the manager carries the managed marker;
/// objects without it are invisible to `get_container` and
/// `list_containers`.
pub struct Manager {
    engine: Arc<dyn EngineClient>,
    monitor: MonitorHandle,
    owner_tag: String,
}

fn engine_error(id: &str, e: RuntimeError) -> CoreError {
    if e.is_not_found() {
        CoreError::NotFound(id.to_owned())
    } else {
        CoreError::Runtime(e)
    }
}

impl Manager {
    pub fn new(
        engine: Arc<dyn EngineClient>,
        monitor: MonitorHandle,
        owner_tag: impl Into<String>,
    ) -> Self {
        Self {
            engine,
            monitor,
            owner_tag: owner_tag.into(),
        }
    }

    pub fn engine(&self) -> &Arc<dyn EngineClient> {
        &self.engine
    }

    pub fn monitor(&self) -> &MonitorHandle {
        &self.monitor
    }

    /// Reject containers the engine cannot run as described.
    pub fn validate(container: &Container) -> Result<(), CoreError> {
        if container.metadata.name.is_empty() {
            return Err(CoreError::Validation("container name must not be empty".to_owned()));
        }
        let sandbox = container
            .sandbox
            .as_ref()
            .ok_or_else(|| CoreError::Validation("container must belong to a sandbox".to_owned()))?;
        if sandbox.network.mode == NetworkMode::Host && !container.privileged {
            return Err(CoreError::Validation(
                "host networking can only be used together with a privileged container"
                    .to_owned(),
            ));
        }
        Ok(())
    }

    /// Persist a new container and assign its id.
    ///
    /// Nothing is written to the engine when validation fails.
    pub fn create_container(&self, container: &mut Container) -> Result<ContainerId, CoreError> {
        Self::validate(container)?;
        container.id = None;
        container.state = ContainerState::Created;
        container.created_at = Some(Utc::now());
        container.started_at = None;
        self.save_container(container, None)?;
        let id = container
            .id
            .clone()
            .ok_or_else(|| CoreError::Validation("container id was not assigned".to_owned()))?;
        info!("created container {id} ({})", container.metadata.name);
        Ok(id)
    }

    /// Rewrite an existing container's record.
    ///
    /// The state marker and engine-owned keys are carried over from the stored
    /// record; the caller's `state` is ignored.
    pub fn update_container(&self, container: &mut Container) -> Result<(), CoreError> {
        Self::validate(container)?;
        let Some(id) = container.id.clone() else {
            return Err(CoreError::Validation(
                "cannot update a container that was never created".to_owned(),
            ));
        };
        let stored = self.managed_record(&id)?;
        self.save_container(container, Some(&stored))
    }

    /// Write `container`, creating it when `stored` is `None`.
    fn save_container(
        &self,
        container: &mut Container,
        stored: Option<&ContainerRecord>,
    ) -> Result<(), CoreError> {
        let fingerprint = self
            .engine
            .image_fingerprint(&container.image)?
            .ok_or_else(|| CoreError::ImageNotFound(container.image.clone()))?;
        let record = match stored {
            None => encode(container, Some(CREATED_MARKER))?,
            Some(stored) => {
                let mut record = encode(container, stored.state_marker())?;
                let engine_owned = Namespace::Volatile.rule();
                for (key, value) in &stored.config {
                    if engine_owned.matches(key) {
                        record
                            .config
                            .entry(key.clone())
                            .or_insert_with(|| value.clone());
                    }
                }
                record
            }
        };

        match &container.id {
            Some(id) => {
                debug!("updating container {id}");
                self.engine
                    .update_container(id, &record)
                    .map_err(|e| engine_error(id, e))?;
            }
            None => {
                let sandbox = container.sandbox.as_ref().ok_or_else(|| {
                    CoreError::Validation("container must belong to a sandbox".to_owned())
                })?;
                let id = create_id(&IdentityTuple {
                    owner_tag: &self.owner_tag,
                    container_name: &container.metadata.name,
                    sandbox_name: &sandbox.metadata.name,
                    sandbox_namespace: &sandbox.metadata.namespace,
                    sandbox_attempt: sandbox.metadata.attempt,
                    sandbox_uid: &sandbox.metadata.uid,
                });
                debug!("creating container {id} from image {fingerprint}");
                self.engine.create_container(&id, &record, &fingerprint)?;
                container.id = Some(id);
            }
        }
        Ok(())
    }

    fn managed_record(&self, id: &str) -> Result<ContainerRecord, CoreError> {
        let record = self
            .engine
            .get_container(id)
            .map_err(|e| engine_error(id, e))?;
        if !record.is_managed()? {
            return Err(CoreError::NotFound(id.to_owned()));
        }
        Ok(record)
    }

    /// Start a container, stamp its start time and schedule a one-shot
    /// volume check.
    pub fn start_container(&self, id: &str) -> Result<(), CoreError> {
        self.managed_record(id)?;
        self.engine
            .start_container(id)
            .map_err(|e| engine_error(id, e))?;

        // The engine rewrites part of the config while starting.
        let mut record = self.managed_record(id)?;
        record.mark_started(Utc::now());
        self.engine
            .update_container(id, &record)
            .map_err(|e| engine_error(id, e))?;

        let container = self.get_container(id)?;
        self.monitor
            .enqueue(MonitorTask::once(container, VOLUMES_TASK));
        info!("started container {id}");
        Ok(())
    }

    pub fn stop_container(&self, id: &str) -> Result<(), CoreError> {
        self.managed_record(id)?;
        self.engine
            .stop_container(id)
            .map_err(|e| engine_error(id, e))?;
        info!("stopped container {id}");
        Ok(())
    }

    pub fn delete_container(&self, id: &str) -> Result<(), CoreError> {
        self.managed_record(id)?;
        self.engine
            .delete_container(id)
            .map_err(|e| engine_error(id, e))?;
        info!("deleted container {id}");
        Ok(())
    }

    /// Load a managed container together with its engine state and sandbox.
    pub fn get_container(&self, id: &str) -> Result<Container, CoreError> {
        let record = self.managed_record(id)?;
        self.to_container(id, &record)
    }

    /// Every managed container the engine knows.
    pub fn list_containers(&self) -> Result<Vec<Container>, CoreError> {
        let mut containers = Vec::new();
        for object in self.engine.list_containers()? {
            match object.record.is_managed() {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    warn!("skipping container {}: {e}", object.name);
                    continue;
                }
            }
            containers.push(self.to_container(&object.name, &object.record)?);
        }
        Ok(containers)
    }

    pub fn get_sandbox(&self, id: &str) -> Result<Sandbox, CoreError> {
        self.engine.get_sandbox(id).map_err(|e| engine_error(id, e))
    }

    pub fn save_sandbox(&self, sandbox: &Sandbox) -> Result<(), CoreError> {
        self.engine.save_sandbox(sandbox)?;
        Ok(())
    }

    fn to_container(&self, name: &str, record: &ContainerRecord) -> Result<Container, CoreError> {
        let decoded = decode(name, record)?;
        let state = self
            .engine
            .container_state(name)
            .map_err(|e| engine_error(name, e))?;

        let mut container = decoded.container;
        container.state = derive_state(state.status, decoded.state_marker.as_deref());
        container.pid = state.pid;
        container.stats = ContainerStats {
            memory_usage: state.memory_usage,
            cpu_usage: state.cpu_usage,
            filesystem_usage: state.disk_usage,
        };
        container.network = state.network;

        let sandbox_id = decoded.sandbox_id.ok_or_else(|| {
            CoreError::Validation(format!("container {name} has no sandbox profile"))
        })?;
        container.sandbox = Some(self.get_sandbox(&sandbox_id)?);
        Ok(container)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor;
    use corral_runtime::mock::{EngineCall, MockEngine};
    use corral_schema::{
        ContainerMetadata, EngineStatus, NetworkConfig, SandboxId, SandboxMetadata,
    };

    fn sandbox(mode: NetworkMode) -> Sandbox {
        Sandbox {
            id: SandboxId::new("sb1"),
            metadata: SandboxMetadata {
                name: "web".to_owned(),
                namespace: "default".to_owned(),
                attempt: 0,
                uid: "uid-1".to_owned(),
            },
            network: NetworkConfig {
                mode,
                ..NetworkConfig::default()
            },
        }
    }

    fn container() -> Container {
        Container {
            metadata: ContainerMetadata {
                name: "nginx".to_owned(),
                attempt: 0,
            },
            image: "nginx:latest".to_owned(),
            sandbox: Some(sandbox(NetworkMode::Bridged)),
            ..Container::default()
        }
    }

    fn setup() -> (Arc<MockEngine>, Manager, monitor::MonitorInbox) {
        let engine = Arc::new(MockEngine::new());
        engine.add_image("nginx:latest", "abc123");
        engine.add_sandbox(sandbox(NetworkMode::Bridged));
        let (handle, inbox) = monitor::channel();
        let manager = Manager::new(engine.clone(), handle, "k8s");
        (engine, manager, inbox)
    }

    #[test]
    fn create_then_get() {
        let (engine, manager, _inbox) = setup();
        let mut c = container();
        let id = manager.create_container(&mut c).unwrap();
        assert!(id.starts_with('n'));
        assert_eq!(id.len(), 16);
        assert_eq!(c.id.as_ref(), Some(&id));
        assert!(matches!(
            engine.writes()[0],
            EngineCall::Create { ref fingerprint, .. } if fingerprint == "abc123"
        ));

        let loaded = manager.get_container(&id).unwrap();
        assert_eq!(loaded.state, ContainerState::Created);
        assert_eq!(loaded.metadata.name, "nginx");
        assert_eq!(loaded.sandbox.unwrap().metadata.name, "web");
        assert!(loaded.created_at.is_some());
        assert!(loaded.started_at.is_none());
    }

    #[test]
    fn same_identity_yields_same_id() {
        let (_engine, manager, _inbox) = setup();
        let mut a = container();
        let id = manager.create_container(&mut a).unwrap();
        let mut b = container();
        assert!(manager.create_container(&mut b).is_err());
        assert_eq!(b.id, None);
        let expected = create_id(&IdentityTuple {
            owner_tag: "k8s",
            container_name: "nginx",
            sandbox_name: "web",
            sandbox_namespace: "default",
            sandbox_attempt: 0,
            sandbox_uid: "uid-1",
        });
        assert_eq!(id, expected);
    }

    #[test]
    fn missing_image_is_reported() {
        let (engine, manager, _inbox) = setup();
        let mut c = container();
        c.image = "alpine".to_owned();
        assert!(matches!(
            manager.create_container(&mut c),
            Err(CoreError::ImageNotFound(ref i)) if i == "alpine"
        ));
        assert!(engine.writes().is_empty());
    }

    #[test]
    fn missing_sandbox_is_rejected() {
        let (engine, manager, _inbox) = setup();
        let mut c = container();
        c.sandbox = None;
        assert!(matches!(
            manager.create_container(&mut c),
            Err(CoreError::Validation(_))
        ));
        assert!(engine.calls().is_empty());
    }

    #[test]
    fn start_clears_marker_and_schedules_volume_check() {
        let (engine, manager, inbox) = setup();
        let mut c = container();
        let id = manager.create_container(&mut c).unwrap();

        manager.start_container(&id).unwrap();
        let record = engine.record(&id).unwrap();
        assert_eq!(record.state_marker(), None);

        let loaded = manager.get_container(&id).unwrap();
        assert_eq!(loaded.state, ContainerState::Running);
        assert!(loaded.started_at.is_some());
        assert_eq!(loaded.pid, corral_runtime::mock::MOCK_PID);

        let queued = inbox.drain();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].task, VOLUMES_TASK);
        assert!(queued[0].once);
    }

    #[test]
    fn stopped_after_start_is_exited() {
        let (_engine, manager, _inbox) = setup();
        let mut c = container();
        let id = manager.create_container(&mut c).unwrap();
        manager.start_container(&id).unwrap();
        manager.stop_container(&id).unwrap();
        assert_eq!(
            manager.get_container(&id).unwrap().state,
            ContainerState::Exited
        );
    }

    #[test]
    fn update_ignores_caller_state() {
        let (engine, manager, _inbox) = setup();
        let mut c = container();
        let id = manager.create_container(&mut c).unwrap();

        let mut fresh = manager.get_container(&id).unwrap();
        fresh.state = ContainerState::Running;
        manager.update_container(&mut fresh).unwrap();
        assert_eq!(engine.record(&id).unwrap().state_marker(), Some(CREATED_MARKER));

        manager.start_container(&id).unwrap();
        manager.stop_container(&id).unwrap();
        let mut loaded = manager.get_container(&id).unwrap();
        assert_eq!(loaded.state, ContainerState::Exited);

        loaded.state = ContainerState::default();
        loaded.labels.insert("tier".to_owned(), "edge".to_owned());
        manager.update_container(&mut loaded).unwrap();

        let reloaded = manager.get_container(&id).unwrap();
        assert_eq!(reloaded.state, ContainerState::Exited);
        assert_eq!(reloaded.labels["tier"], "edge");
        assert_eq!(engine.record(&id).unwrap().state_marker(), None);
    }

    #[test]
    fn start_keeps_keys_written_by_the_engine() {
        let (engine, manager, _inbox) = setup();
        let mut c = container();
        let id = manager.create_container(&mut c).unwrap();

        manager.start_container(&id).unwrap();
        let record = engine.record(&id).unwrap();
        assert_eq!(record.config[corral_runtime::mock::POWER_STATE_KEY], "RUNNING");
        assert_eq!(record.state_marker(), None);

        let mut loaded = manager.get_container(&id).unwrap();
        manager.update_container(&mut loaded).unwrap();
        let record = engine.record(&id).unwrap();
        assert_eq!(record.config[corral_runtime::mock::POWER_STATE_KEY], "RUNNING");
    }

    #[test]
    fn empty_name_is_rejected() {
        let (engine, manager, _inbox) = setup();
        let mut c = container();
        c.metadata.name = String::new();
        assert!(matches!(
            manager.create_container(&mut c),
            Err(CoreError::Validation(_))
        ));
        assert!(engine.calls().is_empty());
    }

    #[test]
    fn list_and_get_agree_on_unmanaged_records() {
        let (engine, manager, _inbox) = setup();
        let mut record = encode(&container(), Some(CREATED_MARKER)).unwrap();
        record
            .config
            .insert("user.managed".to_owned(), "false".to_owned());
        engine.insert_container("disowned", record, EngineStatus::Stopped);

        assert!(matches!(
            manager.get_container("disowned"),
            Err(CoreError::NotFound(_))
        ));
        assert!(manager.list_containers().unwrap().is_empty());
    }

    #[test]
    fn unmanaged_objects_are_hidden() {
        let (engine, manager, _inbox) = setup();
        engine.insert_container("foreign", ContainerRecord::default(), EngineStatus::Running);
        assert!(matches!(
            manager.get_container("foreign"),
            Err(CoreError::NotFound(_))
        ));
        assert!(manager.list_containers().unwrap().is_empty());
        assert!(matches!(
            manager.delete_container("foreign"),
            Err(CoreError::NotFound(_))
        ));
    }

    #[test]
    fn list_returns_managed_containers() {
        let (_engine, manager, _inbox) = setup();
        let mut c = container();
        manager.create_container(&mut c).unwrap();
        let mut other = container();
        other.metadata.name = "sidecar".to_owned();
        manager.create_container(&mut other).unwrap();

        let names: Vec<String> = manager
            .list_containers()
            .unwrap()
            .into_iter()
            .map(|c| c.metadata.name)
            .collect();
        assert_eq!(names.len(), 2);
        assert!(names.contains(&"sidecar".to_owned()));
    }

    #[test]
    fn delete_removes_object() {
        let (_engine, manager, _inbox) = setup();
        let mut c = container();
        let id = manager.create_container(&mut c).unwrap();
        manager.delete_container(&id).unwrap();
        assert!(matches!(
            manager.get_container(&id),
            Err(CoreError::NotFound(_))
        ));
    }

    #[test]
    fn update_requires_id() {
        let (_engine, manager, _inbox) = setup();
        let mut c = container();
        assert!(matches!(
            manager.update_container(&mut c),
            Err(CoreError::Validation(_))
        ));
    }

    #[test]
    fn record_without_profile_fails_on_read() {
        let (engine, manager, _inbox) = setup();
        let mut record = encode(&container(), Some(CREATED_MARKER)).unwrap();
        record.profiles.clear();
        engine.insert_container("orphan", record, EngineStatus::Stopped);
        assert!(matches!(
            manager.get_container("orphan"),
            Err(CoreError::Validation(_))
        ));
    }
}
