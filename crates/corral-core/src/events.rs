//! Engine lifecycle event dispatcher.
//!
//! Consumes the engine's notification stream. For every `container-started`
//! lifecycle event it schedules a one-shot volume check and, for sandboxes
//! whose network mode needs it, attaches or reattaches the CNI network.

use crate::manager::Manager;
use crate::monitor::{MonitorTask, VOLUMES_TASK};
use corral_runtime::NetworkAttacher;
use corral_schema::Container;
use serde::Deserialize;
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

pub const LIFECYCLE_EVENT: &str = "lifecycle";
pub const CONTAINER_STARTED: &str = "container-started";
/// Key of the stored attach result in a CNI sandbox's mode data.
pub const CNI_RESULT_KEY: &str = "result";

#[derive(Debug, Deserialize)]
struct Notification {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    metadata: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct LifecycleMetadata {
    action: String,
    source: String,
}

/// What happened to the network of a started container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkOutcome {
    /// The sandbox's network mode has no post-start step.
    NotNeeded,
    /// First start: attached and the result was stored on the sandbox.
    Attached,
    /// Restart: reattached with the stored result.
    Reattached,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    /// Not a container-started lifecycle event.
    Ignored,
    /// The payload could not be decoded.
    Malformed,
    /// The started container could not be loaded.
    Unavailable,
    Handled(NetworkOutcome),
}

pub struct LifecycleDispatcher {
    manager: Arc<Manager>,
    attacher: Arc<dyn NetworkAttacher>,
    api_prefix: String,
}

impl LifecycleDispatcher {
    pub fn new(
        manager: Arc<Manager>,
        attacher: Arc<dyn NetworkAttacher>,
        api_prefix: impl Into<String>,
    ) -> Self {
        Self {
            manager,
            attacher,
            api_prefix: api_prefix.into(),
        }
    }

    /// Handle one raw notification.
    pub fn handle(&self, raw: &serde_json::Value) -> EventOutcome {
        let notification: Notification = match serde_json::from_value(raw.clone()) {
            Ok(n) => n,
            Err(e) => {
                error!("malformed engine notification: {e}");
                return EventOutcome::Malformed;
            }
        };
        if notification.kind != LIFECYCLE_EVENT {
            return EventOutcome::Ignored;
        }

        let lifecycle: LifecycleMetadata = match serde_json::from_value(notification.metadata) {
            Ok(m) => m,
            Err(e) => {
                error!("malformed lifecycle event metadata: {e}");
                return EventOutcome::Malformed;
            }
        };
        if lifecycle.action != CONTAINER_STARTED {
            return EventOutcome::Ignored;
        }

        let Some(id) = lifecycle.source.strip_prefix(&self.api_prefix) else {
            error!(
                "lifecycle event source '{}' does not start with '{}'",
                lifecycle.source, self.api_prefix
            );
            return EventOutcome::Malformed;
        };

        let container = match self.manager.get_container(id) {
            Ok(c) => c,
            Err(e) => {
                debug!("ignoring start of {id}: {e}");
                return EventOutcome::Unavailable;
            }
        };

        self.manager
            .monitor()
            .enqueue(MonitorTask::once(container.clone(), VOLUMES_TASK));

        EventOutcome::Handled(self.setup_network(id, &container))
    }

    fn setup_network(&self, id: &str, container: &Container) -> NetworkOutcome {
        let Some(mut sandbox) = container.sandbox.clone() else {
            return NetworkOutcome::NotNeeded;
        };
        if !sandbox.network.mode.needs_post_start_attach() {
            return NetworkOutcome::NotNeeded;
        }
        let namespace = sandbox.metadata.namespace.clone();
        let sandbox_name = sandbox.metadata.name.clone();

        match sandbox.network.mode_data.get(CNI_RESULT_KEY) {
            None => {
                let result = match self.attacher.attach(&namespace, &sandbox_name, id, container.pid)
                {
                    Ok(r) => r,
                    Err(e) => {
                        warn!("attaching network to {id} failed: {e}");
                        return NetworkOutcome::Failed;
                    }
                };
                sandbox
                    .network
                    .mode_data
                    .insert(CNI_RESULT_KEY.to_owned(), result);
                if let Err(e) = self.manager.save_sandbox(&sandbox) {
                    warn!("storing network result of sandbox {} failed: {e}", sandbox.id);
                    return NetworkOutcome::Failed;
                }
                info!("attached network to {id}");
                NetworkOutcome::Attached
            }
            Some(stored) => {
                if let Err(e) =
                    self.attacher
                        .reattach(&namespace, &sandbox_name, id, container.pid, stored)
                {
                    warn!("reattaching network to {id} failed: {e}");
                    return NetworkOutcome::Failed;
                }
                info!("reattached network to {id}");
                NetworkOutcome::Reattached
            }
        }
    }

    /// Handle notifications until the stream ends.
    pub fn run(&self, events: &Receiver<serde_json::Value>) {
        for event in events {
            let outcome = self.handle(&event);
            if outcome != EventOutcome::Ignored {
                debug!("lifecycle event handled: {outcome:?}");
            }
        }
        debug!("engine notification stream closed");
    }

    /// Run the dispatcher on a background thread.
    pub fn spawn(self, events: Receiver<serde_json::Value>) -> Result<EventService, std::io::Error> {
        let thread = thread::Builder::new()
            .name("lifecycle-events".to_owned())
            .spawn(move || self.run(&events))?;
        Ok(EventService { thread })
    }
}

/// A running dispatcher thread. It exits when the notification stream ends.
pub struct EventService {
    thread: JoinHandle<()>,
}

impl EventService {
    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    pub fn join(self) {
        if self.thread.join().is_err() {
            warn!("lifecycle event thread panicked");
        }
    }
}
