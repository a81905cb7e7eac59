use crate::config::CorralConfig;
use crate::events::{EventService, LifecycleDispatcher};
use crate::manager::Manager;
use crate::monitor::{self, Monitor, MonitorService};
use crate::volumes::{Sleeper, ThreadSleeper, VolumeReconciler};
use crate::CoreError;
use corral_runtime::{EngineClient, NetworkAttacher};
use std::sync::Arc;
use tracing::info;

/// A fully wired Corral instance: the container manager plus its two
/// background services, the task scheduler and the lifecycle dispatcher.
pub struct Corral {
    manager: Arc<Manager>,
    monitor: Option<MonitorService>,
    events: Option<EventService>,
}

impl Corral {
    pub fn start(
        engine: Arc<dyn EngineClient>,
        attacher: Arc<dyn NetworkAttacher>,
        config: &CorralConfig,
    ) -> Result<Self, CoreError> {
        Self::start_with_sleeper(engine, attacher, config, Arc::new(ThreadSleeper))
    }

    pub fn start_with_sleeper(
        engine: Arc<dyn EngineClient>,
        attacher: Arc<dyn NetworkAttacher>,
        config: &CorralConfig,
        sleeper: Arc<dyn Sleeper>,
    ) -> Result<Self, CoreError> {
        config.validate()?;

        let (handle, inbox) = monitor::channel();
        let manager = Arc::new(Manager::new(
            Arc::clone(&engine),
            handle.clone(),
            config.identity.owner_tag.clone(),
        ));

        let reconciler =
            VolumeReconciler::new(Arc::clone(&manager), sleeper, config.retry_interval())
                .with_max_attempts(config.volumes.max_attempts);
        let monitor =
            Monitor::new(inbox, Arc::new(reconciler), config.tick_interval()).spawn(handle)?;

        let notifications = engine.subscribe()?;
        let dispatcher = LifecycleDispatcher::new(
            Arc::clone(&manager),
            attacher,
            config.events.api_prefix.clone(),
        );
        let events = dispatcher.spawn(notifications)?;

        info!("corral started on {} engine", engine.name());
        Ok(Self {
            manager,
            monitor: Some(monitor),
            events: Some(events),
        })
    }

    pub fn manager(&self) -> &Arc<Manager> {
        &self.manager
    }

    /// Whether the engine notification stream has ended.
    pub fn events_finished(&self) -> bool {
        match &self.events {
            Some(events) => events.is_finished(),
            None => true,
        }
    }

    /// Stop the scheduler and wait for the event stream to end.
    ///
    /// The dispatcher only exits once the engine closes its notification
    /// stream, so callers close the engine connection first.
    pub fn shutdown(mut self) {
        if let Some(monitor) = self.monitor.take() {
            monitor.shutdown();
        }
        if let Some(events) = self.events.take() {
            events.join();
        }
        info!("corral stopped");
    }
}
