//! Volume remount reconciler.
//!
//! Some disk mounts do not survive a container start. The reconciler probes
//! every expected disk path and, while any is missing, detaches the missing
//! disks and re-applies the full set so the engine remounts them.

use crate::concurrency::InFlight;
use crate::manager::Manager;
use crate::monitor::{TaskHandler, TaskKind};
use crate::CoreError;
use corral_schema::{Container, Disk};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Pause between repair rounds. Injected so tests can run without sleeping.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// How a reconciler run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemountOutcome {
    /// Every expected disk is visible.
    Healthy,
    /// The container is exited, unknown, or deleted.
    Stopped,
    /// The configured attempt limit was reached with disks still missing.
    AttemptsExhausted,
    /// Another run for the same container is in progress.
    AlreadyRunning,
    /// The container has no id and cannot be probed.
    Unidentified,
}

#[derive(Debug)]
enum Phase {
    Probing,
    Repairing {
        container: Box<Container>,
        present: Vec<Disk>,
        missing: Vec<Disk>,
    },
    Sleeping,
    Done(RemountOutcome),
}

pub struct VolumeReconciler {
    manager: Arc<Manager>,
    sleeper: Arc<dyn Sleeper>,
    retry_interval: Duration,
    max_attempts: Option<u32>,
    in_flight: InFlight,
}

impl VolumeReconciler {
    pub fn new(manager: Arc<Manager>, sleeper: Arc<dyn Sleeper>, retry_interval: Duration) -> Self {
        Self {
            manager,
            sleeper,
            retry_interval,
            max_attempts: None,
            in_flight: InFlight::new(),
        }
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: Option<u32>) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn in_flight(&self) -> &InFlight {
        &self.in_flight
    }

    /// Repair the disks of `container` until all are visible or the
    /// container stops. Engine failures are logged and retried.
    pub fn reconcile(&self, container: &Container) -> RemountOutcome {
        let Some(id) = container.id.as_ref() else {
            warn!("volume check for unsaved container {}", container.metadata.name);
            return RemountOutcome::Unidentified;
        };
        let Some(_claim) = self.in_flight.try_claim(id) else {
            debug!("volume check for {id} already running");
            return RemountOutcome::AlreadyRunning;
        };

        let expected = container.disks.clone();
        let mut attempts = 0u32;
        let mut phase = Phase::Probing;
        loop {
            phase = match phase {
                Phase::Probing => self.probe(id, &expected),
                Phase::Repairing {
                    mut container,
                    present,
                    missing,
                } => {
                    attempts += 1;
                    info!(
                        "remounting {} missing disk(s) of {id} (attempt {attempts})",
                        missing.len()
                    );
                    container.disks = present;
                    if let Err(e) = self.manager.update_container(&mut container) {
                        warn!("detaching missing disks of {id} failed: {e}");
                    }
                    container.disks.clone_from(&expected);
                    if let Err(e) = self.manager.update_container(&mut container) {
                        warn!("reattaching disks of {id} failed: {e}");
                    }

                    if self.max_attempts.is_some_and(|max| attempts >= max) {
                        Phase::Done(RemountOutcome::AttemptsExhausted)
                    } else {
                        Phase::Sleeping
                    }
                }
                Phase::Sleeping => {
                    self.sleeper.sleep(self.retry_interval);
                    Phase::Probing
                }
                Phase::Done(outcome) => {
                    debug!("volume check for {id} finished: {outcome:?}");
                    return outcome;
                }
            };
        }
    }

    fn probe(&self, id: &str, expected: &[Disk]) -> Phase {
        let current = match self.manager.get_container(id) {
            Ok(c) => c,
            Err(CoreError::NotFound(_)) => return Phase::Done(RemountOutcome::Stopped),
            Err(e) => {
                warn!("reloading container {id} failed: {e}");
                return Phase::Sleeping;
            }
        };
        if current.state.is_terminal() {
            return Phase::Done(RemountOutcome::Stopped);
        }

        let engine = self.manager.engine();
        let (present, missing): (Vec<Disk>, Vec<Disk>) =
            expected.iter().cloned().partition(|disk| {
                match engine.get_file(id, &disk.path) {
                    Ok(_) => true,
                    Err(e) => {
                        debug!("disk {} of {id} not visible: {e}", disk.path);
                        false
                    }
                }
            });

        if missing.is_empty() {
            Phase::Done(RemountOutcome::Healthy)
        } else {
            Phase::Repairing {
                container: Box::new(current),
                present,
                missing,
            }
        }
    }
}

impl TaskHandler for VolumeReconciler {
    fn run(&self, kind: TaskKind, container: &Container) {
        match kind {
            TaskKind::Volumes => {
                self.reconcile(container);
            }
        }
    }
}
