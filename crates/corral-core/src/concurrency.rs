use corral_schema::ContainerId;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Set of containers that currently have a volume reconciler running.
///
/// At most one reconciler runs per container: a run claims its container id
/// before starting and the claim is released when the guard drops.
#[derive(Debug, Clone, Default)]
pub struct InFlight {
    ids: Arc<Mutex<HashSet<ContainerId>>>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    fn ids(&self) -> MutexGuard<'_, HashSet<ContainerId>> {
        self.ids.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim `id`, or `None` when another run already holds it.
    pub fn try_claim(&self, id: &ContainerId) -> Option<InFlightGuard> {
        if self.ids().insert(id.clone()) {
            Some(InFlightGuard {
                ids: Arc::clone(&self.ids),
                id: id.clone(),
            })
        } else {
            None
        }
    }

    pub fn contains(&self, id: &ContainerId) -> bool {
        self.ids().contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids().is_empty()
    }
}

pub struct InFlightGuard {
    ids: Arc<Mutex<HashSet<ContainerId>>>,
    id: ContainerId,
}

impl InFlightGuard {
    pub fn id(&self) -> &ContainerId {
        &self.id
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

pub fn install_signal_handler() {
    let _ = ctrlc::set_handler(move || {
        if SHUTDOWN_REQUESTED.load(Ordering::SeqCst) {
            std::process::exit(1);
        }
        SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
        eprintln!("\nshutdown requested, stopping background services...");
    });
}

pub fn shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::SeqCst)
}
