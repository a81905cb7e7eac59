//! Periodic task scheduler.
//!
//! Tasks are submitted through a cloneable [`MonitorHandle`] and owned by a
//! single [`Monitor`]. Each sweep evaluates exactly the tasks queued when
//! the sweep began; tasks submitted during a sweep wait for the next one.
//! Due tasks run on their own thread, so a slow task never delays a sweep.

use corral_schema::Container;
use std::fmt;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Name of the volume remount task.
pub const VOLUMES_TASK: &str = "volumes";

/// Task kinds the scheduler knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Volumes,
}

impl TaskKind {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            VOLUMES_TASK => Some(TaskKind::Volumes),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskKind::Volumes => VOLUMES_TASK,
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of scheduled work bound to one container snapshot.
#[derive(Debug, Clone)]
pub struct MonitorTask {
    pub container: Container,
    pub task: String,
    pub interval: Duration,
    /// Dropped after its first evaluation.
    pub once: bool,
    /// When the task was last dispatched. `None` means never, so the task is
    /// due on the next sweep.
    pub last_check: Option<Instant>,
}

impl MonitorTask {
    pub fn new(container: Container, task: impl Into<String>, interval: Duration, once: bool) -> Self {
        Self {
            container,
            task: task.into(),
            interval,
            once,
            last_check: None,
        }
    }

    pub fn once(container: Container, task: impl Into<String>) -> Self {
        Self::new(container, task, Duration::ZERO, true)
    }

    pub fn recurring(container: Container, task: impl Into<String>, interval: Duration) -> Self {
        Self::new(container, task, interval, false)
    }

    pub fn is_due(&self, now: Instant) -> bool {
        match self.last_check {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.interval,
        }
    }
}

/// Runs the body of a dispatched task. Called on a dedicated thread.
pub trait TaskHandler: Send + Sync {
    fn run(&self, kind: TaskKind, container: &Container);
}

enum Command {
    Enqueue(MonitorTask),
    Shutdown,
}

/// Submission side of the scheduler.
#[derive(Clone)]
pub struct MonitorHandle {
    tx: Sender<Command>,
}

impl MonitorHandle {
    /// Queue `task` for the next sweep. Never blocks.
    pub fn enqueue(&self, task: MonitorTask) {
        let name = task.task.clone();
        if self.tx.send(Command::Enqueue(task)).is_err() {
            debug!("scheduler stopped, dropping task {name}");
        }
    }

    fn shutdown(&self) {
        let _ = self.tx.send(Command::Shutdown);
    }
}

/// Receiving side of the scheduler channel, consumed by [`Monitor::new`].
pub struct MonitorInbox {
    rx: Receiver<Command>,
}

impl MonitorInbox {
    /// Take every task submitted so far without running anything.
    pub fn drain(&self) -> Vec<MonitorTask> {
        self.rx
            .try_iter()
            .filter_map(|cmd| match cmd {
                Command::Enqueue(task) => Some(task),
                Command::Shutdown => None,
            })
            .collect()
    }
}

/// Create a connected handle/inbox pair.
pub fn channel() -> (MonitorHandle, MonitorInbox) {
    let (tx, rx) = mpsc::channel::<Command>();
    (MonitorHandle { tx }, MonitorInbox { rx })
}

/// Counters for one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub evaluated: usize,
    pub dispatched: usize,
    pub requeued: usize,
    pub dropped_unknown: usize,
}

pub struct Monitor {
    inbox: MonitorInbox,
    queue: Vec<MonitorTask>,
    handler: Arc<dyn TaskHandler>,
    tick: Duration,
}

impl Monitor {
    pub fn new(inbox: MonitorInbox, handler: Arc<dyn TaskHandler>, tick: Duration) -> Self {
        Self {
            inbox,
            queue: Vec::new(),
            handler,
            tick,
        }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Move submitted tasks into the queue. Returns `false` once shutdown was
    /// requested or every handle is gone.
    pub fn receive(&mut self) -> bool {
        loop {
            match self.inbox.rx.try_recv() {
                Ok(Command::Enqueue(task)) => self.queue.push(task),
                Ok(Command::Shutdown) | Err(TryRecvError::Disconnected) => return false,
                Err(TryRecvError::Empty) => return true,
            }
        }
    }

    /// Evaluate every task queued right now, dispatching the due ones.
    pub fn sweep(&mut self, now: Instant) -> SweepReport {
        let mut report = SweepReport::default();
        let batch = std::mem::take(&mut self.queue);

        for mut task in batch {
            report.evaluated += 1;
            let Some(kind) = TaskKind::parse(&task.task) else {
                warn!("unknown monitor task '{}', dropping it", task.task);
                report.dropped_unknown += 1;
                continue;
            };

            if task.is_due(now) {
                self.dispatch(kind, &task.container);
                task.last_check = Some(now);
                report.dispatched += 1;
            }

            if !task.once {
                self.queue.push(task);
                report.requeued += 1;
            }
        }
        report
    }

    fn dispatch(&self, kind: TaskKind, container: &Container) {
        let handler = Arc::clone(&self.handler);
        let container = container.clone();
        let spawned = thread::Builder::new()
            .name(format!("monitor-{kind}"))
            .spawn(move || handler.run(kind, &container));
        if let Err(e) = spawned {
            warn!("failed to spawn {kind} task: {e}");
        }
    }

    /// Wait out one tick, queueing submissions as they arrive. Returns
    /// `false` when the scheduler should stop.
    fn wait_tick(&mut self) -> bool {
        let deadline = Instant::now() + self.tick;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return true;
            }
            match self.inbox.rx.recv_timeout(remaining) {
                Ok(Command::Enqueue(task)) => self.queue.push(task),
                Ok(Command::Shutdown) | Err(RecvTimeoutError::Disconnected) => return false,
                Err(RecvTimeoutError::Timeout) => return true,
            }
        }
    }

    /// Sweep once per tick until shutdown.
    pub fn run(mut self) {
        debug!("monitor started, tick {:?}", self.tick);
        while self.wait_tick() {
            let report = self.sweep(Instant::now());
            if report.evaluated > 0 {
                debug!(
                    "monitor sweep: {} evaluated, {} dispatched, {} requeued",
                    report.evaluated, report.dispatched, report.requeued
                );
            }
        }
        debug!("monitor stopped with {} queued tasks", self.queue.len());
    }

    /// Run the scheduler on a background thread.
    ///
    /// `handle` must be connected to this monitor's inbox; it is used to
    /// request shutdown.
    pub fn spawn(self, handle: MonitorHandle) -> Result<MonitorService, std::io::Error> {
        let thread = thread::Builder::new()
            .name("monitor".to_owned())
            .spawn(move || self.run())?;
        Ok(MonitorService {
            handle,
            thread: Some(thread),
        })
    }
}

/// A running scheduler thread.
pub struct MonitorService {
    handle: MonitorHandle,
    thread: Option<JoinHandle<()>>,
}

impl MonitorService {
    pub fn handle(&self) -> &MonitorHandle {
        &self.handle
    }

    /// Stop the scheduler and wait for its thread. Tasks already dispatched
    /// keep running to completion on their own threads.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.handle.shutdown();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("monitor thread panicked");
            }
        }
    }
}

impl Drop for MonitorService {
    fn drop(&mut self) {
        self.stop();
    }
}
