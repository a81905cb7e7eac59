//! Offline replay of a scenario against the in-memory engine.
//!
//! A scenario seeds images and sandboxes, creates (and optionally starts)
//! containers with some disk mounts broken, then feeds engine notifications.
//! The full service stack runs against it and the resulting engine writes
//! and network calls are reported.

use super::{colorize_state_padded, json_pretty, read_json, EXIT_SUCCESS};
use corral_core::{shutdown_requested, Corral, CorralConfig};
use corral_runtime::mock::{AttachCall, EngineCall, MockAttacher, MockEngine};
use corral_runtime::EngineClient;
use corral_schema::{Container, ContainerId, ContainerState, Sandbox};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Scenario {
    /// Image reference to fingerprint.
    #[serde(default)]
    images: BTreeMap<String, String>,
    #[serde(default)]
    sandboxes: Vec<Sandbox>,
    #[serde(default)]
    containers: Vec<ScenarioContainer>,
    /// Extra raw notifications, emitted after all containers are set up.
    #[serde(default)]
    events: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ScenarioContainer {
    container: Container,
    #[serde(default)]
    start: bool,
    /// Disk paths whose mount is broken before the container starts.
    #[serde(default)]
    broken_mounts: Vec<String>,
}

#[derive(Debug, Serialize)]
struct ContainerSummary {
    id: String,
    name: String,
    state: ContainerState,
    missing_disks: Vec<String>,
}

#[derive(Debug, Serialize)]
struct ReplayReport {
    containers: Vec<ContainerSummary>,
    writes: Vec<EngineCall>,
    network: Vec<AttachCall>,
}

fn started_event(prefix: &str, id: &str) -> serde_json::Value {
    serde_json::json!({
        "type": "lifecycle",
        "metadata": {"action": "container-started", "source": format!("{prefix}{id}")}
    })
}

fn settle(duration: Duration) {
    let deadline = Instant::now() + duration;
    while Instant::now() < deadline && !shutdown_requested() {
        thread::sleep(Duration::from_millis(10));
    }
}

pub fn run(config: &CorralConfig, path: &Path, settle_ms: u64, json: bool) -> Result<u8, String> {
    let scenario: Scenario = read_json(path)?;

    let engine = Arc::new(MockEngine::new());
    for (reference, fingerprint) in &scenario.images {
        engine.add_image(reference, fingerprint);
    }
    for sandbox in scenario.sandboxes {
        engine.add_sandbox(sandbox);
    }
    let attacher = Arc::new(MockAttacher::new());

    let corral =
        Corral::start(engine.clone(), attacher.clone(), config).map_err(|e| e.to_string())?;
    let manager = Arc::clone(corral.manager());
    engine.clear_calls();

    let prefix = &config.events.api_prefix;
    for entry in scenario.containers {
        let mut container = entry.container;
        if let Some(sandbox) = &container.sandbox {
            if engine.sandbox(sandbox.id.as_str()).is_none() {
                engine.add_sandbox(sandbox.clone());
            }
        }
        let id = manager
            .create_container(&mut container)
            .map_err(|e| e.to_string())?;
        debug!("replay created {id}");
        for mount in &entry.broken_mounts {
            engine.break_mount(&id, mount);
        }
        if entry.start {
            manager.start_container(&id).map_err(|e| e.to_string())?;
            engine.emit(&started_event(prefix, &id));
        }
    }
    for event in &scenario.events {
        engine.emit(event);
    }

    settle(Duration::from_millis(settle_ms));
    engine.close_subscriptions();
    corral.shutdown();

    let writes = engine.writes();
    let network = attacher.calls();
    let mut containers = Vec::new();
    for c in manager.list_containers().map_err(|e| e.to_string())? {
        let id = c.id.map(ContainerId::into_inner).unwrap_or_default();
        let missing_disks = c
            .disks
            .iter()
            .filter(|d| engine.get_file(&id, &d.path).is_err())
            .map(|d| d.path.clone())
            .collect();
        containers.push(ContainerSummary {
            id,
            name: c.metadata.name,
            state: c.state,
            missing_disks,
        });
    }
    let report = ReplayReport {
        containers,
        writes,
        network,
    };

    if json {
        println!("{}", json_pretty(&report)?);
        return Ok(EXIT_SUCCESS);
    }

    println!("{:<18} {:<16} {:<10} MISSING", "ID", "NAME", "STATE");
    for c in &report.containers {
        println!(
            "{:<18} {:<16} {} {}",
            c.id,
            c.name,
            colorize_state_padded(c.state, 10),
            c.missing_disks.join(",")
        );
    }
    println!("engine writes: {}", report.writes.len());
    for call in &report.writes {
        println!("  {}", serde_json::to_string(call).map_err(|e| e.to_string())?);
    }
    println!("network calls: {}", report.network.len());
    for call in &report.network {
        println!("  {}", serde_json::to_string(call).map_err(|e| e.to_string())?);
    }
    Ok(EXIT_SUCCESS)
}
