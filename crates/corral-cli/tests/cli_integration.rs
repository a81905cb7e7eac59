//! CLI subprocess integration tests.
//!
//! These tests invoke the `corral` binary as a subprocess and verify exit
//! codes, stdout content, and JSON output shape.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

fn corral_bin() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_corral"));
    cmd.env_remove("CORRAL_LOG");
    cmd
}

fn run(args: &[&str]) -> Output {
    corral_bin().args(args).output().unwrap()
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

fn sandbox_json(mode: &str) -> serde_json::Value {
    serde_json::json!({
        "id": "sb-1",
        "metadata": {"name": "frontend", "namespace": "shop", "attempt": 0, "uid": "9b1c"},
        "network": {"mode": mode}
    })
}

fn container_json(disks: &[&str]) -> serde_json::Value {
    let disks: Vec<_> = disks
        .iter()
        .map(|p| serde_json::json!({"path": p, "source": format!("/srv{p}")}))
        .collect();
    serde_json::json!({
        "metadata": {"name": "web", "attempt": 1},
        "image": "nginx:1.25",
        "labels": {"tier": "frontend"},
        "environment": {"PORT": "8080"},
        "disks": disks,
        "sandbox": sandbox_json("cni")
    })
}

fn write_json(dir: &Path, name: &str, value: &serde_json::Value) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, serde_json::to_string_pretty(value).unwrap()).unwrap();
    path
}

#[test]
fn cli_version_exits_zero() {
    let output = run(&["--version"]);
    assert!(output.status.success(), "corral --version must exit 0");
    assert!(stdout(&output).contains("corral"));
}

#[test]
fn cli_help_lists_commands() {
    let output = run(&["--help"]);
    assert!(output.status.success());
    let out = stdout(&output);
    for command in ["id", "state", "encode", "decode", "keys", "config", "replay"] {
        assert!(out.contains(command), "help must list '{command}': {out}");
    }
}

#[test]
fn cli_id_is_deterministic() {
    let args = [
        "id",
        "--container",
        "web",
        "--sandbox",
        "frontend",
        "--namespace",
        "shop",
        "--uid",
        "9b1c",
    ];
    let first = run(&args);
    let second = run(&args);
    assert!(first.status.success(), "stderr: {}", stderr(&first));
    let id = stdout(&first).trim().to_owned();
    assert_eq!(id, stdout(&second).trim());
    assert_eq!(id.len(), 16);
    assert!(id.starts_with('w'));
    assert!(id
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));

    let mut other_owner = args.to_vec();
    other_owner.extend(["--owner", "nomad"]);
    assert_ne!(stdout(&run(&other_owner)).trim(), id);
}

#[test]
fn cli_state_derivation() {
    let created = run(&["--json", "state", "--status", "102", "--marker", "created"]);
    assert!(created.status.success());
    let json: serde_json::Value = serde_json::from_str(&stdout(&created)).unwrap();
    assert_eq!(json["state"], "created");
    assert_eq!(json["status"], "stopped");

    let exited = run(&["--json", "state", "--status", "102"]);
    let json: serde_json::Value = serde_json::from_str(&stdout(&exited)).unwrap();
    assert_eq!(json["state"], "exited");

    let running = run(&["--json", "state", "--status", "103", "--marker", "created"]);
    let json: serde_json::Value = serde_json::from_str(&stdout(&running)).unwrap();
    assert_eq!(json["state"], "running");

    let odd = run(&["--json", "state", "--status", "112"]);
    let json: serde_json::Value = serde_json::from_str(&stdout(&odd)).unwrap();
    assert_eq!(json["state"], "unknown");
}

#[test]
fn cli_encode_then_decode() {
    let dir = tempfile::tempdir().unwrap();
    let container = write_json(dir.path(), "container.json", &container_json(&["/data"]));

    let encoded = run(&["--json", "encode", &container.to_string_lossy()]);
    assert!(encoded.status.success(), "stderr: {}", stderr(&encoded));
    let record: serde_json::Value = serde_json::from_str(&stdout(&encoded)).unwrap();
    assert_eq!(record["config"]["user.schema"], "1");
    assert_eq!(record["config"]["user.managed"], "true");
    assert_eq!(record["config"]["user.state"], "created");
    assert_eq!(record["config"]["user.label.tier"], "frontend");
    assert_eq!(record["config"]["environment.PORT"], "8080");
    assert_eq!(record["devices"]["disk-data"]["type"], "disk");
    assert_eq!(record["profiles"], serde_json::json!(["sb-1", "default"]));

    let record_path = write_json(dir.path(), "w1234.json", &record);
    let decoded = run(&["--json", "decode", &record_path.to_string_lossy()]);
    assert!(decoded.status.success(), "stderr: {}", stderr(&decoded));
    let json: serde_json::Value = serde_json::from_str(&stdout(&decoded)).unwrap();
    assert_eq!(json["container"]["id"], "w1234");
    assert_eq!(json["container"]["metadata"]["name"], "web");
    assert_eq!(json["container"]["environment"]["PORT"], "8080");
    assert_eq!(json["state_marker"], "created");
    assert_eq!(json["sandbox_id"], "sb-1");
}

#[test]
fn cli_decode_schema_mismatch_exits_three() {
    let dir = tempfile::tempdir().unwrap();
    let record = serde_json::json!({"config": {"user.schema": "0", "user.managed": "true"}});
    let path = write_json(dir.path(), "old.json", &record);

    let output = run(&["decode", &path.to_string_lossy()]);
    assert_eq!(output.status.code(), Some(3));
    assert!(stderr(&output).contains("schema error"));
}

#[test]
fn cli_encode_missing_file_exits_two() {
    let output = run(&["encode", "/nonexistent/container.json"]);
    assert_eq!(output.status.code(), Some(2));
    assert!(stderr(&output).starts_with("error: failed to read"));
}

#[test]
fn cli_keys_lists_reserved_namespaces() {
    let output = run(&["--json", "keys"]);
    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    let exact = json["exact"].as_array().unwrap();
    assert_eq!(exact.len(), 14);
    assert!(exact.contains(&serde_json::json!("user.managed")));
    let prefixes: Vec<&str> = json["prefixes"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|p| p["prefix"].as_str())
        .collect();
    assert!(prefixes.contains(&"environment."));
    assert!(prefixes.contains(&"user.label."));
}

#[test]
fn cli_config_reads_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("corral.toml");
    std::fs::write(&path, "[volumes]\nmax_attempts = 4\n").unwrap();

    let output = run(&["--config", &path.to_string_lossy(), "--json", "config"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let json: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(json["volumes"]["max_attempts"], 4);
    assert_eq!(json["monitor"]["tick_interval_ms"], 500);

    let toml_out = run(&["config"]);
    assert!(stdout(&toml_out).contains("tick_interval_ms = 500"));
}

#[test]
fn cli_config_rejects_unknown_keys() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("corral.toml");
    std::fs::write(&path, "[monitor]\nspeed = 3\n").unwrap();
    let output = run(&["--config", &path.to_string_lossy(), "config"]);
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn cli_replay_repairs_volumes_and_attaches_network() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("corral.toml");
    std::fs::write(
        &config,
        "[monitor]\ntick_interval_ms = 10\n[volumes]\nretry_interval_ms = 10\n",
    )
    .unwrap();
    let scenario = serde_json::json!({
        "images": {"nginx:1.25": "5a8c0fd2"},
        "sandboxes": [sandbox_json("cni")],
        "containers": [{
            "container": container_json(&["/data", "/cache"]),
            "start": true,
            "broken_mounts": ["/cache"]
        }],
        "events": [{"type": "logging", "metadata": {"message": "noise"}}]
    });
    let path = write_json(dir.path(), "scenario.json", &scenario);

    let output = run(&[
        "--config",
        &config.to_string_lossy(),
        "--json",
        "replay",
        &path.to_string_lossy(),
        "--settle-ms",
        "1000",
    ]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let report: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();

    let containers = report["containers"].as_array().unwrap();
    assert_eq!(containers.len(), 1);
    assert_eq!(containers[0]["state"], "running");
    assert_eq!(containers[0]["missing_disks"], serde_json::json!([]));

    let network = report["network"].as_array().unwrap();
    assert_eq!(network.len(), 1);
    assert_eq!(network[0]["call"], "attach");

    let writes = report["writes"].as_array().unwrap();
    assert!(writes.iter().any(|w| w["call"] == "save_sandbox"));
    assert!(writes
        .iter()
        .any(|w| w["call"] == "update" && w["disks"] == serde_json::json!(["/data"])));
}

#[test]
fn cli_completions_bash() {
    let output = run(&["completions", "bash"]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("corral"));
}
