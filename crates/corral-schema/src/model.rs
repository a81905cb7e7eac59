use crate::device::{Block, Disk, Nic, Proxy};
use crate::types::{ContainerId, SandboxId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Logical lifecycle state of a container, derived on every read.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    /// Exists but was never started.
    #[default]
    Created,
    Running,
    /// Was started and has terminated.
    Exited,
    Unknown,
}

impl ContainerState {
    pub fn as_str(self) -> &'static str {
        match self {
            ContainerState::Created => "created",
            ContainerState::Running => "running",
            ContainerState::Exited => "exited",
            ContainerState::Unknown => "unknown",
        }
    }

    /// Exited and Unknown containers are not worth repairing.
    pub fn is_terminal(self) -> bool {
        matches!(self, ContainerState::Exited | ContainerState::Unknown)
    }
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContainerMetadata {
    pub name: String,
    pub attempt: u32,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContainerStats {
    pub memory_usage: u64,
    pub cpu_usage: u64,
    pub filesystem_usage: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct InterfaceAddress {
    /// `inet` or `inet6`.
    pub family: String,
    pub address: String,
    #[serde(default)]
    pub netmask: String,
    #[serde(default)]
    pub scope: String,
}

/// Runtime view of one network interface inside a running container.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct NetworkInterface {
    #[serde(default)]
    pub addresses: Vec<InterfaceAddress>,
    #[serde(default)]
    pub hwaddr: String,
    #[serde(default)]
    pub state: String,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum NetworkMode {
    /// No networking beyond loopback.
    None,
    /// Engine-managed default bridge.
    #[default]
    Bridged,
    /// Shares the host network namespace; requires a privileged container.
    Host,
    /// Interfaces are attached by a CNI plugin after the container starts.
    Cni,
}

impl NetworkMode {
    /// Whether a container in this mode needs an attach step once started.
    pub fn needs_post_start_attach(self) -> bool {
        matches!(self, NetworkMode::Cni)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct NetworkConfig {
    pub mode: NetworkMode,
    /// Mode-specific opaque data. CNI mode stores the attach result under `result`.
    #[serde(default)]
    pub mode_data: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SandboxMetadata {
    pub name: String,
    pub namespace: String,
    pub attempt: u32,
    pub uid: String,
}

/// Pod-equivalent grouping a container belongs to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Sandbox {
    pub id: SandboxId,
    pub metadata: SandboxMetadata,
    #[serde(default)]
    pub network: NetworkConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Container {
    /// Assigned once, on first save. `None` until then.
    pub id: Option<ContainerId>,
    pub metadata: ContainerMetadata,
    /// Read only; derived from engine status on every read.
    pub state: ContainerState,
    /// Read only.
    pub pid: i64,
    pub created_at: Option<DateTime<Utc>>,
    /// Read only; `None` until the first successful start.
    pub started_at: Option<DateTime<Utc>>,
    pub privileged: bool,
    pub log_path: String,
    pub cloud_init_user_data: String,
    pub cloud_init_meta_data: String,
    pub cloud_init_network_config: String,
    pub environment: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    /// Passthrough engine config. Reserved keys are dropped on save.
    pub config: BTreeMap<String, String>,
    pub disks: Vec<Disk>,
    pub proxies: Vec<Proxy>,
    pub blocks: Vec<Block>,
    pub nics: Vec<Nic>,
    /// Read only.
    pub network: BTreeMap<String, NetworkInterface>,
    /// Read only.
    pub stats: ContainerStats,
    /// Resolved from the container's first profile on read.
    pub sandbox: Option<Sandbox>,
    /// Image alias or content hash.
    pub image: String,
}

impl Container {
    /// First IPv4 address of the first interface in `interfaces` that exists.
    pub fn ipv4_address(&self, interfaces: &[&str]) -> Option<&str> {
        interfaces
            .iter()
            .filter_map(|name| self.network.get(*name))
            .find_map(|iface| {
                iface
                    .addresses
                    .iter()
                    .find(|a| a.family == "inet")
                    .map(|a| a.address.as_str())
            })
    }
}
