use crate::CoreError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Runtime configuration, usually loaded from `corral.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct CorralConfig {
    pub monitor: MonitorConfig,
    pub volumes: VolumesConfig,
    pub events: EventsConfig,
    pub identity: IdentityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct MonitorConfig {
    /// Scheduler sweep period.
    pub tick_interval_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct VolumesConfig {
    /// Pause between two repair rounds of the volume reconciler.
    pub retry_interval_ms: u64,
    /// Maximum repair rounds per run. Unlimited when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
}

impl Default for VolumesConfig {
    fn default() -> Self {
        Self {
            retry_interval_ms: 1000,
            max_attempts: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct EventsConfig {
    /// Prefix removed from a lifecycle event's source to get the container id.
    pub api_prefix: String,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            api_prefix: "/1.0/containers/".to_owned(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct IdentityConfig {
    /// First field of every container identity tuple.
    pub owner_tag: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            owner_tag: "k8s".to_owned(),
        }
    }
}

impl CorralConfig {
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content).map_err(|e| {
            CoreError::Config(format!("invalid config {}: {e}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` when given, otherwise use the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, CoreError> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), CoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String, CoreError> {
        toml::to_string_pretty(self).map_err(|e| CoreError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.monitor.tick_interval_ms == 0 {
            return Err(CoreError::Config(
                "monitor.tick_interval_ms must be positive".to_owned(),
            ));
        }
        if self.volumes.retry_interval_ms == 0 {
            return Err(CoreError::Config(
                "volumes.retry_interval_ms must be positive".to_owned(),
            ));
        }
        if self.volumes.max_attempts == Some(0) {
            return Err(CoreError::Config(
                "volumes.max_attempts must be positive when set".to_owned(),
            ));
        }
        if self.events.api_prefix.is_empty() {
            return Err(CoreError::Config("events.api_prefix must not be empty".to_owned()));
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.monitor.tick_interval_ms)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.volumes.retry_interval_ms)
    }
}
