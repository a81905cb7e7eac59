//! Encoding of a [`Container`] into the engine's flat record and back.

use crate::device::{add_devices, devices_of, DeviceMap};
use crate::keys::{ConfigKey, ConfigMap, KeyRegistry, Namespace, SCHEMA_VERSION};
use crate::model::{Container, ContainerMetadata};
use crate::types::{ContainerId, SandboxId};
use crate::SchemaError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Profile every container carries after its sandbox profile.
pub const DEFAULT_PROFILE: &str = "default";

/// A container as the engine stores it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContainerRecord {
    pub config: ConfigMap,
    #[serde(default)]
    pub devices: DeviceMap,
    #[serde(default)]
    pub profiles: Vec<String>,
}

impl ContainerRecord {
    fn get(&self, key: ConfigKey) -> Option<&str> {
        self.config.get(key.as_str()).map(String::as_str)
    }

    fn set(&mut self, key: ConfigKey, value: impl Into<String>) {
        self.config.insert(key.as_str().to_owned(), value.into());
    }

    /// Whether the record carries the managed marker with value `true`.
    pub fn is_managed(&self) -> Result<bool, SchemaError> {
        match self.get(ConfigKey::Managed) {
            None => Ok(false),
            Some(_) => parse(self, ConfigKey::Managed),
        }
    }

    pub fn check_schema(&self, id: &str) -> Result<(), SchemaError> {
        let found = self.get(ConfigKey::SchemaVersion).unwrap_or_default();
        if found == SCHEMA_VERSION {
            Ok(())
        } else {
            Err(SchemaError::SchemaMismatch {
                id: id.to_owned(),
                expected: SCHEMA_VERSION.to_owned(),
                found: found.to_owned(),
            })
        }
    }

    pub fn state_marker(&self) -> Option<&str> {
        self.get(ConfigKey::StateMarker)
    }

    /// Drop the created marker and stamp the start time.
    pub fn mark_started(&mut self, at: DateTime<Utc>) {
        self.config.remove(ConfigKey::StateMarker.as_str());
        self.set(ConfigKey::StartedAt, nanos(Some(at)));
    }
}

/// Fields decoded from a record. Engine-reported state (status, pid, stats,
/// network) and the sandbox itself are filled in by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedRecord {
    pub container: Container,
    pub state_marker: Option<String>,
    pub sandbox_id: Option<SandboxId>,
}

fn nanos(at: Option<DateTime<Utc>>) -> String {
    at.and_then(|t| t.timestamp_nanos_opt())
        .unwrap_or(0)
        .to_string()
}

fn parse<T: FromStr>(record: &ContainerRecord, key: ConfigKey) -> Result<T, SchemaError> {
    let raw = record.get(key).unwrap_or_default();
    raw.parse().map_err(|_| SchemaError::InvalidField {
        key: key.as_str().to_owned(),
        value: raw.to_owned(),
        reason: format!("expected {}", std::any::type_name::<T>()),
    })
}

fn parse_time(record: &ContainerRecord, key: ConfigKey) -> Result<Option<DateTime<Utc>>, SchemaError> {
    let n: i64 = parse(record, key)?;
    Ok((n != 0).then(|| DateTime::from_timestamp_nanos(n)))
}

/// Encode `container` into an engine record.
///
/// Cloud-init fields are written only when non-empty. `state_marker` is
/// written as given; the container's derived `state` never decides it.
/// Passthrough config is merged through the key registry, dropping reserved
/// keys. The schema version is written last.
pub fn encode(
    container: &Container,
    state_marker: Option<&str>,
) -> Result<ContainerRecord, SchemaError> {
    let registry = KeyRegistry::container();
    let mut record = ContainerRecord::default();

    KeyRegistry::encode_namespace(&mut record.config, Namespace::Label.rule(), &container.labels);
    KeyRegistry::encode_namespace(
        &mut record.config,
        Namespace::Annotation.rule(),
        &container.annotations,
    );

    if let Some(marker) = state_marker {
        record.set(ConfigKey::StateMarker, marker);
    }
    record.set(ConfigKey::CreatedAt, nanos(container.created_at));
    record.set(ConfigKey::StartedAt, nanos(container.started_at));
    record.set(ConfigKey::Privileged, container.privileged.to_string());
    record.set(ConfigKey::LogPath, container.log_path.clone());
    record.set(ConfigKey::Managed, "true");
    record.set(ConfigKey::MetaName, container.metadata.name.clone());
    record.set(ConfigKey::MetaAttempt, container.metadata.attempt.to_string());
    record.set(ConfigKey::BaseImage, container.image.clone());
    record.set(ConfigKey::Autostart, "true");

    KeyRegistry::encode_namespace(
        &mut record.config,
        Namespace::Environment.rule(),
        &container.environment,
    );

    for (key, value) in [
        (ConfigKey::CloudInitMetaData, &container.cloud_init_meta_data),
        (ConfigKey::CloudInitUserData, &container.cloud_init_user_data),
        (
            ConfigKey::CloudInitNetworkConfig,
            &container.cloud_init_network_config,
        ),
    ] {
        if !value.is_empty() {
            record.set(key, value.clone());
        }
    }

    registry.merge_unreserved(&mut record.config, &container.config);

    add_devices(&mut record.devices, &container.disks)?;
    add_devices(&mut record.devices, &container.proxies)?;
    add_devices(&mut record.devices, &container.blocks)?;
    add_devices(&mut record.devices, &container.nics)?;

    if let Some(sandbox) = &container.sandbox {
        record.profiles = vec![sandbox.id.to_string(), DEFAULT_PROFILE.to_owned()];
    }

    record.set(ConfigKey::SchemaVersion, SCHEMA_VERSION);
    Ok(record)
}

/// Decode the record of engine object `name`. Fails on a schema mismatch or
/// a malformed numeric/boolean field.
pub fn decode(name: &str, record: &ContainerRecord) -> Result<DecodedRecord, SchemaError> {
    record.check_schema(name)?;
    let registry = KeyRegistry::container();

    let text = |key: ConfigKey| record.get(key).unwrap_or_default().to_owned();

    let container = Container {
        id: Some(ContainerId::new(name)),
        metadata: ContainerMetadata {
            name: text(ConfigKey::MetaName),
            attempt: parse(record, ConfigKey::MetaAttempt)?,
        },
        created_at: parse_time(record, ConfigKey::CreatedAt)?,
        started_at: parse_time(record, ConfigKey::StartedAt)?,
        privileged: parse(record, ConfigKey::Privileged)?,
        log_path: text(ConfigKey::LogPath),
        image: text(ConfigKey::BaseImage),
        cloud_init_user_data: text(ConfigKey::CloudInitUserData),
        cloud_init_meta_data: text(ConfigKey::CloudInitMetaData),
        cloud_init_network_config: text(ConfigKey::CloudInitNetworkConfig),
        labels: KeyRegistry::strip_prefix_map(&record.config, Namespace::Label.rule()),
        annotations: KeyRegistry::strip_prefix_map(&record.config, Namespace::Annotation.rule()),
        environment: KeyRegistry::strip_prefix_map(&record.config, Namespace::Environment.rule()),
        config: registry.unreserved_map(&record.config),
        disks: devices_of(&record.devices)?,
        proxies: devices_of(&record.devices)?,
        blocks: devices_of(&record.devices)?,
        nics: devices_of(&record.devices)?,
        ..Container::default()
    };

    Ok(DecodedRecord {
        container,
        state_marker: record.state_marker().map(str::to_owned),
        sandbox_id: record.profiles.first().map(|p| SandboxId::new(p.as_str())),
    })
}
