//! Registry of the config keys Corral owns inside the engine's flat key/value
//! configuration.
//!
//! Two kinds of rules exist: a closed set of exact keys ([`ConfigKey`]) and a
//! list of namespace prefixes ([`Namespace`]). A key is reserved when it
//! matches either. Caller-supplied passthrough config is merged through
//! [`KeyRegistry::merge_unreserved`], which is the only gate deciding whether
//! a caller key may reach the engine.

use crate::SchemaError;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::LazyLock;
use tracing::warn;

/// Flat engine configuration: key → value.
pub type ConfigMap = BTreeMap<String, String>;

/// Expected value of [`ConfigKey::SchemaVersion`].
pub const SCHEMA_VERSION: &str = "1";

/// Separator between a namespace prefix and the caller-chosen name.
pub const NAMESPACE_SEPARATOR: char = '.';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigKey {
    SchemaVersion,
    Managed,
    Privileged,
    StateMarker,
    MetaName,
    MetaAttempt,
    CreatedAt,
    StartedAt,
    CloudInitUserData,
    CloudInitMetaData,
    CloudInitNetworkConfig,
    LogPath,
    BaseImage,
    Autostart,
}

impl ConfigKey {
    pub const ALL: [ConfigKey; 14] = [
        ConfigKey::SchemaVersion,
        ConfigKey::Managed,
        ConfigKey::Privileged,
        ConfigKey::StateMarker,
        ConfigKey::MetaName,
        ConfigKey::MetaAttempt,
        ConfigKey::CreatedAt,
        ConfigKey::StartedAt,
        ConfigKey::CloudInitUserData,
        ConfigKey::CloudInitMetaData,
        ConfigKey::CloudInitNetworkConfig,
        ConfigKey::LogPath,
        ConfigKey::BaseImage,
        ConfigKey::Autostart,
    ];

    /// Wire spelling of the key as stored in the engine.
    pub fn as_str(self) -> &'static str {
        match self {
            ConfigKey::SchemaVersion => "user.schema",
            ConfigKey::Managed => "user.managed",
            ConfigKey::Privileged => "security.privileged",
            ConfigKey::StateMarker => "user.state",
            ConfigKey::MetaName => "user.metadata.name",
            ConfigKey::MetaAttempt => "user.metadata.attempt",
            ConfigKey::CreatedAt => "user.created_at",
            ConfigKey::StartedAt => "user.started_at",
            ConfigKey::CloudInitUserData => "user.user-data",
            ConfigKey::CloudInitMetaData => "user.meta-data",
            ConfigKey::CloudInitNetworkConfig => "user.network-config",
            ConfigKey::LogPath => "user.log_path",
            ConfigKey::BaseImage => "volatile.base_image",
            ConfigKey::Autostart => "boot.autostart",
        }
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reserved key namespaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    Label,
    Annotation,
    Environment,
    /// The engine's own volatile namespace. Never written by callers.
    Volatile,
}

impl Namespace {
    pub const ALL: [Namespace; 4] = [
        Namespace::Label,
        Namespace::Annotation,
        Namespace::Environment,
        Namespace::Volatile,
    ];

    pub fn rule(self) -> PrefixRule {
        match self {
            Namespace::Label => PrefixRule::caller_data("user.label"),
            Namespace::Annotation => PrefixRule::caller_data("user.annotation"),
            Namespace::Environment => PrefixRule::caller_data("environment"),
            Namespace::Volatile => PrefixRule::engine_owned("volatile"),
        }
    }
}

/// A namespace prefix together with its key encode/decode pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrefixRule {
    prefix: &'static str,
    /// Whether Corral stores caller data (labels, env vars) under this prefix.
    caller_data: bool,
}

impl PrefixRule {
    pub const fn caller_data(prefix: &'static str) -> Self {
        Self {
            prefix,
            caller_data: true,
        }
    }

    pub const fn engine_owned(prefix: &'static str) -> Self {
        Self {
            prefix,
            caller_data: false,
        }
    }

    pub fn prefix(&self) -> &'static str {
        self.prefix
    }

    pub fn holds_caller_data(&self) -> bool {
        self.caller_data
    }

    pub fn encode_key(&self, name: &str) -> String {
        format!("{}{NAMESPACE_SEPARATOR}{name}", self.prefix)
    }

    /// Remove exactly the literal `prefix.` from `key`. Characters of the name
    /// itself are never trimmed, even when they also occur in the prefix.
    pub fn decode_key<'a>(&self, key: &'a str) -> Option<&'a str> {
        key.strip_prefix(self.prefix)?
            .strip_prefix(NAMESPACE_SEPARATOR)
    }

    pub fn matches(&self, key: &str) -> bool {
        self.decode_key(key).is_some()
    }

    fn overlaps(&self, other: &PrefixRule) -> bool {
        let a = self.encode_key("");
        let b = other.encode_key("");
        a.starts_with(&b) || b.starts_with(&a)
    }
}

#[derive(Debug, Clone)]
pub struct KeyRegistry {
    exact: Vec<&'static str>,
    rules: Vec<PrefixRule>,
}

static CONTAINER_REGISTRY: LazyLock<KeyRegistry> = LazyLock::new(|| {
    KeyRegistry::new(
        ConfigKey::ALL.into_iter().map(ConfigKey::as_str).collect(),
        Namespace::ALL.into_iter().map(Namespace::rule).collect(),
    )
    .expect("built-in container key registry is consistent")
});

impl KeyRegistry {
    /// Build a registry, rejecting duplicate exact keys, overlapping prefix
    /// rules, and exact keys that would be decoded as caller data.
    pub fn new(exact: Vec<&'static str>, rules: Vec<PrefixRule>) -> Result<Self, SchemaError> {
        let mut seen = HashSet::new();
        for key in &exact {
            if !seen.insert(*key) {
                return Err(SchemaError::RegistryOverlap(format!(
                    "exact key '{key}' registered twice"
                )));
            }
            if let Some(rule) = rules
                .iter()
                .find(|r| r.holds_caller_data() && r.matches(key))
            {
                return Err(SchemaError::RegistryOverlap(format!(
                    "exact key '{key}' falls under caller namespace '{}'",
                    rule.prefix()
                )));
            }
        }
        for (i, a) in rules.iter().enumerate() {
            for b in &rules[i + 1..] {
                if a.overlaps(b) {
                    return Err(SchemaError::RegistryOverlap(format!(
                        "prefix '{}' overlaps prefix '{}'",
                        a.prefix(),
                        b.prefix()
                    )));
                }
            }
        }
        Ok(Self { exact, rules })
    }

    /// The registry used for container configs.
    pub fn container() -> &'static KeyRegistry {
        &CONTAINER_REGISTRY
    }

    pub fn exact_keys(&self) -> &[&'static str] {
        &self.exact
    }

    pub fn rules(&self) -> &[PrefixRule] {
        &self.rules
    }

    pub fn is_reserved(&self, key: &str) -> bool {
        self.exact.contains(&key) || self.rules.iter().any(|r| r.matches(key))
    }

    /// Write every entry of `values` under the namespace of `rule`.
    pub fn encode_namespace(
        config: &mut ConfigMap,
        rule: PrefixRule,
        values: &BTreeMap<String, String>,
    ) {
        for (name, value) in values {
            config.insert(rule.encode_key(name), value.clone());
        }
    }

    /// Extract the entries under `rule`'s namespace with the prefix removed.
    pub fn strip_prefix_map(config: &ConfigMap, rule: PrefixRule) -> BTreeMap<String, String> {
        config
            .iter()
            .filter_map(|(key, value)| {
                rule.decode_key(key)
                    .map(|name| (name.to_owned(), value.clone()))
            })
            .collect()
    }

    /// All entries that are neither exact reserved keys nor namespaced.
    pub fn unreserved_map(&self, config: &ConfigMap) -> ConfigMap {
        config
            .iter()
            .filter(|(key, _)| !self.is_reserved(key))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Merge caller passthrough config into `config`. Reserved keys are logged
    /// and dropped; the number of dropped keys is returned.
    pub fn merge_unreserved(&self, config: &mut ConfigMap, passthrough: &ConfigMap) -> usize {
        let mut dropped = 0;
        for (key, value) in passthrough {
            if self.is_reserved(key) {
                warn!("config key '{key}' is reserved and can not be used");
                dropped += 1;
            } else {
                config.insert(key.clone(), value.clone());
            }
        }
        dropped
    }
}
