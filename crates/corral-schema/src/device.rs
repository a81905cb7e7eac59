//! Device descriptors and their aggregation into the engine's device map.
//!
//! Every kind encodes itself into a flat property map tagged with a `type`
//! property; decoding splits the merged map back by that tag.

use crate::SchemaError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub type DeviceProperties = BTreeMap<String, String>;

/// Device name → properties, as stored by the engine.
pub type DeviceMap = BTreeMap<String, DeviceProperties>;

const TYPE_PROPERTY: &str = "type";

pub trait Device: Sized {
    /// Value of the `type` property identifying this kind.
    const TYPE: &'static str;

    /// Device name within the container's device map.
    fn name(&self) -> String;

    /// Properties, without the `type` tag.
    fn encode(&self) -> DeviceProperties;

    fn decode(name: &str, props: &DeviceProperties) -> Result<Self, SchemaError>;
}

/// Add `items` to `devices`. A name already present, whatever its kind, is a
/// collision and nothing further is added.
pub fn add_devices<D: Device>(devices: &mut DeviceMap, items: &[D]) -> Result<(), SchemaError> {
    for item in items {
        let name = item.name();
        if devices.contains_key(&name) {
            return Err(SchemaError::DeviceCollision(name));
        }
        let mut props = item.encode();
        props.insert(TYPE_PROPERTY.to_owned(), D::TYPE.to_owned());
        devices.insert(name, props);
    }
    Ok(())
}

/// All devices of kind `D` in `devices`, ordered by device name.
pub fn devices_of<D: Device>(devices: &DeviceMap) -> Result<Vec<D>, SchemaError> {
    devices
        .iter()
        .filter(|(_, props)| props.get(TYPE_PROPERTY).map(String::as_str) == Some(D::TYPE))
        .map(|(name, props)| D::decode(name, props))
        .collect()
}

fn slug(prefix: &str, raw: &str) -> String {
    let trimmed = raw.trim_matches('/');
    if trimmed.is_empty() {
        return format!("{prefix}-root");
    }
    let body: String = trimmed
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    format!("{prefix}-{body}")
}

fn required(name: &str, props: &DeviceProperties, key: &str) -> Result<String, SchemaError> {
    props
        .get(key)
        .cloned()
        .ok_or_else(|| SchemaError::InvalidField {
            key: format!("{name}.{key}"),
            value: String::new(),
            reason: "missing device property".to_owned(),
        })
}

fn flag(name: &str, props: &DeviceProperties, key: &str) -> Result<bool, SchemaError> {
    match props.get(key) {
        None => Ok(false),
        Some(v) => v.parse().map_err(|_| SchemaError::InvalidField {
            key: format!("{name}.{key}"),
            value: v.clone(),
            reason: "expected true or false".to_owned(),
        }),
    }
}

/// A host path or storage volume mounted into the container.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Disk {
    /// Mount path inside the container.
    pub path: String,
    pub source: String,
    #[serde(default)]
    pub read_only: bool,
    #[serde(default)]
    pub optional: bool,
}

impl Device for Disk {
    const TYPE: &'static str = "disk";

    fn name(&self) -> String {
        slug("disk", &self.path)
    }

    fn encode(&self) -> DeviceProperties {
        let mut props = DeviceProperties::new();
        props.insert("path".to_owned(), self.path.clone());
        props.insert("source".to_owned(), self.source.clone());
        if self.read_only {
            props.insert("readonly".to_owned(), "true".to_owned());
        }
        if self.optional {
            props.insert("optional".to_owned(), "true".to_owned());
        }
        props
    }

    fn decode(name: &str, props: &DeviceProperties) -> Result<Self, SchemaError> {
        Ok(Self {
            path: required(name, props, "path")?,
            source: required(name, props, "source")?,
            read_only: flag(name, props, "readonly")?,
            optional: flag(name, props, "optional")?,
        })
    }
}

/// Forwards a host socket into the container.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Proxy {
    /// e.g. `tcp:0.0.0.0:8080` on the host side.
    pub listen: String,
    /// e.g. `tcp:127.0.0.1:80` inside the container.
    pub connect: String,
}

impl Device for Proxy {
    const TYPE: &'static str = "proxy";

    fn name(&self) -> String {
        slug("proxy", &self.listen)
    }

    fn encode(&self) -> DeviceProperties {
        let mut props = DeviceProperties::new();
        props.insert("listen".to_owned(), self.listen.clone());
        props.insert("connect".to_owned(), self.connect.clone());
        props
    }

    fn decode(name: &str, props: &DeviceProperties) -> Result<Self, SchemaError> {
        Ok(Self {
            listen: required(name, props, "listen")?,
            connect: required(name, props, "connect")?,
        })
    }
}

/// Passes a host block device node into the container.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Block {
    pub source: String,
    pub path: String,
}

impl Device for Block {
    const TYPE: &'static str = "unix-block";

    fn name(&self) -> String {
        slug("block", &self.path)
    }

    fn encode(&self) -> DeviceProperties {
        let mut props = DeviceProperties::new();
        props.insert("source".to_owned(), self.source.clone());
        props.insert("path".to_owned(), self.path.clone());
        props
    }

    fn decode(name: &str, props: &DeviceProperties) -> Result<Self, SchemaError> {
        Ok(Self {
            source: required(name, props, "source")?,
            path: required(name, props, "path")?,
        })
    }
}

/// Network interface; the device is named after the interface.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Nic {
    pub name: String,
    pub nictype: String,
    #[serde(default)]
    pub parent: String,
    #[serde(default)]
    pub hwaddr: String,
}

impl Device for Nic {
    const TYPE: &'static str = "nic";

    fn name(&self) -> String {
        self.name.clone()
    }

    fn encode(&self) -> DeviceProperties {
        let mut props = DeviceProperties::new();
        props.insert("name".to_owned(), self.name.clone());
        props.insert("nictype".to_owned(), self.nictype.clone());
        if !self.parent.is_empty() {
            props.insert("parent".to_owned(), self.parent.clone());
        }
        if !self.hwaddr.is_empty() {
            props.insert("hwaddr".to_owned(), self.hwaddr.clone());
        }
        props
    }

    fn decode(name: &str, props: &DeviceProperties) -> Result<Self, SchemaError> {
        Ok(Self {
            name: props.get("name").cloned().unwrap_or_else(|| name.to_owned()),
            nictype: required(name, props, "nictype")?,
            parent: props.get("parent").cloned().unwrap_or_default(),
            hwaddr: props.get("hwaddr").cloned().unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn disk(path: &str) -> Disk {
        Disk {
            path: path.to_owned(),
            source: format!("/srv{path}"),
            ..Disk::default()
        }
    }

    #[test]
    fn kinds_merge_and_split_by_type() {
        let mut devices = DeviceMap::new();
        add_devices(&mut devices, &[disk("/data"), disk("/logs")]).unwrap();
        add_devices(
            &mut devices,
            &[Proxy {
                listen: "tcp:0.0.0.0:80".to_owned(),
                connect: "tcp:127.0.0.1:80".to_owned(),
            }],
        )
        .unwrap();
        add_devices(
            &mut devices,
            &[Nic {
                name: "eth0".to_owned(),
                nictype: "bridged".to_owned(),
                parent: "br0".to_owned(),
                ..Nic::default()
            }],
        )
        .unwrap();

        assert_eq!(devices.len(), 4);
        assert_eq!(devices["disk-data"]["type"], "disk");
        assert_eq!(devices_of::<Disk>(&devices).unwrap().len(), 2);
        assert_eq!(devices_of::<Proxy>(&devices).unwrap().len(), 1);
        assert_eq!(devices_of::<Nic>(&devices).unwrap()[0].parent, "br0");
        assert!(devices_of::<Block>(&devices).unwrap().is_empty());
    }

    #[test]
    fn name_collision_across_kinds_is_rejected() {
        let mut devices = DeviceMap::new();
        add_devices(&mut devices, &[disk("/data")]).unwrap();
        let err = add_devices(
            &mut devices,
            &[Nic {
                name: "disk-data".to_owned(),
                nictype: "p2p".to_owned(),
                ..Nic::default()
            }],
        )
        .unwrap_err();
        assert!(matches!(err, SchemaError::DeviceCollision(ref n) if n == "disk-data"));
    }

    #[test]
    fn disk_flags_decode() {
        let mut d = disk("/cfg");
        d.read_only = true;
        let mut devices = DeviceMap::new();
        add_devices(&mut devices, &[d.clone()]).unwrap();
        assert_eq!(devices_of::<Disk>(&devices).unwrap(), vec![d]);
    }

    #[test]
    fn malformed_flag_is_an_error() {
        let mut props = DeviceProperties::new();
        props.insert("type".to_owned(), "disk".to_owned());
        props.insert("path".to_owned(), "/x".to_owned());
        props.insert("source".to_owned(), "/y".to_owned());
        props.insert("readonly".to_owned(), "yes".to_owned());
        let mut devices = DeviceMap::new();
        devices.insert("disk-x".to_owned(), props);
        assert!(devices_of::<Disk>(&devices).is_err());
    }

    #[test]
    fn root_path_gets_stable_name() {
        assert_eq!(disk("/").name(), "disk-root");
        assert_eq!(disk("/var/lib/db").name(), "disk-var-lib-db");
    }
}
