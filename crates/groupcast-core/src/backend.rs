//! Backends, capabilities and partition keys.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

/// Radio or integration stack that owns a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Backend {
    /// Z-Wave through a Z-Wave JS server. Multicast addressing, no stored groups.
    #[serde(rename = "zwave_js")]
    ZWaveJs,
    /// Zigbee through a Zigbee2MQTT bridge. Broker-side named groups.
    #[serde(rename = "zigbee2mqtt")]
    Zigbee2Mqtt,
    /// Zigbee through the host's ZHA coordinator. Gateway-managed numeric groups.
    #[serde(rename = "zha")]
    Zha,
    #[serde(rename = "unknown")]
    Unknown,
}

/// How members of one backend split into native groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionRule {
    /// One native group per detected capability.
    PerCapability,
    /// A single native group for the whole backend.
    SingleTier,
}

impl Backend {
    /// Backends that can host native groups.
    pub const NATIVE: [Backend; 3] = [Backend::ZWaveJs, Backend::Zigbee2Mqtt, Backend::Zha];

    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::ZWaveJs => "zwave_js",
            Backend::Zigbee2Mqtt => "zigbee2mqtt",
            Backend::Zha => "zha",
            Backend::Unknown => "unknown",
        }
    }

    pub fn partition_rule(&self) -> PartitionRule {
        match self {
            // Z-Wave multicast must use one command class for every node.
            Backend::ZWaveJs => PartitionRule::PerCapability,
            Backend::Zigbee2Mqtt | Backend::Zha | Backend::Unknown => PartitionRule::SingleTier,
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Backend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "zwave_js" => Ok(Backend::ZWaveJs),
            "zigbee2mqtt" => Ok(Backend::Zigbee2Mqtt),
            "zha" => Ok(Backend::Zha),
            "unknown" => Ok(Backend::Unknown),
            other => Err(Error::InvalidPartitionKey(format!("unknown backend '{other}'"))),
        }
    }
}

/// What a device can do, as far as group addressing is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    /// On/off only.
    Binary,
    /// Level control.
    Dimmer,
    /// Color and level control.
    Color,
    /// Placeholder for single-tier backends where capability does not split groups.
    Unified,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Binary => "binary",
            Capability::Dimmer => "dimmer",
            Capability::Color => "color",
            Capability::Unified => "unified",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capability {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "binary" => Ok(Capability::Binary),
            "dimmer" => Ok(Capability::Dimmer),
            "color" => Ok(Capability::Color),
            "unified" => Ok(Capability::Unified),
            other => Err(Error::InvalidPartitionKey(format!(
                "unknown capability '{other}'"
            ))),
        }
    }
}

/// Identifies one native group inside a grouping.
///
/// Serialized as `<backend>/<capability>` so it can be used as a JSON map key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartitionKey {
    pub backend: Backend,
    pub capability: Capability,
}

impl PartitionKey {
    pub fn new(backend: Backend, capability: Capability) -> Self {
        Self {
            backend,
            capability,
        }
    }

    /// Key for a classified entity, applying the backend's partition rule.
    pub fn for_entity(backend: Backend, capability: Capability) -> Self {
        match backend.partition_rule() {
            PartitionRule::PerCapability => Self::new(backend, capability),
            PartitionRule::SingleTier => Self::new(backend, Capability::Unified),
        }
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.backend, self.capability)
    }
}

impl FromStr for PartitionKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (backend, capability) = s
            .split_once('/')
            .ok_or_else(|| Error::InvalidPartitionKey(s.to_string()))?;
        Ok(Self::new(backend.parse()?, capability.parse()?))
    }
}

impl Serialize for PartitionKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PartitionKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
