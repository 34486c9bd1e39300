//! Entity classification.
//!
//! Maps a registry descriptor to the backend that owns the device, the
//! device's group capability and its backend-native address. Classification
//! is pure: the same descriptor always yields the same answer.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::backend::{Backend, Capability};
use crate::entity::EntityDescriptor;
use crate::mapping::GroupMember;

/// Entity domains that native groups can address.
pub const GROUPABLE_DOMAINS: &[&str] = &["light", "switch", "cover"];

/// Color modes that imply full color control.
const COLOR_MODES: &[&str] = &["hs", "xy", "rgb", "rgbw", "rgbww"];

/// Color modes that imply level control.
const BRIGHTNESS_MODES: &[&str] = &["brightness", "color_temp", "white", "hs", "xy", "rgb", "rgbw", "rgbww"];

/// Cover feature bit for "set position".
const COVER_SET_POSITION: u32 = 4;

/// Why an entity cannot be grouped natively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownReason {
    NotRegistered,
    UngroupableDomain,
    UnsupportedPlatform,
    MissingAddress,
    BackendDisabled,
}

impl fmt::Display for UnknownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UnknownReason::NotRegistered => "not in entity registry",
            UnknownReason::UngroupableDomain => "domain cannot be grouped",
            UnknownReason::UnsupportedPlatform => "platform has no native groups",
            UnknownReason::MissingAddress => "no native device address",
            UnknownReason::BackendDisabled => "backend disabled",
        };
        f.write_str(s)
    }
}

/// An entity with a native backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedEntity {
    pub entity_id: String,
    pub backend: Backend,
    pub capability: Capability,
    pub address: String,
}

impl ClassifiedEntity {
    pub fn member(&self) -> GroupMember {
        GroupMember::new(self.entity_id.clone(), self.address.clone())
    }
}

/// Outcome of classifying one entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Native(ClassifiedEntity),
    Unknown {
        entity_id: String,
        reason: UnknownReason,
    },
}

impl Classification {
    pub fn entity_id(&self) -> &str {
        match self {
            Classification::Native(entity) => &entity.entity_id,
            Classification::Unknown { entity_id, .. } => entity_id,
        }
    }

    pub fn backend(&self) -> Backend {
        match self {
            Classification::Native(entity) => entity.backend,
            Classification::Unknown { .. } => Backend::Unknown,
        }
    }
}

/// Classifies entity descriptors.
#[derive(Debug, Clone)]
pub struct EntityClassifier {
    enabled: BTreeSet<Backend>,
}

impl Default for EntityClassifier {
    fn default() -> Self {
        Self::new(Backend::NATIVE)
    }
}

impl EntityClassifier {
    pub fn new(enabled: impl IntoIterator<Item = Backend>) -> Self {
        Self {
            enabled: enabled.into_iter().collect(),
        }
    }

    /// Classify `entity_id` given its registry descriptor, if one exists.
    pub fn classify(&self, entity_id: &str, descriptor: Option<&EntityDescriptor>) -> Classification {
        let unknown = |reason| Classification::Unknown {
            entity_id: entity_id.to_string(),
            reason,
        };

        let Some(desc) = descriptor else {
            return unknown(UnknownReason::NotRegistered);
        };
        if !GROUPABLE_DOMAINS.contains(&desc.domain()) {
            return unknown(UnknownReason::UngroupableDomain);
        }

        let backend = detect_backend(desc);
        if backend == Backend::Unknown {
            return unknown(UnknownReason::UnsupportedPlatform);
        }
        if !self.enabled.contains(&backend) {
            return unknown(UnknownReason::BackendDisabled);
        }

        let Some(address) = native_address(backend, desc) else {
            return unknown(UnknownReason::MissingAddress);
        };

        Classification::Native(ClassifiedEntity {
            entity_id: entity_id.to_string(),
            backend,
            capability: detect_capability(desc),
            address,
        })
    }
}

fn detect_backend(desc: &EntityDescriptor) -> Backend {
    match desc.platform.as_str() {
        "zwave_js" => Backend::ZWaveJs,
        "zha" => Backend::Zha,
        "mqtt" if zigbee2mqtt_identifier(desc).is_some() => Backend::Zigbee2Mqtt,
        _ => Backend::Unknown,
    }
}

/// Device identifier announced by a Zigbee2MQTT bridge.
fn zigbee2mqtt_identifier(desc: &EntityDescriptor) -> Option<&str> {
    desc.device
        .as_ref()?
        .identifiers
        .iter()
        .map(|(_, id)| id.as_str())
        .find(|id| id.contains("zigbee2mqtt"))
}

fn native_address(backend: Backend, desc: &EntityDescriptor) -> Option<String> {
    match backend {
        // unique id is `<home_id>-<node_id>-<value id...>`
        Backend::ZWaveJs => {
            let node = desc.unique_id.as_deref()?.split('-').nth(1)?;
            node.parse::<u16>().ok().map(|n| n.to_string())
        }
        // unique id is `<ieee>-<endpoint>`
        Backend::Zha => {
            let ieee = desc.unique_id.as_deref()?.split('-').next()?;
            (!ieee.is_empty()).then(|| ieee.to_string())
        }
        Backend::Zigbee2Mqtt => {
            let id = zigbee2mqtt_identifier(desc)?;
            Some(match find_hex_address(id) {
                Some(ieee) => ieee.to_string(),
                None => id.replace("zigbee2mqtt_", ""),
            })
        }
        Backend::Unknown => None,
    }
}

/// First `0x`-prefixed hex run in `s`.
fn find_hex_address(s: &str) -> Option<&str> {
    let start = s.find("0x")?;
    let digits = s[start + 2..]
        .find(|c: char| !c.is_ascii_hexdigit())
        .unwrap_or(s.len() - start - 2);
    (digits > 0).then(|| &s[start..start + 2 + digits])
}

fn detect_capability(desc: &EntityDescriptor) -> Capability {
    match desc.domain() {
        "light" => {
            let has = |modes: &[&str]| {
                desc.supported_color_modes
                    .iter()
                    .any(|m| modes.contains(&m.as_str()))
            };
            if desc.supported_color_modes.is_empty() {
                Capability::Dimmer
            } else if has(COLOR_MODES) {
                Capability::Color
            } else if has(BRIGHTNESS_MODES) {
                Capability::Dimmer
            } else {
                Capability::Binary
            }
        }
        "cover" if desc.supported_features & COVER_SET_POSITION != 0 => Capability::Dimmer,
        _ => Capability::Binary,
    }
}
