//! Entity descriptors as reported by the host's entity registry.

use serde::{Deserialize, Serialize};

/// Domain part of an entity id (`light.kitchen` -> `light`).
pub fn entity_domain(entity_id: &str) -> &str {
    entity_id
        .split_once('.')
        .map(|(domain, _)| domain)
        .unwrap_or(entity_id)
}

/// Device the entity belongs to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub device_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// `(integration, identifier)` pairs from the device registry.
    #[serde(default)]
    pub identifiers: Vec<(String, String)>,
}

impl DeviceDescriptor {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            ..Default::default()
        }
    }

    pub fn with_identifier(mut self, integration: impl Into<String>, id: impl Into<String>) -> Self {
        self.identifiers.push((integration.into(), id.into()));
        self
    }
}

/// Registry view of a single entity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityDescriptor {
    pub entity_id: String,
    /// Integration that provides the entity (`zwave_js`, `mqtt`, `zha`, ...).
    pub platform: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<DeviceDescriptor>,
    #[serde(default)]
    pub supported_color_modes: Vec<String>,
    #[serde(default)]
    pub supported_features: u32,
}

impl EntityDescriptor {
    pub fn new(entity_id: impl Into<String>, platform: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            platform: platform.into(),
            ..Default::default()
        }
    }

    pub fn with_unique_id(mut self, unique_id: impl Into<String>) -> Self {
        self.unique_id = Some(unique_id.into());
        self
    }

    pub fn with_device(mut self, device: DeviceDescriptor) -> Self {
        self.device = Some(device);
        self
    }

    pub fn with_color_modes<I, S>(mut self, modes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.supported_color_modes = modes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_features(mut self, features: u32) -> Self {
        self.supported_features = features;
        self
    }

    pub fn domain(&self) -> &str {
        entity_domain(&self.entity_id)
    }
}
