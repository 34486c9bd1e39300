//! Commands and dispatch targets.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::entity::entity_domain;

/// A service call in the host's vocabulary (`light.turn_on` with data).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub domain: String,
    pub service: String,
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl Command {
    pub fn new(domain: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            service: service.into(),
            data: Map::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.data.get(key).and_then(Value::as_f64)
    }

    /// `[a, b, c, ...]` numeric array attribute.
    pub fn get_f64_list(&self, key: &str) -> Option<Vec<f64>> {
        self.data
            .get(key)?
            .as_array()?
            .iter()
            .map(Value::as_f64)
            .collect()
    }

    /// Brightness on the 0..=255 scale, accepting `brightness_pct` too.
    pub fn brightness(&self) -> Option<u8> {
        if let Some(b) = self.get_f64("brightness") {
            return Some(b.clamp(0.0, 255.0).round() as u8);
        }
        self.get_f64("brightness_pct")
            .map(|pct| (pct.clamp(0.0, 100.0) * 255.0 / 100.0).round() as u8)
    }

    /// Scene activation (`scene.turn_on`).
    pub fn is_scene_activation(&self) -> bool {
        self.domain == "scene" && self.service == "turn_on"
    }

    /// Rebuild a per-entity command from a stored target state.
    ///
    /// Accepts either a bare state string (`"on"`) or an object with a
    /// `state` field plus attributes. Returns `None` when the state has no
    /// service equivalent.
    pub fn from_target_state(entity_id: &str, target: &Value) -> Option<Self> {
        let domain = entity_domain(entity_id);
        let (state, attrs) = match target {
            Value::String(s) => (s.as_str(), None),
            Value::Object(obj) => (obj.get("state")?.as_str()?, Some(obj)),
            _ => return None,
        };

        let mut command = match (domain, state) {
            ("cover", "open") => Command::new(domain, "open_cover"),
            ("cover", "closed") => Command::new(domain, "close_cover"),
            (_, "on") => Command::new(domain, "turn_on"),
            (_, "off") => Command::new(domain, "turn_off"),
            _ => return None,
        };

        if let Some(attrs) = attrs {
            if domain == "cover" {
                if let Some(position) = attrs.get("current_position").or_else(|| attrs.get("position")) {
                    command = Command::new(domain, "set_cover_position").with("position", position.clone());
                }
            } else if command.service == "turn_on" {
                for key in TARGET_STATE_ATTRIBUTES {
                    if let Some(value) = attrs.get(*key) {
                        if !value.is_null() {
                            command.data.insert((*key).to_string(), value.clone());
                        }
                    }
                }
            }
        }
        Some(command)
    }
}

/// Attributes carried from a scene target state into a `turn_on` call.
const TARGET_STATE_ATTRIBUTES: &[&str] = &[
    "brightness",
    "color_temp",
    "color_temp_kelvin",
    "hs_color",
    "rgb_color",
    "rgbw_color",
    "rgbww_color",
    "xy_color",
    "transition",
];

/// What a dispatch is aimed at.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchTarget {
    #[serde(default)]
    pub entity_ids: Vec<String>,
    #[serde(default)]
    pub area_ids: Vec<String>,
    #[serde(default)]
    pub floor_ids: Vec<String>,
    #[serde(default)]
    pub label_ids: Vec<String>,
}

impl DispatchTarget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entity(mut self, id: impl Into<String>) -> Self {
        self.entity_ids.push(id.into());
        self
    }

    pub fn area(mut self, id: impl Into<String>) -> Self {
        self.area_ids.push(id.into());
        self
    }

    pub fn floor(mut self, id: impl Into<String>) -> Self {
        self.floor_ids.push(id.into());
        self
    }

    pub fn label(mut self, id: impl Into<String>) -> Self {
        self.label_ids.push(id.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.entity_ids.is_empty()
            && self.area_ids.is_empty()
            && self.floor_ids.is_empty()
            && self.label_ids.is_empty()
    }
}
