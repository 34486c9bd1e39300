//! Configuration loading.
//!
//! Defaults live in [`defaults`], environment variable names in
//! [`env_vars`]. A [`GroupcastConfig`] is read from TOML, then environment
//! overrides are applied on top, then it is validated.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backend::Backend;
use crate::error::{Error, Result};
use crate::grouping::GroupingKind;

/// Default values.
pub mod defaults {
    /// Quiet period before a changed grouping is reconciled.
    pub const SYNC_DEBOUNCE_MS: u64 = 1_000;
    /// Interval of the periodic full sync.
    pub const RECONCILE_INTERVAL_SECS: u64 = 300;
    /// Upper bound on any single backend or unicast call.
    pub const BACKEND_CALL_TIMEOUT_MS: u64 = 10_000;
    /// Groupings reconciled at once during a full sync.
    pub const MAX_CONCURRENT_RECONCILES: usize = 8;
    /// Capacity of the change signal queue.
    pub const CHANGE_QUEUE_CAPACITY: usize = 1_024;
    pub const STORE_PATH: &str = "data/groupcast.redb";
    pub const STORE_BACKEND: &str = "redb";
    pub const Z2M_BASE_TOPIC: &str = "zigbee2mqtt";
    /// Pause between creating a bridge group and adding members.
    pub const Z2M_GROUP_SETTLE_MS: u64 = 200;
    /// Pause between setting device states and storing a scene.
    pub const Z2M_SCENE_STORE_DELAY_MS: u64 = 500;
    /// Pause between setting ZHA member states and storing a scene.
    pub const ZHA_SCENE_STORE_DELAY_MS: u64 = 500;
}

/// Environment variable names.
pub mod env_vars {
    pub const CONFIG_PATH: &str = "GROUPCAST_CONFIG";
    pub const STORE_PATH: &str = "GROUPCAST_STORE_PATH";
    pub const SYNC_DEBOUNCE_MS: &str = "GROUPCAST_SYNC_DEBOUNCE_MS";
    pub const RECONCILE_INTERVAL_SECS: &str = "GROUPCAST_RECONCILE_INTERVAL_SECS";
    pub const BACKEND_CALL_TIMEOUT_MS: &str = "GROUPCAST_BACKEND_CALL_TIMEOUT_MS";
    pub const Z2M_BASE_TOPIC: &str = "GROUPCAST_Z2M_BASE_TOPIC";
    /// Set to `1` or `true` for JSON log output.
    pub const LOG_JSON: &str = "GROUPCAST_LOG_JSON";

    /// Config file path from the environment, if set.
    pub fn config_path() -> Option<String> {
        std::env::var(CONFIG_PATH).ok()
    }

    /// Whether JSON logging is requested.
    pub fn log_json() -> bool {
        std::env::var(LOG_JSON)
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }

    pub(crate) fn parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
        std::env::var(name).ok().and_then(|s| s.parse().ok())
    }
}

/// Which grouping kinds get native groups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupingToggles {
    pub groups: bool,
    pub scenes: bool,
    pub areas: bool,
    pub floors: bool,
    pub labels: bool,
}

impl Default for GroupingToggles {
    fn default() -> Self {
        Self {
            groups: true,
            scenes: true,
            areas: true,
            floors: true,
            labels: true,
        }
    }
}

impl GroupingToggles {
    pub fn enabled(&self, kind: GroupingKind) -> bool {
        match kind {
            GroupingKind::Group => self.groups,
            GroupingKind::Scene => self.scenes,
            GroupingKind::Area => self.areas,
            GroupingKind::Floor => self.floors,
            GroupingKind::Label => self.labels,
        }
    }
}

/// Zigbee2MQTT bridge settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Zigbee2MqttConfig {
    pub base_topic: String,
    pub group_settle_ms: u64,
    pub scene_store_delay_ms: u64,
}

impl Default for Zigbee2MqttConfig {
    fn default() -> Self {
        Self {
            base_topic: defaults::Z2M_BASE_TOPIC.to_string(),
            group_settle_ms: defaults::Z2M_GROUP_SETTLE_MS,
            scene_store_delay_ms: defaults::Z2M_SCENE_STORE_DELAY_MS,
        }
    }
}

/// ZHA gateway settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZhaConfig {
    pub scene_store_delay_ms: u64,
}

impl Default for ZhaConfig {
    fn default() -> Self {
        Self {
            scene_store_delay_ms: defaults::ZHA_SCENE_STORE_DELAY_MS,
        }
    }
}

/// Mapping store settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// `redb` or `memory`.
    pub backend: String,
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: defaults::STORE_BACKEND.to_string(),
            path: defaults::STORE_PATH.to_string(),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupcastConfig {
    pub enabled_backends: Vec<Backend>,
    pub groupings: GroupingToggles,
    pub store: StoreConfig,
    pub sync_debounce_ms: u64,
    pub reconcile_interval_secs: u64,
    pub backend_call_timeout_ms: u64,
    pub max_concurrent_reconciles: usize,
    pub change_queue_capacity: usize,
    pub zigbee2mqtt: Zigbee2MqttConfig,
    pub zha: ZhaConfig,
}

impl Default for GroupcastConfig {
    fn default() -> Self {
        Self {
            enabled_backends: Backend::NATIVE.to_vec(),
            groupings: GroupingToggles::default(),
            store: StoreConfig::default(),
            sync_debounce_ms: defaults::SYNC_DEBOUNCE_MS,
            reconcile_interval_secs: defaults::RECONCILE_INTERVAL_SECS,
            backend_call_timeout_ms: defaults::BACKEND_CALL_TIMEOUT_MS,
            max_concurrent_reconciles: defaults::MAX_CONCURRENT_RECONCILES,
            change_queue_capacity: defaults::CHANGE_QUEUE_CAPACITY,
            zigbee2mqtt: Zigbee2MqttConfig::default(),
            zha: ZhaConfig::default(),
        }
    }
}

impl GroupcastConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load from a TOML file, apply environment overrides and validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        tracing::info!(category = "config", path = %path.display(), "Loading config");
        let mut config = Self::from_toml_str(&content)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load from `GROUPCAST_CONFIG` if set, otherwise defaults with overrides.
    pub fn from_env() -> Result<Self> {
        match env_vars::config_path() {
            Some(path) => Self::load(path),
            None => {
                let mut config = Self::default();
                config.apply_env_overrides();
                config.validate()?;
                Ok(config)
            }
        }
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var(env_vars::STORE_PATH) {
            self.store.path = path;
        }
        if let Some(ms) = env_vars::parsed(env_vars::SYNC_DEBOUNCE_MS) {
            self.sync_debounce_ms = ms;
        }
        if let Some(secs) = env_vars::parsed(env_vars::RECONCILE_INTERVAL_SECS) {
            self.reconcile_interval_secs = secs;
        }
        if let Some(ms) = env_vars::parsed(env_vars::BACKEND_CALL_TIMEOUT_MS) {
            self.backend_call_timeout_ms = ms;
        }
        if let Ok(topic) = std::env::var(env_vars::Z2M_BASE_TOPIC) {
            self.zigbee2mqtt.base_topic = topic;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.enabled_backends.contains(&Backend::Unknown) {
            return Err(Error::Config("'unknown' is not a native backend".into()));
        }
        if self.backend_call_timeout_ms == 0 {
            return Err(Error::Config("backend_call_timeout_ms must be positive".into()));
        }
        if self.reconcile_interval_secs == 0 {
            return Err(Error::Config("reconcile_interval_secs must be positive".into()));
        }
        if self.max_concurrent_reconciles == 0 {
            return Err(Error::Config("max_concurrent_reconciles must be positive".into()));
        }
        if self.change_queue_capacity == 0 {
            return Err(Error::Config("change_queue_capacity must be positive".into()));
        }
        let topic = &self.zigbee2mqtt.base_topic;
        if topic.is_empty() || topic.ends_with('/') || topic.contains(['+', '#']) {
            return Err(Error::Config(format!("invalid zigbee2mqtt base topic '{topic}'")));
        }
        if !matches!(self.store.backend.as_str(), "redb" | "memory") {
            return Err(Error::Config(format!("unknown store backend '{}'", self.store.backend)));
        }
        Ok(())
    }

    pub fn backend_enabled(&self, backend: Backend) -> bool {
        self.enabled_backends.contains(&backend)
    }

    pub fn sync_debounce(&self) -> Duration {
        Duration::from_millis(self.sync_debounce_ms)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }

    pub fn backend_call_timeout(&self) -> Duration {
        Duration::from_millis(self.backend_call_timeout_ms)
    }
}
