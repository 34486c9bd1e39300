//! The set of handlers available to the orchestrator.

use std::collections::BTreeMap;
use std::sync::Arc;
#[cfg(feature = "zha")]
use std::time::Duration;

use groupcast_core::config::{GroupcastConfig, Zigbee2MqttConfig, ZhaConfig};
use groupcast_core::Backend;

use crate::handler::ProtocolHandler;
use crate::scene::SceneSlotTable;
#[cfg(feature = "zha")]
use crate::transport::ZhaGateway;
#[cfg(feature = "zigbee2mqtt")]
use crate::transport::MqttPublisher;
#[cfg(feature = "zwave_js")]
use crate::transport::ZWaveClient;

/// Handlers keyed by backend, sharing one scene slot table.
#[derive(Clone)]
pub struct HandlerSet {
    handlers: BTreeMap<Backend, Arc<dyn ProtocolHandler>>,
    slots: Arc<SceneSlotTable>,
}

impl HandlerSet {
    pub fn builder() -> HandlerSetBuilder {
        HandlerSetBuilder::default()
    }

    pub fn get(&self, backend: Backend) -> Option<&Arc<dyn ProtocolHandler>> {
        self.handlers.get(&backend)
    }

    pub fn backends(&self) -> impl Iterator<Item = Backend> + '_ {
        self.handlers.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Backend, &Arc<dyn ProtocolHandler>)> {
        self.handlers.iter().map(|(backend, handler)| (*backend, handler))
    }

    pub fn scene_slots(&self) -> &Arc<SceneSlotTable> {
        &self.slots
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Builds a [`HandlerSet`] from the transports the host has.
#[derive(Default)]
pub struct HandlerSetBuilder {
    #[cfg(feature = "zwave_js")]
    zwave_js: Option<Arc<dyn ZWaveClient>>,
    #[cfg(feature = "zigbee2mqtt")]
    zigbee2mqtt: Option<Arc<dyn MqttPublisher>>,
    #[cfg(feature = "zha")]
    zha: Option<Arc<dyn ZhaGateway>>,
    custom: Vec<Arc<dyn ProtocolHandler>>,
    slots: Option<Arc<SceneSlotTable>>,
    bridge: Zigbee2MqttConfig,
    coordinator: ZhaConfig,
    enabled: Option<Vec<Backend>>,
}

impl HandlerSetBuilder {
    /// Take bridge and coordinator settings and the enabled backend list
    /// from `config`.
    pub fn config(mut self, config: &GroupcastConfig) -> Self {
        self.bridge = config.zigbee2mqtt.clone();
        self.coordinator = config.zha.clone();
        self.enabled = Some(config.enabled_backends.clone());
        self
    }

    pub fn scene_slots(mut self, slots: Arc<SceneSlotTable>) -> Self {
        self.slots = Some(slots);
        self
    }

    #[cfg(feature = "zwave_js")]
    pub fn zwave_js(mut self, client: Arc<dyn ZWaveClient>) -> Self {
        self.zwave_js = Some(client);
        self
    }

    #[cfg(feature = "zigbee2mqtt")]
    pub fn zigbee2mqtt(mut self, publisher: Arc<dyn MqttPublisher>) -> Self {
        self.zigbee2mqtt = Some(publisher);
        self
    }

    #[cfg(feature = "zha")]
    pub fn zha(mut self, gateway: Arc<dyn ZhaGateway>) -> Self {
        self.zha = Some(gateway);
        self
    }

    /// Register a custom handler under its own backend. Replaces a built-in
    /// handler for the same backend.
    pub fn handler(mut self, handler: Arc<dyn ProtocolHandler>) -> Self {
        self.custom.push(handler);
        self
    }

    pub fn build(self) -> HandlerSet {
        let slots = self.slots.unwrap_or_default();
        let mut handlers: BTreeMap<Backend, Arc<dyn ProtocolHandler>> = BTreeMap::new();

        #[cfg(feature = "zwave_js")]
        if let Some(client) = self.zwave_js {
            let handler = crate::handlers::ZWaveJsHandler::new(client, Arc::clone(&slots));
            handlers.insert(Backend::ZWaveJs, Arc::new(handler));
        }
        #[cfg(feature = "zigbee2mqtt")]
        if let Some(publisher) = self.zigbee2mqtt {
            let handler =
                crate::handlers::Zigbee2MqttHandler::new(publisher, self.bridge.clone(), Arc::clone(&slots));
            handlers.insert(Backend::Zigbee2Mqtt, Arc::new(handler));
        }
        #[cfg(feature = "zha")]
        if let Some(gateway) = self.zha {
            let handler = crate::handlers::ZhaHandler::new(gateway, Arc::clone(&slots))
                .with_scene_store_delay(Duration::from_millis(self.coordinator.scene_store_delay_ms));
            handlers.insert(Backend::Zha, Arc::new(handler));
        }
        for handler in self.custom {
            handlers.insert(handler.backend(), handler);
        }

        if let Some(enabled) = &self.enabled {
            handlers.retain(|backend, _| {
                let keep = enabled.contains(backend);
                if !keep {
                    tracing::info!(%backend, "Handler disabled by configuration");
                }
                keep
            });
        }
        tracing::debug!(handlers = handlers.len(), "Protocol handlers ready");
        HandlerSet { handlers, slots }
    }
}
