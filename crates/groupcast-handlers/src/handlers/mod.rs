//! Protocol handler implementations, one per backend.

#[cfg(feature = "zwave_js")]
pub mod color;
#[cfg(feature = "zwave_js")]
pub mod zwave_js;
#[cfg(feature = "zwave_js")]
pub use zwave_js::ZWaveJsHandler;

#[cfg(feature = "zigbee2mqtt")]
pub mod zigbee2mqtt;
#[cfg(feature = "zigbee2mqtt")]
pub use zigbee2mqtt::Zigbee2MqttHandler;

#[cfg(feature = "zha")]
pub mod zha;
#[cfg(feature = "zha")]
pub use zha::ZhaHandler;

/// Handler backends compiled into this build.
pub fn available_handlers() -> Vec<&'static str> {
    let mut handlers = Vec::new();
    #[cfg(feature = "zwave_js")]
    handlers.push("zwave_js");
    #[cfg(feature = "zigbee2mqtt")]
    handlers.push("zigbee2mqtt");
    #[cfg(feature = "zha")]
    handlers.push("zha");
    handlers
}
