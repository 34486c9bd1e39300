//! Protocol handlers for groupcast.
//!
//! A [`ProtocolHandler`] owns the native group lifecycle for one backend:
//! create or update, delete, send, and device-stored scenes. Handlers talk
//! to the network through small transport traits in [`transport`] that the
//! host implements on top of its MQTT client, Z-Wave JS connection or ZHA
//! gateway.
//!
//! ## Feature Flags
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `zwave_js` | Z-Wave multicast handler (default) |
//! | `zigbee2mqtt` | Zigbee2MQTT bridge group handler (default) |
//! | `zha` | ZHA coordinator group handler (default) |

pub mod error;
pub mod handler;
pub mod handlers;
pub mod registry;
pub mod scene;
pub mod transport;

pub use error::{HandlerError, HandlerResult};
pub use handler::{native_group_name, GroupSpec, ProtocolHandler, MANAGED_PREFIX};
pub use registry::{HandlerSet, HandlerSetBuilder};
pub use scene::{SceneSlotTable, SCENE_SLOTS};
pub use transport::{MqttPublisher, ValueWrite, ZWaveClient, ZhaGateway, ZhaGroupInfo, ZhaSceneCommand};
