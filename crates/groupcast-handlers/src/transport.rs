//! Wire-level collaborators implemented by the host.

use async_trait::async_trait;
use groupcast_core::{SlotId, TransportResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A value write addressed to one command class property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueWrite {
    pub command_class: u8,
    pub property: String,
    pub value: Value,
    /// Transition duration in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
}

impl ValueWrite {
    pub fn new(command_class: u8, property: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            command_class,
            property: property.into(),
            value: value.into(),
            duration: None,
        }
    }

    pub fn with_duration(mut self, duration: Option<f64>) -> Self {
        self.duration = duration;
        self
    }
}

/// Z-Wave JS server connection.
#[async_trait]
pub trait ZWaveClient: Send + Sync {
    /// Whether the controller knows `node`.
    async fn node_exists(&self, node: u16) -> TransportResult<bool>;

    /// One multicast frame to every node in `nodes`.
    async fn multicast_set_value(&self, nodes: &[u16], write: &ValueWrite) -> TransportResult<()>;

    /// Invoke a command class API method on one node.
    async fn invoke_cc_api(
        &self,
        node: u16,
        command_class: u8,
        method: &str,
        args: Vec<Value>,
    ) -> TransportResult<()>;
}

/// MQTT client used to reach a Zigbee2MQTT bridge.
#[async_trait]
pub trait MqttPublisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: &str) -> TransportResult<()>;
}

/// A group as reported by the ZHA gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZhaGroupInfo {
    pub group_id: u16,
    pub name: String,
    /// Member IEEE addresses.
    pub members: Vec<String>,
}

/// Scenes cluster commands addressed to a ZHA group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZhaSceneCommand {
    Store,
    Recall,
    Remove,
}

/// The host's ZHA gateway.
#[async_trait]
pub trait ZhaGateway: Send + Sync {
    async fn list_groups(&self) -> TransportResult<Vec<ZhaGroupInfo>>;

    /// Create a group. The gateway may assign a different id than requested;
    /// the returned id is authoritative.
    async fn create_group(&self, name: &str, members: &[String], group_id: u16) -> TransportResult<u16>;

    async fn add_members(&self, group_id: u16, members: &[String]) -> TransportResult<()>;

    async fn remove_members(&self, group_id: u16, members: &[String]) -> TransportResult<()>;

    async fn remove_group(&self, group_id: u16) -> TransportResult<()>;

    /// Send a Scenes cluster command for `scene_id` to every member of the
    /// group.
    async fn scene_command(&self, group_id: u16, command: ZhaSceneCommand, scene_id: SlotId) -> TransportResult<()>;

    /// Call a host service on the group's entity.
    async fn call_service(
        &self,
        domain: &str,
        service: &str,
        data: Map<String, Value>,
    ) -> TransportResult<()>;
}
