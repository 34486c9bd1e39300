//! Z-Wave multicast handler.
//!
//! Z-Wave has no stored groups: a "group" is a node list addressed in one
//! multicast frame, and every node in the frame must understand the same
//! command class. Groups are therefore split per capability and the handle
//! carries both the node list and the capability.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use groupcast_core::{Backend, Capability, Command, NativeHandle, SceneEntry, SlotId};
use serde_json::{json, Value};

use super::color;
use crate::error::{HandlerError, HandlerResult};
use crate::handler::{GroupSpec, ProtocolHandler};
use crate::scene::SceneSlotTable;
use crate::transport::{ValueWrite, ZWaveClient};

pub const CC_BINARY_SWITCH: u8 = 37;
pub const CC_MULTILEVEL_SWITCH: u8 = 38;
pub const CC_SCENE_ACTIVATION: u8 = 43;
pub const CC_SCENE_ACTUATOR_CONFIGURATION: u8 = 44;
pub const CC_COLOR_SWITCH: u8 = 51;

/// Highest Multilevel Switch level.
const MAX_LEVEL: u8 = 99;

pub struct ZWaveJsHandler {
    client: Arc<dyn ZWaveClient>,
    slots: Arc<SceneSlotTable>,
}

impl ZWaveJsHandler {
    pub fn new(client: Arc<dyn ZWaveClient>, slots: Arc<SceneSlotTable>) -> Self {
        Self { client, slots }
    }
}

/// Brightness 0..=255 to Multilevel level 0..=99.
pub fn brightness_to_level(brightness: u8) -> u8 {
    (u16::from(brightness) * u16::from(MAX_LEVEL) / 255) as u8
}

/// Value writes that carry `command` to a group of `capability`, or `None`
/// when the group cannot express it.
pub fn plan_writes(capability: Capability, command: &Command) -> Option<Vec<ValueWrite>> {
    let duration = command.get_f64("transition");
    let binary = |on: bool| ValueWrite::new(CC_BINARY_SWITCH, "targetValue", on).with_duration(duration);
    let level = |level: u8| ValueWrite::new(CC_MULTILEVEL_SWITCH, "targetValue", level).with_duration(duration);

    let writes = match (command.domain.as_str(), command.service.as_str()) {
        ("switch", "turn_on") => vec![binary(true)],
        ("switch", "turn_off") => vec![binary(false)],
        ("light", "turn_off") => vec![binary(false)],
        ("light", "turn_on") => match capability {
            Capability::Color => {
                let mut writes = Vec::new();
                if let Some(target) = color::target_color(command) {
                    writes.push(ValueWrite::new(CC_COLOR_SWITCH, "targetColor", target).with_duration(duration));
                }
                if let Some(b) = command.brightness() {
                    writes.push(level(brightness_to_level(b)));
                }
                if writes.is_empty() {
                    writes.push(binary(true));
                }
                writes
            }
            Capability::Dimmer => match command.brightness() {
                Some(b) => vec![level(brightness_to_level(b))],
                None => vec![binary(true)],
            },
            Capability::Binary => vec![binary(true)],
            Capability::Unified => return None,
        },
        ("cover", "open_cover") => match capability {
            Capability::Binary => vec![binary(true)],
            _ => vec![level(MAX_LEVEL)],
        },
        ("cover", "close_cover") => match capability {
            Capability::Binary => vec![binary(false)],
            _ => vec![level(0)],
        },
        ("cover", "set_cover_position") if capability == Capability::Dimmer => {
            let position = command.get_f64("position")?;
            vec![level(position.clamp(0.0, f64::from(MAX_LEVEL)) as u8)]
        }
        _ => return None,
    };
    Some(writes)
}

/// Scene Actuator Configuration level for a stored target state.
fn scene_level(target: &Value) -> u8 {
    let state = target
        .as_str()
        .or_else(|| target.get("state").and_then(Value::as_str));
    if matches!(state, Some("off") | Some("closed")) {
        return 0;
    }
    if let Some(b) = target.get("brightness").and_then(Value::as_f64) {
        return brightness_to_level(b.clamp(0.0, 255.0) as u8);
    }
    if let Some(p) = target.get("current_position").and_then(Value::as_f64) {
        return p.clamp(0.0, f64::from(MAX_LEVEL)) as u8;
    }
    MAX_LEVEL
}

fn scene_duration(target: &Value) -> Value {
    target
        .get("transition")
        .filter(|v| v.is_number())
        .cloned()
        .unwrap_or_else(|| json!("default"))
}

fn parse_node(address: &str) -> HandlerResult<u16> {
    address
        .parse()
        .map_err(|_| HandlerError::BackendRejected(format!("invalid Z-Wave node id '{address}'")))
}

fn multicast_parts(handle: &NativeHandle) -> HandlerResult<(Capability, &[u16])> {
    match handle {
        NativeHandle::Multicast {
            capability, nodes, ..
        } => Ok((*capability, nodes.as_slice())),
        other => Err(HandlerError::BackendRejected(format!(
            "not a Z-Wave multicast handle: {other}"
        ))),
    }
}

/// First error wins; every call still runs.
fn first_error(results: Vec<HandlerResult<()>>) -> HandlerResult<()> {
    results.into_iter().collect::<HandlerResult<Vec<()>>>().map(|_| ())
}

#[async_trait]
impl ProtocolHandler for ZWaveJsHandler {
    fn backend(&self) -> Backend {
        Backend::ZWaveJs
    }

    async fn ensure_group(&self, spec: GroupSpec<'_>) -> HandlerResult<NativeHandle> {
        if spec.key.capability == Capability::Unified {
            return Err(HandlerError::BackendRejected(
                "Z-Wave groups must be split by capability".into(),
            ));
        }

        let mut nodes = spec
            .members
            .iter()
            .map(|m| parse_node(&m.address))
            .collect::<HandlerResult<Vec<u16>>>()?;
        nodes.sort_unstable();
        nodes.dedup();

        let checks = join_all(nodes.iter().map(|&node| self.client.node_exists(node))).await;
        for (node, exists) in nodes.iter().zip(checks) {
            if !exists? {
                return Err(HandlerError::BackendRejected(format!("node {node} is not in the network")));
            }
        }

        tracing::debug!(
            group = %spec.native_name(),
            capability = %spec.key.capability,
            nodes = ?nodes,
            "Z-Wave multicast group ready"
        );
        Ok(NativeHandle::Multicast {
            name: spec.native_name(),
            capability: spec.key.capability,
            nodes,
        })
    }

    async fn delete_group(&self, handle: &NativeHandle) -> HandlerResult<()> {
        // Nothing is stored on the network.
        multicast_parts(handle).map(|_| ())
    }

    async fn send_group_command(&self, handle: &NativeHandle, command: &Command) -> HandlerResult<()> {
        let (capability, nodes) = multicast_parts(handle)?;
        let writes = plan_writes(capability, command).ok_or_else(|| {
            HandlerError::Unsupported(format!(
                "{}.{} on a {capability} group",
                command.domain, command.service
            ))
        })?;

        let results = join_all(writes.iter().map(|write| async move {
            self.client
                .multicast_set_value(nodes, write)
                .await
                .map_err(HandlerError::from)
        }))
        .await;
        first_error(results)
    }

    fn accepts(&self, capability: Capability, command: &Command) -> bool {
        plan_writes(capability, command).is_some()
    }

    fn supports_scenes(&self) -> bool {
        true
    }

    async fn reserve_scene_slot(&self, device: &str) -> HandlerResult<SlotId> {
        self.slots.reserve(Backend::ZWaveJs, device)
    }

    async fn release_scene_slot(&self, device: &str, slot: SlotId) -> HandlerResult<()> {
        self.slots.release(Backend::ZWaveJs, device, slot);
        Ok(())
    }

    async fn store_scene(&self, _handle: &NativeHandle, entries: &[SceneEntry]) -> HandlerResult<()> {
        let results = join_all(entries.iter().map(|entry| async move {
            let node = parse_node(&entry.address)?;
            let args = vec![
                json!(entry.slot),
                json!(scene_level(&entry.target)),
                scene_duration(&entry.target),
            ];
            self.client
                .invoke_cc_api(node, CC_SCENE_ACTUATOR_CONFIGURATION, "set", args)
                .await
                .map_err(HandlerError::from)
        }))
        .await;
        first_error(results)
    }

    async fn recall_scene(&self, _handle: &NativeHandle, entries: &[SceneEntry]) -> HandlerResult<()> {
        let results = join_all(entries.iter().map(|entry| async move {
            let node = parse_node(&entry.address)?;
            self.client
                .invoke_cc_api(node, CC_SCENE_ACTIVATION, "set", vec![json!(entry.slot), json!("default")])
                .await
                .map_err(HandlerError::from)
        }))
        .await;
        first_error(results)
    }

    async fn remove_scene(&self, _handle: &NativeHandle, entries: &[SceneEntry]) -> HandlerResult<()> {
        let results = join_all(entries.iter().map(|entry| async move {
            let node = parse_node(&entry.address)?;
            let args = vec![json!(entry.slot), json!(0), json!("default")];
            self.client
                .invoke_cc_api(node, CC_SCENE_ACTUATOR_CONFIGURATION, "set", args)
                .await
                .map_err(HandlerError::from)
        }))
        .await;
        first_error(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ccs(writes: &[ValueWrite]) -> Vec<u8> {
        writes.iter().map(|w| w.command_class).collect()
    }

    #[test]
    fn test_brightness_to_level() {
        assert_eq!(brightness_to_level(255), 99);
        assert_eq!(brightness_to_level(0), 0);
        assert_eq!(brightness_to_level(128), 49);
    }

    #[test]
    fn test_color_group_gets_two_transmissions() {
        let cmd = Command::new("light", "turn_on")
            .with("brightness", 255)
            .with("hs_color", json!([0, 100]));
        let writes = plan_writes(Capability::Color, &cmd).unwrap();
        assert_eq!(ccs(&writes), vec![CC_COLOR_SWITCH, CC_MULTILEVEL_SWITCH]);
        assert_eq!(writes[1].value, json!(99));
    }

    #[test]
    fn test_dimmer_ignores_color() {
        let cmd = Command::new("light", "turn_on").with("rgb_color", json!([1, 2, 3]));
        assert_eq!(ccs(&plan_writes(Capability::Dimmer, &cmd).unwrap()), vec![CC_BINARY_SWITCH]);

        let cmd = Command::new("light", "turn_on").with("brightness", 51).with("transition", 2);
        let writes = plan_writes(Capability::Dimmer, &cmd).unwrap();
        assert_eq!(writes[0].command_class, CC_MULTILEVEL_SWITCH);
        assert_eq!(writes[0].value, json!(19));
        assert_eq!(writes[0].duration, Some(2.0));
    }

    #[test]
    fn test_binary_always_binary() {
        let cmd = Command::new("light", "turn_on").with("brightness", 10);
        assert_eq!(ccs(&plan_writes(Capability::Binary, &cmd).unwrap()), vec![CC_BINARY_SWITCH]);
        let cmd = Command::new("switch", "turn_off");
        let writes = plan_writes(Capability::Binary, &cmd).unwrap();
        assert_eq!(writes[0].value, json!(false));
    }

    #[test]
    fn test_cover_commands() {
        let cmd = Command::new("cover", "set_cover_position").with("position", 150);
        assert_eq!(plan_writes(Capability::Dimmer, &cmd).unwrap()[0].value, json!(99));
        assert!(plan_writes(Capability::Binary, &cmd).is_none());
        assert!(plan_writes(Capability::Dimmer, &Command::new("cover", "stop_cover")).is_none());
    }

    #[test]
    fn test_unsupported_commands() {
        assert!(plan_writes(Capability::Binary, &Command::new("light", "toggle")).is_none());
        assert!(plan_writes(Capability::Unified, &Command::new("light", "turn_on")).is_none());
        assert!(plan_writes(Capability::Binary, &Command::new("fan", "turn_on")).is_none());
    }

    #[test]
    fn test_scene_level() {
        assert_eq!(scene_level(&json!("off")), 0);
        assert_eq!(scene_level(&json!({"state": "on", "brightness": 255})), 99);
        assert_eq!(scene_level(&json!({"state": "open", "current_position": 40})), 40);
        assert_eq!(scene_level(&json!("on")), 99);
        assert_eq!(scene_duration(&json!({"transition": 3})), json!(3));
        assert_eq!(scene_duration(&json!("on")), json!("default"));
    }
}
