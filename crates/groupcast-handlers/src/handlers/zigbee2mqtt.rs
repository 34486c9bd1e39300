//! Zigbee2MQTT bridge group handler.
//!
//! Groups live on the bridge and are addressed by friendly name. The bridge
//! API is fire-and-forget over MQTT, so membership is reconciled against the
//! membership recorded in the previous mapping rather than read back.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use groupcast_core::config::Zigbee2MqttConfig;
use groupcast_core::{Backend, Capability, Command, NativeHandle, SceneEntry, SlotId};
use serde_json::{json, Map, Value};

use crate::error::{HandlerError, HandlerResult};
use crate::handler::{GroupSpec, ProtocolHandler};
use crate::scene::SceneSlotTable;
use crate::transport::MqttPublisher;

pub struct Zigbee2MqttHandler {
    publisher: Arc<dyn MqttPublisher>,
    config: Zigbee2MqttConfig,
    slots: Arc<SceneSlotTable>,
}

impl Zigbee2MqttHandler {
    pub fn new(
        publisher: Arc<dyn MqttPublisher>,
        config: Zigbee2MqttConfig,
        slots: Arc<SceneSlotTable>,
    ) -> Self {
        Self {
            publisher,
            config,
            slots,
        }
    }

    fn bridge_topic(&self, request: &str) -> String {
        format!("{}/bridge/request/{}", self.config.base_topic, request)
    }

    fn set_topic(&self, target: &str) -> String {
        format!("{}/{}/set", self.config.base_topic, target)
    }

    async fn publish(&self, topic: &str, payload: &Value) -> HandlerResult<()> {
        tracing::trace!(topic, %payload, "zigbee2mqtt publish");
        self.publisher
            .publish(topic, &payload.to_string())
            .await
            .map_err(HandlerError::from)
    }

    async fn change_members(&self, group: &str, devices: &BTreeSet<String>, add: bool) -> HandlerResult<()> {
        let topic = self.bridge_topic(if add {
            "group/members/add"
        } else {
            "group/members/remove"
        });
        let results = join_all(devices.iter().map(|device| {
            let payload = json!({ "group": group, "device": device });
            let topic = topic.clone();
            async move { self.publish(&topic, &payload).await }
        }))
        .await;
        results.into_iter().collect::<HandlerResult<Vec<()>>>().map(|_| ())
    }

    /// Publish a scene command, to the whole group when every entry shares a
    /// slot and per device otherwise.
    async fn scene_command(&self, handle: &NativeHandle, entries: &[SceneEntry], verb: &str) -> HandlerResult<()> {
        let group = broker_name(handle)?;
        let mut by_slot: BTreeMap<SlotId, Vec<&SceneEntry>> = BTreeMap::new();
        for entry in entries {
            by_slot.entry(entry.slot).or_default().push(entry);
        }

        if by_slot.len() == 1 {
            if let Some(slot) = by_slot.keys().next() {
                return self.publish(&self.set_topic(group), &scene_payload(verb, *slot)).await;
            }
        }
        let results = join_all(entries.iter().map(|entry| async move {
            self.publish(&self.set_topic(&entry.address), &scene_payload(verb, entry.slot))
                .await
        }))
        .await;
        results.into_iter().collect::<HandlerResult<Vec<()>>>().map(|_| ())
    }
}

fn scene_payload(verb: &str, slot: SlotId) -> Value {
    let mut payload = Map::new();
    payload.insert(verb.to_string(), json!(slot));
    Value::Object(payload)
}

fn broker_name(handle: &NativeHandle) -> HandlerResult<&str> {
    match handle {
        NativeHandle::BrokerGroup { friendly_name } => Ok(friendly_name),
        other => Err(HandlerError::BackendRejected(format!(
            "not a Zigbee2MQTT group handle: {other}"
        ))),
    }
}

/// Bridge payload for a host command, or `None` when there is no equivalent.
pub fn convert_command(command: &Command) -> Option<Map<String, Value>> {
    let mut payload = Map::new();
    let transition = command.get("transition").cloned();

    match (command.domain.as_str(), command.service.as_str()) {
        ("light", "turn_on") => {
            payload.insert("state".into(), json!("ON"));
            if let Some(b) = command.brightness() {
                payload.insert("brightness".into(), json!(b));
            }
            if let Some(ct) = command.get("color_temp") {
                payload.insert("color_temp".into(), ct.clone());
            }
            if let Some(c) = command.get_f64_list("rgb_color").filter(|c| c.len() >= 3) {
                payload.insert("color".into(), json!({ "r": c[0], "g": c[1], "b": c[2] }));
            } else if let Some(c) = command.get_f64_list("xy_color").filter(|c| c.len() == 2) {
                payload.insert("color".into(), json!({ "x": c[0], "y": c[1] }));
            } else if let Some(c) = command.get_f64_list("hs_color").filter(|c| c.len() == 2) {
                payload.insert("color".into(), json!({ "hue": c[0], "saturation": c[1] }));
            }
            if let Some(t) = transition {
                payload.insert("transition".into(), t);
            }
        }
        ("light", "turn_off") => {
            payload.insert("state".into(), json!("OFF"));
            if let Some(t) = transition {
                payload.insert("transition".into(), t);
            }
        }
        ("light" | "switch", "toggle") => {
            payload.insert("state".into(), json!("TOGGLE"));
        }
        ("switch", "turn_on") => {
            payload.insert("state".into(), json!("ON"));
        }
        ("switch", "turn_off") => {
            payload.insert("state".into(), json!("OFF"));
        }
        ("cover", "open_cover") => {
            payload.insert("state".into(), json!("OPEN"));
        }
        ("cover", "close_cover") => {
            payload.insert("state".into(), json!("CLOSE"));
        }
        ("cover", "stop_cover") => {
            payload.insert("state".into(), json!("STOP"));
        }
        ("cover", "set_cover_position") => {
            payload.insert("position".into(), command.get("position")?.clone());
        }
        _ => return None,
    }
    Some(payload)
}

/// Device payload that puts a member into its scene target state.
fn target_payload(entity_id: &str, target: &Value) -> Option<Value> {
    Command::from_target_state(entity_id, target)
        .as_ref()
        .and_then(convert_command)
        .map(Value::Object)
}

#[async_trait]
impl ProtocolHandler for Zigbee2MqttHandler {
    fn backend(&self) -> Backend {
        Backend::Zigbee2Mqtt
    }

    async fn ensure_group(&self, spec: GroupSpec<'_>) -> HandlerResult<NativeHandle> {
        if spec.key.capability != Capability::Unified {
            return Err(HandlerError::BackendRejected(
                "Zigbee2MQTT groups are not split by capability".into(),
            ));
        }

        let desired: BTreeSet<String> = spec.members.iter().map(|m| m.address.clone()).collect();
        let reuse = spec
            .existing
            .and_then(|g| broker_name(&g.handle).ok().map(str::to_string));

        let (name, recorded) = match reuse {
            Some(name) => (name, spec.existing_addresses()),
            None => {
                let name = spec.native_name();
                self.publish(&self.bridge_topic("group/add"), &json!({ "friendly_name": name }))
                    .await?;
                // The bridge answers asynchronously; give it time to register the group.
                tokio::time::sleep(Duration::from_millis(self.config.group_settle_ms)).await;
                (name, BTreeSet::new())
            }
        };

        let to_add: BTreeSet<String> = desired.difference(&recorded).cloned().collect();
        let to_remove: BTreeSet<String> = recorded.difference(&desired).cloned().collect();
        self.change_members(&name, &to_add, true).await?;
        self.change_members(&name, &to_remove, false).await?;

        tracing::debug!(
            group = %name,
            added = to_add.len(),
            removed = to_remove.len(),
            "Zigbee2MQTT group ready"
        );
        Ok(NativeHandle::BrokerGroup { friendly_name: name })
    }

    async fn delete_group(&self, handle: &NativeHandle) -> HandlerResult<()> {
        let name = broker_name(handle)?;
        // The bridge ignores removal of unknown groups.
        self.publish(&self.bridge_topic("group/remove"), &json!({ "friendly_name": name }))
            .await
    }

    async fn send_group_command(&self, handle: &NativeHandle, command: &Command) -> HandlerResult<()> {
        let name = broker_name(handle)?;
        let payload = convert_command(command).ok_or_else(|| {
            HandlerError::Unsupported(format!("{}.{}", command.domain, command.service))
        })?;
        self.publish(&self.set_topic(name), &Value::Object(payload)).await
    }

    fn accepts(&self, _capability: Capability, command: &Command) -> bool {
        convert_command(command).is_some()
    }

    fn supports_scenes(&self) -> bool {
        true
    }

    async fn reserve_scene_slot(&self, device: &str) -> HandlerResult<SlotId> {
        self.slots.reserve(Backend::Zigbee2Mqtt, device)
    }

    async fn release_scene_slot(&self, device: &str, slot: SlotId) -> HandlerResult<()> {
        self.slots.release(Backend::Zigbee2Mqtt, device, slot);
        Ok(())
    }

    /// Zigbee `scene_store` snapshots the current device state, so each
    /// member is driven to its target first.
    async fn store_scene(&self, handle: &NativeHandle, entries: &[SceneEntry]) -> HandlerResult<()> {
        let results = join_all(entries.iter().filter_map(|entry| {
            let payload = target_payload(&entry.entity_id, &entry.target)?;
            Some(async move { self.publish(&self.set_topic(&entry.address), &payload).await })
        }))
        .await;
        results.into_iter().collect::<HandlerResult<Vec<()>>>()?;

        tokio::time::sleep(Duration::from_millis(self.config.scene_store_delay_ms)).await;
        self.scene_command(handle, entries, "scene_store").await
    }

    async fn recall_scene(&self, handle: &NativeHandle, entries: &[SceneEntry]) -> HandlerResult<()> {
        self.scene_command(handle, entries, "scene_recall").await
    }

    async fn remove_scene(&self, handle: &NativeHandle, entries: &[SceneEntry]) -> HandlerResult<()> {
        self.scene_command(handle, entries, "scene_remove").await
    }
}
