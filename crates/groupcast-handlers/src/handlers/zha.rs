//! ZHA coordinator group handler.
//!
//! Groups are created through the host's ZHA gateway with numeric ids taken
//! from a reserved range, and exposed by the host as a group entity. Unlike
//! the bridge handler, membership is read back from the gateway, so drift on
//! the coordinator is repaired on every ensure.
//!
//! Scenes go through the Zigbee Scenes cluster on the group: members are
//! driven to their target state, then told to store it under a scene id.

use std::collections::BTreeSet;
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use groupcast_core::{Backend, Capability, Command, NativeHandle, SceneEntry, SlotId};
use serde_json::{json, Map, Value};
use tokio::sync::Mutex;

use crate::error::{HandlerError, HandlerResult};
use crate::handler::{GroupSpec, ProtocolHandler, MANAGED_PREFIX};
use crate::scene::SceneSlotTable;
use crate::transport::{ZhaGateway, ZhaGroupInfo, ZhaSceneCommand};

/// Group ids this handler allocates from.
pub const MANAGED_GROUP_IDS: RangeInclusive<u16> = 0x1000..=0x1FFF;

const GROUP_DOMAINS: &[&str] = &["light", "switch", "fan", "cover"];

pub struct ZhaHandler {
    gateway: Arc<dyn ZhaGateway>,
    slots: Arc<SceneSlotTable>,
    scene_store_delay: Duration,
    /// Held from listing free ids until the new group exists.
    allocation: Mutex<()>,
}

impl ZhaHandler {
    pub fn new(gateway: Arc<dyn ZhaGateway>, slots: Arc<SceneSlotTable>) -> Self {
        Self {
            gateway,
            slots,
            scene_store_delay: Duration::ZERO,
            allocation: Mutex::new(()),
        }
    }

    /// Pause between driving members to their scene state and storing it.
    pub fn with_scene_store_delay(mut self, delay: Duration) -> Self {
        self.scene_store_delay = delay;
        self
    }

    async fn call_entity(&self, entity_id: &str, command: &Command) -> HandlerResult<()> {
        let mut data: Map<String, Value> = command.data.clone();
        data.insert("entity_id".into(), json!(entity_id));
        self.gateway
            .call_service(&command.domain, &command.service, data)
            .await?;
        Ok(())
    }

    /// One group-addressed command per distinct slot in `entries`.
    async fn scene_command(
        &self,
        handle: &NativeHandle,
        entries: &[SceneEntry],
        command: ZhaSceneCommand,
    ) -> HandlerResult<()> {
        let (group_id, _) = managed_parts(handle)?;
        let slots: BTreeSet<SlotId> = entries.iter().map(|e| e.slot).collect();
        for slot in slots {
            self.gateway.scene_command(group_id, command, slot).await?;
            tracing::debug!(
                group_id = format_args!("0x{:04x}", group_id),
                slot,
                ?command,
                "ZHA scene command"
            );
        }
        Ok(())
    }

    async fn sync_members(&self, group: &ZhaGroupInfo, desired: &BTreeSet<String>) -> HandlerResult<()> {
        let actual: BTreeSet<String> = group.members.iter().cloned().collect();
        let to_add: Vec<String> = desired.difference(&actual).cloned().collect();
        let to_remove: Vec<String> = actual.difference(desired).cloned().collect();

        if !to_add.is_empty() {
            self.gateway.add_members(group.group_id, &to_add).await?;
        }
        if !to_remove.is_empty() {
            self.gateway.remove_members(group.group_id, &to_remove).await?;
        }
        if !to_add.is_empty() || !to_remove.is_empty() {
            tracing::debug!(
                group_id = format_args!("0x{:04x}", group.group_id),
                added = to_add.len(),
                removed = to_remove.len(),
                "Repaired ZHA group membership"
            );
        }
        Ok(())
    }
}

/// Host entity id of a ZHA group.
pub fn group_entity_id(domain: &str, group_id: u16) -> String {
    format!("{domain}.zha_group_0x{group_id:04x}")
}

/// Smallest managed id not already taken on the gateway.
fn next_group_id(groups: &[ZhaGroupInfo]) -> HandlerResult<u16> {
    let taken: BTreeSet<u16> = groups.iter().map(|g| g.group_id).collect();
    MANAGED_GROUP_IDS
        .clone()
        .find(|id| !taken.contains(id))
        .ok_or_else(|| HandlerError::BackendRejected("no free ZHA group id".into()))
}

fn managed_parts(handle: &NativeHandle) -> HandlerResult<(u16, &str)> {
    match handle {
        NativeHandle::ManagedGroup { group_id, name } => Ok((*group_id, name.as_str())),
        other => Err(HandlerError::BackendRejected(format!(
            "not a ZHA group handle: {other}"
        ))),
    }
}

#[async_trait]
impl ProtocolHandler for ZhaHandler {
    fn backend(&self) -> Backend {
        Backend::Zha
    }

    async fn ensure_group(&self, spec: GroupSpec<'_>) -> HandlerResult<NativeHandle> {
        if spec.key.capability != Capability::Unified {
            return Err(HandlerError::BackendRejected(
                "ZHA groups are not split by capability".into(),
            ));
        }

        let name = spec.native_name();
        let desired: BTreeSet<String> = spec.members.iter().map(|m| m.address.clone()).collect();
        let allocation = self.allocation.lock().await;
        let groups = self.gateway.list_groups().await?;

        // Prefer the recorded id, then a group left behind under our name.
        let recorded = spec
            .existing
            .and_then(|g| managed_parts(&g.handle).ok())
            .map(|(id, _)| id);
        let found = recorded
            .and_then(|id| groups.iter().find(|g| g.group_id == id))
            .or_else(|| groups.iter().find(|g| g.name == name));

        if let Some(group) = found {
            drop(allocation);
            self.sync_members(group, &desired).await?;
            return Ok(NativeHandle::ManagedGroup {
                group_id: group.group_id,
                name: group.name.clone(),
            });
        }

        let requested = next_group_id(&groups)?;
        let members: Vec<String> = desired.into_iter().collect();
        let group_id = self.gateway.create_group(&name, &members, requested).await?;
        drop(allocation);
        tracing::info!(
            group = %name,
            group_id = format_args!("0x{:04x}", group_id),
            members = members.len(),
            "Created ZHA group"
        );
        Ok(NativeHandle::ManagedGroup { group_id, name })
    }

    async fn delete_group(&self, handle: &NativeHandle) -> HandlerResult<()> {
        let (group_id, _) = managed_parts(handle)?;
        let groups = self.gateway.list_groups().await?;
        if !groups.iter().any(|g| g.group_id == group_id) {
            return Ok(());
        }
        self.gateway.remove_group(group_id).await?;
        Ok(())
    }

    async fn send_group_command(&self, handle: &NativeHandle, command: &Command) -> HandlerResult<()> {
        let (group_id, _) = managed_parts(handle)?;
        if !GROUP_DOMAINS.contains(&command.domain.as_str()) {
            return Err(HandlerError::Unsupported(format!(
                "{}.{}",
                command.domain, command.service
            )));
        }
        self.call_entity(&group_entity_id(&command.domain, group_id), command)
            .await
    }

    fn accepts(&self, _capability: Capability, command: &Command) -> bool {
        GROUP_DOMAINS.contains(&command.domain.as_str())
    }

    fn supports_scenes(&self) -> bool {
        true
    }

    async fn reserve_scene_slot(&self, device: &str) -> HandlerResult<SlotId> {
        self.slots.reserve(Backend::Zha, device)
    }

    async fn release_scene_slot(&self, device: &str, slot: SlotId) -> HandlerResult<()> {
        self.slots.release(Backend::Zha, device, slot);
        Ok(())
    }

    /// `store` snapshots the current state, so members are set first.
    async fn store_scene(&self, handle: &NativeHandle, entries: &[SceneEntry]) -> HandlerResult<()> {
        let results = join_all(entries.iter().filter_map(|entry| {
            let command = Command::from_target_state(&entry.entity_id, &entry.target)?;
            Some(async move { self.call_entity(&entry.entity_id, &command).await })
        }))
        .await;
        results.into_iter().collect::<HandlerResult<Vec<()>>>()?;

        tokio::time::sleep(self.scene_store_delay).await;
        self.scene_command(handle, entries, ZhaSceneCommand::Store).await
    }

    async fn recall_scene(&self, handle: &NativeHandle, entries: &[SceneEntry]) -> HandlerResult<()> {
        self.scene_command(handle, entries, ZhaSceneCommand::Recall).await
    }

    async fn remove_scene(&self, handle: &NativeHandle, entries: &[SceneEntry]) -> HandlerResult<()> {
        self.scene_command(handle, entries, ZhaSceneCommand::Remove).await
    }

    async fn list_managed_groups(&self) -> HandlerResult<Vec<NativeHandle>> {
        let groups = self.gateway.list_groups().await?;
        Ok(groups
            .into_iter()
            .filter(|g| g.name.starts_with(MANAGED_PREFIX) && MANAGED_GROUP_IDS.contains(&g.group_id))
            .map(|g| NativeHandle::ManagedGroup {
                group_id: g.group_id,
                name: g.name,
            })
            .collect())
    }
}
