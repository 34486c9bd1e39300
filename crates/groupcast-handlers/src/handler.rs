//! The protocol handler contract.

use std::collections::BTreeSet;

use async_trait::async_trait;
use groupcast_core::{
    Backend, Capability, Command, GroupMember, GroupingId, NativeGroup, NativeHandle, PartitionKey,
    SceneEntry, SlotId,
};
use sha2::{Digest, Sha256};

use crate::error::{HandlerError, HandlerResult};

/// Prefix of every native group name this crate creates.
pub const MANAGED_PREFIX: &str = "groupcast_";

/// Deterministic native name for a grouping's partition key.
///
/// `groupcast_area_kitchen_zwave_js_dimmer_1f0c9a2e`. Retrying a create after
/// a lost response lands on the same name, so backends that key groups by
/// name can adopt instead of duplicating. The suffix hashes the full grouping
/// id, so ids that share a slug still get distinct names.
pub fn native_group_name(grouping: &GroupingId, key: &PartitionKey) -> String {
    format!(
        "{MANAGED_PREFIX}{}_{}_{}_{}",
        grouping.slug(),
        key.backend,
        key.capability,
        grouping_digest(grouping)
    )
}

/// First four bytes of the SHA-256 of `kind.name`, as hex.
fn grouping_digest(grouping: &GroupingId) -> String {
    let digest = Sha256::digest(grouping.to_string().as_bytes());
    digest[..4].iter().map(|b| format!("{b:02x}")).collect()
}

/// Everything a handler needs to create or update one native group.
#[derive(Debug, Clone, Copy)]
pub struct GroupSpec<'a> {
    pub grouping: &'a GroupingId,
    pub key: PartitionKey,
    pub members: &'a BTreeSet<GroupMember>,
    /// What was provisioned last time, if anything.
    pub existing: Option<&'a NativeGroup>,
}

impl GroupSpec<'_> {
    pub fn native_name(&self) -> String {
        native_group_name(self.grouping, &self.key)
    }

    pub fn addresses(&self) -> Vec<String> {
        self.members.iter().map(|m| m.address.clone()).collect()
    }

    /// Addresses recorded for the existing group.
    pub fn existing_addresses(&self) -> BTreeSet<String> {
        self.existing
            .map(|g| g.members.iter().map(|m| m.address.clone()).collect())
            .unwrap_or_default()
    }
}

/// Native group lifecycle for one backend.
///
/// Implementations keep no cross-call state about groups: everything they
/// need arrives in the [`GroupSpec`] or the handle. Every operation is safe
/// to retry.
#[async_trait]
pub trait ProtocolHandler: Send + Sync {
    fn backend(&self) -> Backend;

    /// Create the native group, or bring an existing one to `spec.members`.
    ///
    /// Returns the handle to persist, which may differ from the existing one
    /// when the backend had to recreate the group.
    async fn ensure_group(&self, spec: GroupSpec<'_>) -> HandlerResult<NativeHandle>;

    /// Remove a native group. Removing an absent group succeeds.
    async fn delete_group(&self, handle: &NativeHandle) -> HandlerResult<()>;

    /// Deliver `command` to every member of the native group.
    async fn send_group_command(&self, handle: &NativeHandle, command: &Command) -> HandlerResult<()>;

    /// Whether a group of `capability` can carry `command` natively.
    fn accepts(&self, capability: Capability, command: &Command) -> bool;

    fn supports_scenes(&self) -> bool {
        false
    }

    /// Take the smallest free scene slot on `device`.
    async fn reserve_scene_slot(&self, device: &str) -> HandlerResult<SlotId> {
        let _ = device;
        Err(HandlerError::Unsupported(format!("{} has no device scenes", self.backend())))
    }

    /// Give a slot back. Releasing a free slot is a no-op.
    async fn release_scene_slot(&self, device: &str, slot: SlotId) -> HandlerResult<()> {
        let _ = (device, slot);
        Ok(())
    }

    /// Program each entry's target state into its device slot.
    async fn store_scene(&self, handle: &NativeHandle, entries: &[SceneEntry]) -> HandlerResult<()> {
        let _ = (handle, entries);
        Err(HandlerError::Unsupported(format!("{} has no device scenes", self.backend())))
    }

    /// Activate stored scene slots.
    async fn recall_scene(&self, handle: &NativeHandle, entries: &[SceneEntry]) -> HandlerResult<()> {
        let _ = (handle, entries);
        Err(HandlerError::Unsupported(format!("{} has no device scenes", self.backend())))
    }

    /// Clear stored scene slots on their devices.
    async fn remove_scene(&self, handle: &NativeHandle, entries: &[SceneEntry]) -> HandlerResult<()> {
        let _ = (handle, entries);
        Ok(())
    }

    /// Native groups on the backend that carry [`MANAGED_PREFIX`], for
    /// orphan cleanup. Backends without stored groups return nothing.
    async fn list_managed_groups(&self) -> HandlerResult<Vec<NativeHandle>> {
        Ok(Vec::new())
    }
}
