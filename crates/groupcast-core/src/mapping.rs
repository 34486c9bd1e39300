//! The persisted mapping from a grouping to its native groups.

use std::collections::{BTreeMap, BTreeSet};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::backend::PartitionKey;
use crate::grouping::GroupingId;
use crate::handle::NativeHandle;

/// Scene slot number on a device.
pub type SlotId = u16;

/// A classified entity as placed in a native group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupMember {
    pub entity_id: String,
    /// Backend-native device address (node id, IEEE address, friendly name).
    pub address: String,
}

impl GroupMember {
    pub fn new(entity_id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            address: address.into(),
        }
    }
}

/// A device-stored scene slot for one scene member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneEntry {
    pub entity_id: String,
    pub address: String,
    pub slot: SlotId,
    /// Target state captured when the slot was programmed.
    pub target: Value,
}

/// One provisioned native group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NativeGroup {
    pub handle: NativeHandle,
    pub members: BTreeSet<GroupMember>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scene: Vec<SceneEntry>,
}

impl NativeGroup {
    pub fn new(handle: NativeHandle, members: BTreeSet<GroupMember>) -> Self {
        Self {
            handle,
            members,
            scene: Vec::new(),
        }
    }

    pub fn contains(&self, entity_id: &str) -> bool {
        self.members.iter().any(|m| m.entity_id == entity_id)
    }

    pub fn entity_ids(&self) -> impl Iterator<Item = &str> {
        self.members.iter().map(|m| m.entity_id.as_str())
    }
}

/// A key the backend refused, kept so the same request is not retried
/// until membership changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedGroup {
    pub members: BTreeSet<GroupMember>,
    pub reason: String,
    /// Unix timestamp of the rejection.
    pub rejected_at: i64,
}

/// Everything the orchestrator knows about one grouping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupMapping {
    pub grouping: GroupingId,
    #[serde(default)]
    pub groups: BTreeMap<PartitionKey, NativeGroup>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub rejected: BTreeMap<PartitionKey, RejectedGroup>,
    /// Set when teardown left native groups behind.
    #[serde(default)]
    pub tombstone: bool,
    /// Unix timestamp of the last successful reconciliation.
    #[serde(default)]
    pub last_synced: i64,
}

impl GroupMapping {
    pub fn new(grouping: GroupingId) -> Self {
        Self {
            grouping,
            groups: BTreeMap::new(),
            rejected: BTreeMap::new(),
            tombstone: false,
            last_synced: 0,
        }
    }

    /// No native groups and nothing rejected.
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty() && self.rejected.is_empty()
    }

    /// Entity ids served by some native group of this mapping.
    pub fn covered_entities(&self) -> BTreeSet<&str> {
        self.groups.values().flat_map(NativeGroup::entity_ids).collect()
    }

    /// Native group holding `entity_id`, if any.
    pub fn group_of(&self, entity_id: &str) -> Option<(&PartitionKey, &NativeGroup)> {
        self.groups.iter().find(|(_, group)| group.contains(entity_id))
    }

    /// Key whose handle is the same native group as `handle`.
    pub fn key_for_handle(&self, handle: &NativeHandle) -> Option<&PartitionKey> {
        self.groups
            .iter()
            .find(|(_, group)| group.handle.same_native_group(handle))
            .map(|(key, _)| key)
    }

    pub fn scene_entries(&self) -> impl Iterator<Item = (&PartitionKey, &SceneEntry)> {
        self.groups
            .iter()
            .flat_map(|(key, group)| group.scene.iter().map(move |entry| (key, entry)))
    }

    pub fn touch(&mut self) {
        self.last_synced = Utc::now().timestamp();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Backend, Capability};

    fn mapping() -> GroupMapping {
        let mut mapping = GroupMapping::new(GroupingId::area("kitchen"));
        let members: BTreeSet<_> = [
            GroupMember::new("light.a", "2"),
            GroupMember::new("light.b", "3"),
        ]
        .into_iter()
        .collect();
        mapping.groups.insert(
            PartitionKey::new(Backend::ZWaveJs, Capability::Dimmer),
            NativeGroup::new(
                NativeHandle::Multicast {
                    name: "groupcast_area_kitchen_zwave_js_dimmer".into(),
                    capability: Capability::Dimmer,
                    nodes: vec![2, 3],
                },
                members,
            ),
        );
        mapping
    }

    #[test]
    fn test_covered_entities() {
        let mapping = mapping();
        let covered = mapping.covered_entities();
        assert!(covered.contains("light.a"));
        assert!(covered.contains("light.b"));
        assert!(!mapping.is_empty());
    }

    #[test]
    fn test_group_of() {
        let mapping = mapping();
        let (key, _) = mapping.group_of("light.b").unwrap();
        assert_eq!(key.capability, Capability::Dimmer);
        assert!(mapping.group_of("light.z").is_none());
    }

    #[test]
    fn test_mapping_json_shape() {
        let mapping = mapping();
        let json = serde_json::to_value(&mapping).unwrap();
        assert_eq!(json["grouping"], "area.kitchen");
        assert!(json["groups"]["zwave_js/dimmer"].is_object());
        assert!(json.get("rejected").is_none());

        let back: GroupMapping = serde_json::from_value(json).unwrap();
        assert_eq!(back, mapping);
    }
}
