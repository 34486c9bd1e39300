//! Splitting classified members into partition keys.

use std::collections::{BTreeMap, BTreeSet};

use crate::backend::PartitionKey;
use crate::classifier::{Classification, UnknownReason};
use crate::mapping::GroupMember;

/// Desired native groups for one grouping, plus the members left to unicast.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Partition {
    pub groups: BTreeMap<PartitionKey, BTreeSet<GroupMember>>,
    pub unmapped: BTreeMap<String, UnknownReason>,
}

impl Partition {
    pub fn keys(&self) -> impl Iterator<Item = &PartitionKey> {
        self.groups.keys()
    }

    /// Total number of members, native or not.
    pub fn len(&self) -> usize {
        self.groups.values().map(BTreeSet::len).sum::<usize>() + self.unmapped.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty() && self.unmapped.is_empty()
    }
}

/// Groups classified entities by partition key.
pub struct CapabilityPartitioner;

impl CapabilityPartitioner {
    /// Every native entity lands in exactly one key; every other entity lands
    /// in the unmapped set.
    pub fn partition<I>(classified: I) -> Partition
    where
        I: IntoIterator<Item = Classification>,
    {
        let mut partition = Partition::default();
        for classification in classified {
            match classification {
                Classification::Native(entity) => {
                    let key = PartitionKey::for_entity(entity.backend, entity.capability);
                    partition
                        .groups
                        .entry(key)
                        .or_default()
                        .insert(entity.member());
                }
                Classification::Unknown { entity_id, reason } => {
                    partition.unmapped.insert(entity_id, reason);
                }
            }
        }
        partition
    }
}
