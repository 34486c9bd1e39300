//! Collaborators supplied by the host.
//!
//! The orchestrator never talks to the host's registries or service bus
//! directly; it goes through these traits so that hosts, and tests, can plug
//! in their own implementations.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use serde_json::Value;

use crate::command::{Command, DispatchTarget};
use crate::entity::{entity_domain, EntityDescriptor};
use crate::error::{Result, TransportResult};
use crate::grouping::{GroupingId, GroupingKind};

/// Read access to the host's groupings and entity registry.
#[async_trait]
pub trait GroupingRegistry: Send + Sync {
    /// Current member entity ids, or `None` when the grouping no longer exists.
    async fn resolve_members(&self, grouping: &GroupingId) -> Result<Option<BTreeSet<String>>>;

    /// Registry descriptor for an entity.
    async fn describe_entity(&self, entity_id: &str) -> Option<EntityDescriptor>;

    /// Every grouping currently defined.
    async fn list_groupings(&self) -> Result<Vec<GroupingId>>;

    /// Target state per member for a scene grouping.
    async fn scene_states(&self, _scene: &GroupingId) -> Result<BTreeMap<String, Value>> {
        Ok(BTreeMap::new())
    }

    /// Expand a dispatch target into groupings and loose entities.
    async fn resolve_target(&self, target: &DispatchTarget) -> Result<ResolvedTarget> {
        Ok(ResolvedTarget::from_target(target))
    }
}

/// Per-entity service call, used for everything native groups do not cover.
#[async_trait]
pub trait UnicastService: Send + Sync {
    async fn call_service(&self, entity_id: &str, command: &Command) -> TransportResult<()>;
}

/// A dispatch target split into groupings and standalone entities.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub groupings: BTreeSet<GroupingId>,
    pub entities: BTreeSet<String>,
}

impl ResolvedTarget {
    /// Area, floor and label ids become groupings; `group.*` and `scene.*`
    /// entity ids become groupings too; anything else is a plain entity.
    pub fn from_target(target: &DispatchTarget) -> Self {
        let mut resolved = ResolvedTarget::default();
        for entity_id in &target.entity_ids {
            let grouping = match entity_domain(entity_id) {
                "group" | "scene" => GroupingId::parse(entity_id).ok(),
                _ => None,
            };
            match grouping {
                Some(grouping) => {
                    resolved.groupings.insert(grouping);
                }
                None => {
                    resolved.entities.insert(entity_id.clone());
                }
            }
        }

        let named = [
            (GroupingKind::Area, &target.area_ids),
            (GroupingKind::Floor, &target.floor_ids),
            (GroupingKind::Label, &target.label_ids),
        ];
        for (kind, ids) in named {
            resolved
                .groupings
                .extend(ids.iter().map(|id| GroupingId::new(kind, id.clone())));
        }
        resolved
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_target() {
        let target = DispatchTarget::new()
            .entity("light.desk")
            .entity("group.upstairs")
            .entity("scene.movie")
            .area("kitchen")
            .floor("ground")
            .label("night");
        let resolved = ResolvedTarget::from_target(&target);

        assert_eq!(resolved.entities.len(), 1);
        assert!(resolved.entities.contains("light.desk"));
        assert!(resolved.groupings.contains(&GroupingId::group("upstairs")));
        assert!(resolved.groupings.contains(&GroupingId::scene("movie")));
        assert!(resolved.groupings.contains(&GroupingId::area("kitchen")));
        assert!(resolved.groupings.contains(&GroupingId::floor("ground")));
        assert!(resolved.groupings.contains(&GroupingId::label("night")));
    }
}
