//! Command routing.
//!
//! A dispatch is planned against the committed mappings, then every group
//! send, scene recall and unicast call of the plan is issued at once. Each
//! sub-target is reported on its own; one failure never stops the others.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use futures::future::join_all;
use groupcast_core::{
    entity_domain, Command, DispatchTarget, GroupMapping, GroupingId, GroupingKind, NativeHandle, PartitionKey,
    SceneEntry,
};
use groupcast_handlers::{HandlerError, ProtocolHandler};

use crate::error::Result;
use crate::orchestrator::Orchestrator;
use crate::report::{DispatchOutcome, DispatchReport, DispatchRoute, Failure};

struct GroupSend {
    grouping: GroupingId,
    key: PartitionKey,
    handler: Arc<dyn ProtocolHandler>,
    handle: NativeHandle,
}

struct SceneRecall {
    grouping: GroupingId,
    key: PartitionKey,
    handler: Arc<dyn ProtocolHandler>,
    handle: NativeHandle,
    entries: Vec<SceneEntry>,
}

#[derive(Default)]
struct DispatchPlan {
    groups: Vec<GroupSend>,
    recalls: Vec<SceneRecall>,
    /// Per-entity fallback calls. An entity appears at most once.
    unicast: BTreeMap<String, Command>,
    /// Entities already reached through a group or a recall.
    covered: BTreeSet<String>,
}

impl DispatchPlan {
    fn add_unicast(&mut self, entity_id: &str, command: Command) {
        self.unicast.entry(entity_id.to_string()).or_insert(command);
    }
}

impl Orchestrator {
    /// Route `command` to `target` through native groups where possible and
    /// per-entity calls for everything else.
    ///
    /// Only registry failures abort a dispatch; backend failures show up as
    /// failed outcomes in the report.
    pub async fn dispatch(&self, target: &DispatchTarget, command: &Command) -> Result<DispatchReport> {
        let resolved = self.registry().resolve_target(target).await?;
        let mut plan = DispatchPlan::default();

        for grouping in &resolved.groupings {
            let mapping = self.store.get(grouping).filter(|m| !m.tombstone);
            if command.is_scene_activation() && grouping.kind() == GroupingKind::Scene {
                self.plan_scene(grouping, mapping.as_deref(), &mut plan).await?;
            } else {
                self.plan_grouping(grouping, mapping.as_deref(), command, &mut plan)
                    .await?;
            }
        }
        for entity_id in &resolved.entities {
            plan.add_unicast(entity_id, command.clone());
        }
        let covered = std::mem::take(&mut plan.covered);
        plan.unicast.retain(|entity_id, _| !covered.contains(entity_id));

        tracing::debug!(
            command = %format_args!("{}.{}", command.domain, command.service),
            groups = plan.groups.len(),
            recalls = plan.recalls.len(),
            unicast = plan.unicast.len(),
            "Dispatching"
        );
        let report = self.execute(plan, command).await;
        if !report.all_succeeded() {
            tracing::warn!(
                failed = report.failures().count(),
                total = report.outcomes.len(),
                "Dispatch finished with failures"
            );
        }
        Ok(report)
    }

    async fn plan_grouping(
        &self,
        grouping: &GroupingId,
        mapping: Option<&GroupMapping>,
        command: &Command,
        plan: &mut DispatchPlan,
    ) -> Result<()> {
        let Some(members) = self.registry().resolve_members(grouping).await? else {
            return Ok(());
        };
        let in_domain = |entity_id: &str| entity_domain(entity_id) == command.domain;

        let mut covered: BTreeSet<&str> = BTreeSet::new();
        if let Some(mapping) = mapping {
            for (key, group) in &mapping.groups {
                let Some(handler) = self.handlers.get(key.backend) else {
                    continue;
                };
                // A group is only addressed when every stored member is a
                // current, in-domain member and the backend can carry the command.
                let addressable = group
                    .entity_ids()
                    .all(|entity_id| in_domain(entity_id) && members.contains(entity_id));
                if !addressable || !handler.accepts(key.capability, command) {
                    continue;
                }
                covered.extend(group.entity_ids());
                plan.groups.push(GroupSend {
                    grouping: grouping.clone(),
                    key: *key,
                    handler: Arc::clone(handler),
                    handle: group.handle.clone(),
                });
            }
        }

        for entity_id in members.iter().filter(|e| in_domain(e)) {
            if !covered.contains(entity_id.as_str()) {
                plan.add_unicast(entity_id, command.clone());
            }
        }
        plan.covered.extend(covered.into_iter().map(str::to_string));
        Ok(())
    }

    async fn plan_scene(
        &self,
        scene: &GroupingId,
        mapping: Option<&GroupMapping>,
        plan: &mut DispatchPlan,
    ) -> Result<()> {
        let targets = self.registry().scene_states(scene).await?;

        let mut covered: BTreeSet<String> = BTreeSet::new();
        if let Some(mapping) = mapping {
            for (key, group) in &mapping.groups {
                if group.scene.is_empty() {
                    continue;
                }
                let Some(handler) = self.handlers.get(key.backend) else {
                    continue;
                };
                if !handler.supports_scenes() {
                    continue;
                }
                covered.extend(group.scene.iter().map(|e| e.entity_id.clone()));
                plan.recalls.push(SceneRecall {
                    grouping: scene.clone(),
                    key: *key,
                    handler: Arc::clone(handler),
                    handle: group.handle.clone(),
                    entries: group.scene.clone(),
                });
            }
        }

        for (entity_id, target) in &targets {
            if covered.contains(entity_id) {
                continue;
            }
            match Command::from_target_state(entity_id, target) {
                Some(command) => plan.add_unicast(entity_id, command),
                None => tracing::debug!(entity_id = %entity_id, "Scene target has no service equivalent"),
            }
        }
        plan.covered.extend(covered);
        Ok(())
    }

    async fn execute(&self, plan: DispatchPlan, command: &Command) -> DispatchReport {
        let groups = join_all(plan.groups.into_iter().map(|send| async move {
            let result = self
                .guarded("send_group_command", send.handler.send_group_command(&send.handle, command))
                .await;
            DispatchOutcome {
                route: DispatchRoute::Group {
                    grouping: send.grouping,
                    key: send.key,
                    handle: send.handle,
                },
                error: result.err().map(Failure::from),
            }
        }));
        let recalls = join_all(plan.recalls.into_iter().map(|recall| async move {
            let result = self
                .guarded("recall_scene", recall.handler.recall_scene(&recall.handle, &recall.entries))
                .await;
            DispatchOutcome {
                route: DispatchRoute::SceneRecall {
                    grouping: recall.grouping,
                    key: recall.key,
                    devices: recall.entries.len(),
                },
                error: result.err().map(Failure::from),
            }
        }));
        let unicast = join_all(plan.unicast.into_iter().map(|(entity_id, command)| async move {
            let call = async {
                self.unicast
                    .call_service(&entity_id, &command)
                    .await
                    .map_err(HandlerError::from)
            };
            let result = self.guarded("call_service", call).await;
            DispatchOutcome {
                route: DispatchRoute::Unicast { entity_id },
                error: result.err().map(Failure::from),
            }
        }));

        let (groups, recalls, unicast) = futures::join!(groups, recalls, unicast);
        DispatchReport {
            outcomes: groups.into_iter().chain(recalls).chain(unicast).collect(),
        }
    }
}
