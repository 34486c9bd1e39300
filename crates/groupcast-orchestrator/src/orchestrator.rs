//! The reconciliation engine.
//!
//! A pass for one grouping resolves its members, classifies and partitions
//! them, then drives every partition key to its desired native group in
//! parallel. The resulting mapping is persisted once, after every backend
//! call of the pass has returned. Passes for the same grouping are
//! serialized; passes for different groupings run concurrently.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use futures::future::join_all;
use futures::stream::{self, StreamExt};
use groupcast_core::{
    Backend, CapabilityPartitioner, EntityClassifier, GroupMapping, GroupMember, GroupcastConfig,
    GroupingId, GroupingKind, GroupingRegistry, NativeGroup, Partition, PartitionKey, RejectedGroup,
    SceneEntry, SlotId, UnicastService,
};
use groupcast_handlers::{GroupSpec, HandlerError, HandlerResult, HandlerSet};
use groupcast_storage::backends::create_backend;
use groupcast_storage::MappingStore;
use serde_json::{json, Value};

use crate::change::GroupingSignal;
use crate::error::{OrchestratorError, Result};
use crate::locks::KeyedLocks;
use crate::report::{
    EntityStatus, Failure, FailureKind, GroupingState, GroupingStatus, KeyAction, KeyOutcome, LastPass,
    ReconcileReport, SceneFailure, StatusSnapshot, SyncResult, SyncSummary, UnmappedReason,
};
use crate::scheduler::SignalHandler;

/// Which groupings a sync covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncScope {
    All,
    Kind(GroupingKind),
    One(GroupingId),
}

/// Subject of a status query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusQuery {
    Grouping(GroupingId),
    Entity(String),
}

impl StatusQuery {
    /// `area.kitchen` is a grouping, `light.desk` an entity.
    pub fn parse(s: &str) -> Self {
        match GroupingId::parse(s) {
            Ok(id) => StatusQuery::Grouping(id),
            Err(_) => StatusQuery::Entity(s.to_string()),
        }
    }
}

/// Slot held by a device, pending release.
type SlotRelease = (Backend, String, SlotId);

/// Scene programming result for one key.
struct SceneProgram {
    key: PartitionKey,
    entries: Vec<SceneEntry>,
    reserved: Vec<SlotRelease>,
    released: Vec<SlotRelease>,
    failures: Vec<SceneFailure>,
}

pub struct Orchestrator {
    config: GroupcastConfig,
    registry: Arc<dyn GroupingRegistry>,
    pub(crate) unicast: Arc<dyn UnicastService>,
    pub(crate) handlers: HandlerSet,
    pub(crate) store: Arc<MappingStore>,
    classifier: EntityClassifier,
    locks: KeyedLocks<GroupingId>,
    states: DashMap<GroupingId, GroupingState>,
    last_pass: DashMap<GroupingId, LastPass>,
}

impl Orchestrator {
    /// Build an orchestrator over an already loaded store.
    ///
    /// Scene slots recorded in the store are claimed in the handlers' slot
    /// table before anything else can reserve them.
    pub fn new(
        config: GroupcastConfig,
        registry: Arc<dyn GroupingRegistry>,
        unicast: Arc<dyn UnicastService>,
        handlers: HandlerSet,
        store: Arc<MappingStore>,
    ) -> Self {
        let classifier = EntityClassifier::new(config.enabled_backends.iter().copied());
        let states = DashMap::new();
        let mut seeded = 0usize;
        for mapping in store.list_all() {
            for (key, entry) in mapping.scene_entries() {
                handlers.scene_slots().seed(key.backend, &entry.address, entry.slot);
                seeded += 1;
            }
            let state = if mapping.tombstone {
                GroupingState::Deprovisioning
            } else {
                GroupingState::Mapped
            };
            states.insert(mapping.grouping.clone(), state);
        }
        tracing::info!(
            mappings = store.len(),
            scene_slots = seeded,
            handlers = handlers.len(),
            "Orchestrator initialized"
        );

        Self {
            config,
            registry,
            unicast,
            handlers,
            store,
            classifier,
            locks: KeyedLocks::new(),
            states,
            last_pass: DashMap::new(),
        }
    }

    /// Open the store named by `config.store` and build an orchestrator on it.
    pub fn open(
        config: GroupcastConfig,
        registry: Arc<dyn GroupingRegistry>,
        unicast: Arc<dyn UnicastService>,
        handlers: HandlerSet,
    ) -> Result<Self> {
        config.validate()?;
        let backend = create_backend(&config.store.backend, &json!({ "path": config.store.path }))?;
        let store = Arc::new(MappingStore::open(backend)?);
        Ok(Self::new(config, registry, unicast, handlers, store))
    }

    pub fn config(&self) -> &GroupcastConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<MappingStore> {
        &self.store
    }

    pub fn handlers(&self) -> &HandlerSet {
        &self.handlers
    }

    pub fn registry(&self) -> &Arc<dyn GroupingRegistry> {
        &self.registry
    }

    pub fn state(&self, grouping: &GroupingId) -> GroupingState {
        self.states.get(grouping).map(|s| *s).unwrap_or_default()
    }

    fn set_state(&self, grouping: &GroupingId, state: GroupingState) {
        if state == GroupingState::Unmapped {
            self.states.remove(grouping);
        } else {
            self.states.insert(grouping.clone(), state);
        }
    }

    /// Run a backend call under the configured call timeout.
    pub(crate) async fn guarded<T, F>(&self, op: &'static str, call: F) -> HandlerResult<T>
    where
        F: Future<Output = HandlerResult<T>>,
    {
        match tokio::time::timeout(self.config.backend_call_timeout(), call).await {
            Ok(result) => result,
            Err(_) => Err(HandlerError::BackendUnavailable(format!(
                "{op} timed out after {}ms",
                self.config.backend_call_timeout_ms
            ))),
        }
    }

    async fn classify(&self, members: &BTreeSet<String>) -> Partition {
        let classified = join_all(members.iter().map(|entity_id| async move {
            let descriptor = self.registry.describe_entity(entity_id).await;
            self.classifier.classify(entity_id, descriptor.as_ref())
        }))
        .await;
        CapabilityPartitioner::partition(classified)
    }

    /// Reconcile one grouping against its current membership.
    ///
    /// A grouping that no longer exists, has no members, or whose kind is
    /// disabled is torn down instead.
    pub async fn reconcile(&self, grouping: &GroupingId) -> Result<ReconcileReport> {
        let _guard = self.locks.lock(grouping).await;
        let result = self.reconcile_locked(grouping).await;
        self.record_pass(grouping, &result);
        result
    }

    /// Tear down every native group of a grouping and drop its record.
    pub async fn deprovision(&self, grouping: &GroupingId) -> Result<ReconcileReport> {
        let _guard = self.locks.lock(grouping).await;
        let result = self.deprovision_locked(grouping).await;
        self.record_pass(grouping, &result);
        result
    }

    /// Outcome of the most recent pass for `grouping`, if one ran.
    pub fn last_pass(&self, grouping: &GroupingId) -> Option<LastPass> {
        self.last_pass.get(grouping).map(|p| p.clone())
    }

    fn record_pass(&self, grouping: &GroupingId, result: &Result<ReconcileReport>) {
        let now = Utc::now().timestamp();
        match result {
            Ok(_) if self.store.get(grouping).is_none() => {
                self.last_pass.remove(grouping);
            }
            Ok(report) => {
                self.last_pass
                    .insert(grouping.clone(), LastPass::from_report(report, now));
            }
            Err(e) => {
                let previous = self.last_pass.remove(grouping).map(|(_, p)| p);
                self.last_pass
                    .insert(grouping.clone(), LastPass::aborted(previous, e.to_string(), now));
            }
        }
    }

    async fn reconcile_locked(&self, grouping: &GroupingId) -> Result<ReconcileReport> {
        if !self.config.groupings.enabled(grouping.kind()) {
            tracing::debug!(grouping = %grouping, "Grouping kind disabled, tearing down");
            return self.deprovision_locked(grouping).await;
        }
        let members = match self.registry.resolve_members(grouping).await? {
            Some(members) if !members.is_empty() => members,
            Some(_) => {
                tracing::debug!(grouping = %grouping, "Grouping has no members, tearing down");
                return self.deprovision_locked(grouping).await;
            }
            None => {
                tracing::debug!(grouping = %grouping, "Grouping no longer exists, tearing down");
                return self.deprovision_locked(grouping).await;
            }
        };
        let scene_targets = if grouping.kind() == GroupingKind::Scene {
            self.registry.scene_states(grouping).await?
        } else {
            BTreeMap::new()
        };

        let previous_state = self.state(grouping);
        self.set_state(grouping, GroupingState::Provisioning);
        let result = self.provision(grouping, &members, &scene_targets).await;
        if result.is_err() {
            self.set_state(grouping, previous_state);
        }
        result
    }

    async fn provision(
        &self,
        grouping: &GroupingId,
        members: &BTreeSet<String>,
        scene_targets: &BTreeMap<String, Value>,
    ) -> Result<ReconcileReport> {
        let prior = self
            .store
            .get(grouping)
            .map(|m| (*m).clone())
            .unwrap_or_else(|| GroupMapping::new(grouping.clone()));
        let partition = self.classify(members).await;

        let mut report = ReconcileReport::new(grouping.clone());
        for (entity_id, reason) in &partition.unmapped {
            report.unmapped.insert(entity_id.clone(), UnmappedReason::Unknown(*reason));
        }

        let mut desired: BTreeMap<PartitionKey, BTreeSet<GroupMember>> = BTreeMap::new();
        for (key, key_members) in partition.groups {
            if self.handlers.get(key.backend).is_none() {
                for member in &key_members {
                    report.unmapped.insert(member.entity_id.clone(), UnmappedReason::NoHandler);
                }
                continue;
            }
            desired.insert(key, key_members);
        }

        let mut next = GroupMapping::new(grouping.clone());
        let mut to_ensure: Vec<(PartitionKey, &BTreeSet<GroupMember>)> = Vec::new();
        let mut retire: Vec<(PartitionKey, NativeGroup)> = Vec::new();
        for (key, key_members) in &desired {
            match prior.rejected.get(key) {
                Some(rejected) if rejected.members == *key_members => {
                    tracing::debug!(grouping = %grouping, key = %key, "Skipping rejected key");
                    report.keys.push(KeyOutcome::ok(*key, KeyAction::Skipped));
                    for member in key_members {
                        report.unmapped.insert(member.entity_id.clone(), UnmappedReason::Rejected);
                    }
                    next.rejected.insert(*key, rejected.clone());
                    if let Some(stale) = prior.groups.get(key) {
                        retire.push((*key, stale.clone()));
                    }
                }
                _ => to_ensure.push((*key, key_members)),
            }
        }

        let ensures = join_all(to_ensure.iter().map(|(key, key_members)| {
            let existing = prior.groups.get(key);
            async move {
                let result = match self.handlers.get(key.backend) {
                    Some(handler) => {
                        let spec = GroupSpec {
                            grouping,
                            key: *key,
                            members: *key_members,
                            existing,
                        };
                        self.guarded("ensure_group", handler.ensure_group(spec)).await
                    }
                    None => Err(HandlerError::Unsupported(format!("no handler for {}", key.backend))),
                };
                (*key, result)
            }
        }));
        let deletes = join_all(
            prior
                .groups
                .iter()
                .filter(|(key, _)| !desired.contains_key(key))
                .map(|(key, group)| async move { (*key, self.teardown(key.backend, group).await) }),
        );
        let (ensured, deleted) = futures::join!(ensures, deletes);

        let mut fresh: BTreeSet<PartitionKey> = BTreeSet::new();
        let mut releases: Vec<SlotRelease> = Vec::new();

        for (key, result) in ensured {
            let key_members = desired.get(&key).cloned().unwrap_or_default();
            match result {
                Ok(handle) => {
                    if let Some(owner) = self.store.handle_owner(&handle).filter(|owner| owner != grouping) {
                        tracing::warn!(
                            grouping = %grouping,
                            key = %key,
                            handle = %handle,
                            owner = %owner,
                            "Refusing handle owned by another grouping"
                        );
                        let failure = Failure::new(
                            FailureKind::HandleConflict,
                            format!("{handle} is already mapped to {owner}"),
                        );
                        report.keys.push(KeyOutcome::failed(key, KeyAction::Ensured, failure));
                        if let Some(previous) = prior.groups.get(&key) {
                            next.groups.insert(key, previous.clone());
                        }
                        continue;
                    }
                    let mut group = NativeGroup::new(handle, key_members);
                    if let Some(previous) = prior.groups.get(&key) {
                        group.scene = previous.scene.clone();
                    }
                    next.groups.insert(key, group);
                    fresh.insert(key);
                    report.keys.push(KeyOutcome::ok(key, KeyAction::Ensured));
                }
                Err(HandlerError::BackendRejected(reason)) => {
                    tracing::warn!(grouping = %grouping, key = %key, reason = %reason, "Backend rejected native group");
                    report.keys.push(KeyOutcome::failed(
                        key,
                        KeyAction::Ensured,
                        Failure::new(FailureKind::BackendRejected, reason.clone()),
                    ));
                    for member in &key_members {
                        report.unmapped.insert(member.entity_id.clone(), UnmappedReason::Rejected);
                    }
                    next.rejected.insert(
                        key,
                        RejectedGroup {
                            members: key_members,
                            reason,
                            rejected_at: Utc::now().timestamp(),
                        },
                    );
                    if let Some(stale) = prior.groups.get(&key) {
                        retire.push((key, stale.clone()));
                    }
                }
                Err(e) => {
                    tracing::warn!(grouping = %grouping, key = %key, error = %e, "Failed to ensure native group");
                    report.keys.push(KeyOutcome::failed(key, KeyAction::Ensured, Failure::from(&e)));
                    if let Some(previous) = prior.groups.get(&key) {
                        next.groups.insert(key, previous.clone());
                    }
                }
            }
        }

        for (key, result) in deleted {
            let Some(previous) = prior.groups.get(&key) else {
                continue;
            };
            match result {
                Ok(()) => {
                    releases.extend(slot_releases(key.backend, &previous.scene));
                    report.keys.push(KeyOutcome::ok(key, KeyAction::Deleted));
                }
                Err(failure) => {
                    tracing::warn!(grouping = %grouping, key = %key, error = %failure, "Failed to delete native group");
                    next.groups.insert(key, previous.clone());
                    report.keys.push(KeyOutcome::failed(key, KeyAction::Deleted, failure));
                }
            }
        }

        // Groups of keys the backend now rejects no longer match their members.
        let retired = join_all(
            retire
                .iter()
                .map(|(key, group)| async move { (*key, self.teardown(key.backend, group).await) }),
        )
        .await;
        for ((key, result), (_, group)) in retired.into_iter().zip(&retire) {
            match result {
                Ok(()) => releases.extend(slot_releases(key.backend, &group.scene)),
                Err(failure) => {
                    tracing::warn!(grouping = %grouping, key = %key, error = %failure, "Failed to retire rejected group");
                    next.groups.insert(key, group.clone());
                }
            }
        }

        let mut reserved: Vec<SlotRelease> = Vec::new();
        if grouping.kind() == GroupingKind::Scene {
            let programs = join_all(
                next.groups
                    .iter()
                    .filter(|(key, _)| fresh.contains(key))
                    .map(|(key, group)| self.program_scene(*key, group, scene_targets)),
            )
            .await;
            for program in programs.into_iter().flatten() {
                if let Some(group) = next.groups.get_mut(&program.key) {
                    group.scene = program.entries;
                }
                reserved.extend(program.reserved);
                releases.extend(program.released);
                report.scene_failures.extend(program.failures);
            }
        } else {
            for (key, group) in next.groups.iter_mut() {
                if fresh.contains(key) && !group.scene.is_empty() {
                    releases.extend(slot_releases(key.backend, &group.scene));
                    group.scene.clear();
                }
            }
        }

        next.touch();
        let persisted = if next.is_empty() {
            self.store.delete(grouping).await.map(|_| ())
        } else {
            self.store.put(next.clone()).await
        };
        if let Err(e) = persisted {
            tracing::error!(grouping = %grouping, error = %e, "Failed to persist mapping, discarding pass");
            self.release_slots(&reserved).await;
            return Err(OrchestratorError::persist(grouping, e));
        }
        self.release_slots(&releases).await;

        let covered = next.covered_entities();
        for entity_id in members {
            if covered.contains(entity_id.as_str()) {
                report.unmapped.remove(entity_id);
            } else {
                report
                    .unmapped
                    .entry(entity_id.clone())
                    .or_insert(UnmappedReason::Unavailable);
            }
        }

        let state = if next.groups.is_empty() {
            GroupingState::Unmapped
        } else {
            GroupingState::Mapped
        };
        self.set_state(grouping, state);
        report.state = state;

        if report.is_complete() {
            tracing::debug!(
                grouping = %grouping,
                keys = next.groups.len(),
                unmapped = report.unmapped.len(),
                "Reconciled grouping"
            );
        } else {
            tracing::warn!(
                grouping = %grouping,
                failed = report.failures().count(),
                keys = report.keys.len(),
                "Reconciled grouping with failures"
            );
        }
        Ok(report)
    }

    /// Reserve slots and program the scene on the devices of one freshly
    /// ensured key. `None` when the backend has no scene support.
    async fn program_scene(
        &self,
        key: PartitionKey,
        group: &NativeGroup,
        targets: &BTreeMap<String, Value>,
    ) -> Option<SceneProgram> {
        let handler = self.handlers.get(key.backend)?;
        if !handler.supports_scenes() {
            return None;
        }

        let previous: HashMap<&str, &SceneEntry> =
            group.scene.iter().map(|e| (e.entity_id.as_str(), e)).collect();
        let mut program = SceneProgram {
            key,
            entries: Vec::new(),
            reserved: Vec::new(),
            released: Vec::new(),
            failures: Vec::new(),
        };
        let mut dirty = false;

        for member in &group.members {
            let Some(target) = targets.get(&member.entity_id) else {
                continue;
            };
            match previous.get(member.entity_id.as_str()) {
                Some(entry) if entry.address == member.address => {
                    dirty |= entry.target != *target;
                    program.entries.push(SceneEntry {
                        target: target.clone(),
                        ..(*entry).clone()
                    });
                }
                _ => match self
                    .guarded("reserve_scene_slot", handler.reserve_scene_slot(&member.address))
                    .await
                {
                    Ok(slot) => {
                        dirty = true;
                        program.reserved.push((key.backend, member.address.clone(), slot));
                        program.entries.push(SceneEntry {
                            entity_id: member.entity_id.clone(),
                            address: member.address.clone(),
                            slot,
                            target: target.clone(),
                        });
                    }
                    Err(e) => {
                        tracing::warn!(entity_id = %member.entity_id, key = %key, error = %e, "No scene slot for device");
                        program.failures.push(SceneFailure {
                            entity_id: member.entity_id.clone(),
                            key,
                            error: Failure::from(&e),
                        });
                    }
                },
            }
        }

        let kept: BTreeSet<&str> = program.entries.iter().map(|e| e.entity_id.as_str()).collect();
        let dropped: Vec<SceneEntry> = group
            .scene
            .iter()
            .filter(|e| !kept.contains(e.entity_id.as_str()))
            .cloned()
            .collect();
        if !dropped.is_empty() {
            if let Err(e) = self
                .guarded("remove_scene", handler.remove_scene(&group.handle, &dropped))
                .await
            {
                tracing::debug!(key = %key, error = %e, "Failed to clear dropped scene slots");
            }
            program.released.extend(slot_releases(key.backend, &dropped));
        }

        if dirty && !program.entries.is_empty() {
            if let Err(e) = self
                .guarded("store_scene", handler.store_scene(&group.handle, &program.entries))
                .await
            {
                tracing::warn!(key = %key, error = %e, "Failed to store native scene");
                let failure = Failure::from(&e);
                program.failures.extend(program.entries.iter().map(|entry| SceneFailure {
                    entity_id: entry.entity_id.clone(),
                    key,
                    error: failure.clone(),
                }));
                // Programmed slots can no longer be trusted; recall falls back to unicast.
                let entries = std::mem::take(&mut program.entries);
                program.released.extend(slot_releases(key.backend, &entries));
            }
        }
        Some(program)
    }

    async fn deprovision_locked(&self, grouping: &GroupingId) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::new(grouping.clone());
        let Some(existing) = self.store.get(grouping) else {
            self.set_state(grouping, GroupingState::Unmapped);
            return Ok(report);
        };
        self.set_state(grouping, GroupingState::Deprovisioning);

        let results = join_all(
            existing
                .groups
                .iter()
                .map(|(key, group)| async move { (*key, self.teardown(key.backend, group).await) }),
        )
        .await;

        let mut remaining = GroupMapping::new(grouping.clone());
        let mut releases = Vec::new();
        for (key, result) in results {
            let Some(group) = existing.groups.get(&key) else {
                continue;
            };
            match result {
                Ok(()) => {
                    releases.extend(slot_releases(key.backend, &group.scene));
                    report.keys.push(KeyOutcome::ok(key, KeyAction::Deleted));
                }
                Err(failure) => {
                    tracing::warn!(grouping = %grouping, key = %key, error = %failure, "Failed to delete native group");
                    remaining.groups.insert(key, group.clone());
                    report.keys.push(KeyOutcome::failed(key, KeyAction::Deleted, failure));
                }
            }
        }

        let state = if remaining.groups.is_empty() {
            self.store
                .delete(grouping)
                .await
                .map_err(|e| OrchestratorError::persist(grouping, e))?;
            GroupingState::Unmapped
        } else {
            remaining.tombstone = true;
            remaining.touch();
            self.store
                .put(remaining)
                .await
                .map_err(|e| OrchestratorError::persist(grouping, e))?;
            GroupingState::Deprovisioning
        };
        self.release_slots(&releases).await;
        self.set_state(grouping, state);
        report.state = state;

        tracing::info!(
            grouping = %grouping,
            deleted = report.keys.iter().filter(|k| k.succeeded()).count(),
            failed = report.failures().count(),
            "Deprovisioned grouping"
        );
        Ok(report)
    }

    /// Clear a group's scene slots, then delete the group.
    async fn teardown(&self, backend: Backend, group: &NativeGroup) -> std::result::Result<(), Failure> {
        let Some(handler) = self.handlers.get(backend) else {
            return Err(Failure::new(FailureKind::NoHandler, format!("no handler for {backend}")));
        };
        if !group.scene.is_empty() && handler.supports_scenes() {
            if let Err(e) = self
                .guarded("remove_scene", handler.remove_scene(&group.handle, &group.scene))
                .await
            {
                tracing::debug!(handle = %group.handle, error = %e, "Failed to clear scene slots");
            }
        }
        self.guarded("delete_group", handler.delete_group(&group.handle))
            .await
            .map_err(Failure::from)
    }

    async fn release_slots(&self, slots: &[SlotRelease]) {
        for (backend, device, slot) in slots {
            let Some(handler) = self.handlers.get(*backend) else {
                continue;
            };
            if let Err(e) = handler.release_scene_slot(device, *slot).await {
                tracing::debug!(backend = %backend, device = %device, slot, error = %e, "Failed to release scene slot");
            }
        }
    }

    /// Reconcile the groupings in `scope` and summarize per grouping.
    ///
    /// `All` and `Kind` cover registry groupings of enabled kinds plus every
    /// stored mapping, so records of vanished or disabled groupings are torn
    /// down too.
    pub async fn sync(&self, scope: SyncScope) -> Result<SyncSummary> {
        let ids: BTreeSet<GroupingId> = match &scope {
            SyncScope::One(id) => [id.clone()].into_iter().collect(),
            SyncScope::All | SyncScope::Kind(_) => {
                let wanted = |kind: GroupingKind| match &scope {
                    SyncScope::Kind(k) => *k == kind,
                    _ => true,
                };
                let mut ids: BTreeSet<GroupingId> = self
                    .registry
                    .list_groupings()
                    .await?
                    .into_iter()
                    .filter(|id| wanted(id.kind()) && self.config.groupings.enabled(id.kind()))
                    .collect();
                ids.extend(self.store.grouping_ids().into_iter().filter(|id| wanted(id.kind())));
                ids
            }
        };

        let total = ids.len();
        let results: Vec<(GroupingId, SyncResult)> = stream::iter(ids)
            .map(|id| async move {
                let result = match self.reconcile(&id).await {
                    Ok(report) => SyncResult::Completed { report },
                    Err(e) => {
                        tracing::warn!(grouping = %id, error = %e, "Reconcile failed");
                        SyncResult::Failed { error: e.to_string() }
                    }
                };
                (id, result)
            })
            .buffer_unordered(self.config.max_concurrent_reconciles.max(1))
            .collect()
            .await;
        self.locks.prune();

        let summary = SyncSummary {
            results: results.into_iter().collect(),
        };
        tracing::info!(
            scope = ?scope,
            groupings = total,
            succeeded = summary.succeeded(),
            failed = summary.failed(),
            "Sync complete"
        );
        Ok(summary)
    }

    /// Read-only snapshot of what is stored for a grouping or an entity.
    pub fn status(&self, query: &StatusQuery) -> StatusSnapshot {
        match query {
            StatusQuery::Grouping(grouping) => match self.store.get(grouping) {
                Some(mapping) => StatusSnapshot::Grouping(
                    GroupingStatus::from_mapping(&mapping, self.state(grouping))
                        .with_last_pass(self.last_pass.get(grouping).as_deref()),
                ),
                None => StatusSnapshot::Absent {
                    grouping: grouping.clone(),
                },
            },
            StatusQuery::Entity(entity_id) => {
                let mappings = self.store.list_all();
                StatusSnapshot::Entity(EntityStatus::locate(entity_id, mappings.iter().map(|m| m.as_ref())))
            }
        }
    }
}

fn slot_releases(backend: Backend, entries: &[SceneEntry]) -> Vec<SlotRelease> {
    entries
        .iter()
        .map(|e| (backend, e.address.clone(), e.slot))
        .collect()
}

#[async_trait]
impl SignalHandler for Orchestrator {
    async fn handle_signal(&self, signal: GroupingSignal) {
        match signal {
            GroupingSignal::Changed(grouping) => {
                if let Err(e) = self.reconcile(&grouping).await {
                    tracing::warn!(grouping = %grouping, error = %e, "Reconcile after change failed");
                }
            }
            GroupingSignal::Removed(grouping) => {
                if let Err(e) = self.deprovision(&grouping).await {
                    tracing::warn!(grouping = %grouping, error = %e, "Teardown after removal failed");
                }
            }
            GroupingSignal::Kind(kind) => {
                if let Err(e) = self.sync(SyncScope::Kind(kind)).await {
                    tracing::warn!(kind = %kind, error = %e, "Resync after registry change failed");
                }
            }
        }
    }
}
