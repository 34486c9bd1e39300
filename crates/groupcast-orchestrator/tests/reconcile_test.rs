//! Reconciliation scenarios against recording transports.

mod common;

use std::collections::BTreeSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use common::{hue_light, z2m_light, zha_light, zwave_light, FakeRegistry, Harness};
use groupcast_core::{
    Backend, Capability, Command, GroupingId, NativeHandle, PartitionKey, SceneEntry, SlotId,
};
use groupcast_handlers::handlers::zwave_js::CC_SCENE_ACTUATOR_CONFIGURATION;
use groupcast_handlers::{GroupSpec, HandlerResult, ProtocolHandler, ZhaGroupInfo};
use groupcast_orchestrator::{
    FailureKind, GroupingState, KeyAction, Maintenance, StatusQuery, StatusSnapshot, SyncScope, UnmappedReason,
};
use groupcast_storage::MappingStore;
use serde_json::json;
use tokio::test;

fn zwave_key(capability: Capability) -> PartitionKey {
    PartitionKey::new(Backend::ZWaveJs, capability)
}

#[test]
async fn test_zwave_lights_split_by_capability() {
    let h = Harness::new();
    let area = GroupingId::area("living_room");
    h.registry.add_entity(zwave_light("light.color", 2, &["hs"]));
    h.registry.add_entity(zwave_light("light.dimmer", 3, &["brightness"]));
    h.registry.add_entity(zwave_light("light.plain", 4, &["onoff"]));
    h.registry
        .set_members(&area, &["light.color", "light.dimmer", "light.plain"]);

    let report = h.orchestrator.reconcile(&area).await.unwrap();

    assert!(report.is_complete());
    assert!(report.unmapped.is_empty());
    assert_eq!(report.state, GroupingState::Mapped);
    assert_eq!(report.keys.len(), 3);
    assert!(report.keys.iter().all(|k| k.action == KeyAction::Ensured && k.succeeded()));

    let mapping = h.store.get(&area).unwrap();
    assert_eq!(mapping.groups.len(), 3);
    for (capability, entity) in [
        (Capability::Color, "light.color"),
        (Capability::Dimmer, "light.dimmer"),
        (Capability::Binary, "light.plain"),
    ] {
        let group = &mapping.groups[&zwave_key(capability)];
        assert_eq!(group.entity_ids().collect::<Vec<_>>(), vec![entity]);
    }
    assert_eq!(h.orchestrator.state(&area), GroupingState::Mapped);
}

#[test]
async fn test_reconcile_is_idempotent_and_converges() {
    let h = Harness::new();
    let area = GroupingId::area("kitchen");
    h.registry.add_entity(zwave_light("light.a", 2, &["brightness"]));
    h.registry.add_entity(zwave_light("light.b", 3, &["brightness"]));
    h.registry.add_entity(zwave_light("light.c", 5, &["hs"]));
    h.registry.set_members(&area, &["light.a", "light.b", "light.c"]);

    h.orchestrator.reconcile(&area).await.unwrap();
    let first = h.store.get(&area).unwrap();
    h.orchestrator.reconcile(&area).await.unwrap();
    let second = h.store.get(&area).unwrap();
    assert_eq!(first.groups, second.groups);

    // The color light leaves: its key goes away, the dimmer key stays.
    h.registry.set_members(&area, &["light.a", "light.b"]);
    let report = h.orchestrator.reconcile(&area).await.unwrap();
    assert!(report
        .keys
        .iter()
        .any(|k| k.key == zwave_key(Capability::Color) && k.action == KeyAction::Deleted && k.succeeded()));

    let mapping = h.store.get(&area).unwrap();
    assert_eq!(mapping.groups.len(), 1);
    let dimmers: BTreeSet<&str> = mapping.groups[&zwave_key(Capability::Dimmer)].entity_ids().collect();
    assert_eq!(dimmers, ["light.a", "light.b"].into_iter().collect());
}

#[test]
async fn test_every_member_is_covered_or_unmapped() {
    let h = Harness::new();
    let area = GroupingId::area("office");
    h.registry.add_entity(zwave_light("light.zw", 2, &["brightness"]));
    h.registry.add_entity(z2m_light("light.z2m", "0x00158d0001a2b3c4"));
    h.registry.add_entity(zha_light("light.zha", "00:0d:6f:00:0a:90:69:e7"));
    h.registry.add_entity(hue_light("light.hue"));
    let members = ["light.zw", "light.z2m", "light.zha", "light.hue", "light.ghost"];
    h.registry.set_members(&area, &members);

    let report = h.orchestrator.reconcile(&area).await.unwrap();
    let mapping = h.store.get(&area).unwrap();
    let covered = mapping.covered_entities();

    for entity_id in members {
        let unmapped = report.unmapped.contains_key(entity_id);
        assert!(
            covered.contains(entity_id) != unmapped,
            "{entity_id} must be exactly one of covered or unmapped"
        );
    }
    assert!(matches!(report.unmapped["light.hue"], UnmappedReason::Unknown(_)));
    assert!(matches!(report.unmapped["light.ghost"], UnmappedReason::Unknown(_)));
    assert_eq!(covered.len(), 3);

    match h.orchestrator.status(&StatusQuery::Grouping(area.clone())) {
        StatusSnapshot::Grouping(status) => {
            assert_eq!(status.unmapped, report.unmapped);
            assert_eq!(status.sync_error, None);
        }
        other => panic!("unexpected status {other:?}"),
    }

    // A failed key shows up as the grouping's sync error.
    h.zha.down.store(true, Ordering::SeqCst);
    h.registry.add_entity(zha_light("light.zha2", "00:0d:6f:00:0a:90:69:e8"));
    h.registry.set_members(&area, &["light.zw", "light.z2m", "light.zha", "light.zha2", "light.hue"]);
    let report = h.orchestrator.reconcile(&area).await.unwrap();
    assert!(!report.is_complete());
    match h.orchestrator.status(&StatusQuery::Grouping(area.clone())) {
        StatusSnapshot::Grouping(status) => {
            let error = status.sync_error.expect("failed key is reported");
            assert!(error.starts_with("zha/unified: "), "{error}");
            assert_eq!(status.unmapped, report.unmapped);
            assert!(status.unmapped.contains_key("light.hue"));
            assert!(!status.unmapped.contains_key("light.ghost"));
        }
        other => panic!("unexpected status {other:?}"),
    }
}

#[test]
async fn test_scene_slot_exhaustion_hits_one_device() {
    let h = Harness::new();
    let scene = GroupingId::scene("movie");
    let lights = [("light.a", 2), ("light.b", 3), ("light.c", 4), ("light.d", 5), ("light.e", 6)];
    for (entity_id, node) in lights {
        h.registry.add_entity(zwave_light(entity_id, node, &["brightness"]));
    }
    let slots = h.orchestrator.handlers().scene_slots();
    for slot in 100..255 {
        slots.seed(Backend::ZWaveJs, "6", slot);
    }
    h.registry.set_scene(
        &scene,
        &lights
            .iter()
            .map(|(entity_id, _)| (*entity_id, json!({"state": "on", "brightness": 128})))
            .collect::<Vec<_>>(),
    );

    let report = h.orchestrator.reconcile(&scene).await.unwrap();

    assert_eq!(report.scene_failures.len(), 1);
    assert_eq!(report.scene_failures[0].entity_id, "light.e");
    assert_eq!(report.scene_failures[0].error.kind, FailureKind::SlotExhausted);

    let mapping = h.store.get(&scene).unwrap();
    let group = &mapping.groups[&zwave_key(Capability::Dimmer)];
    let programmed: BTreeSet<&str> = group.scene.iter().map(|e| e.entity_id.as_str()).collect();
    assert_eq!(programmed, ["light.a", "light.b", "light.c", "light.d"].into_iter().collect());
    assert!(group.scene.iter().all(|e| e.slot == 100));

    // Four devices were programmed through scene actuator configuration.
    let stored: BTreeSet<u16> = h
        .zwave
        .cc_calls
        .lock()
        .unwrap()
        .iter()
        .filter(|(_, cc, _)| *cc == CC_SCENE_ACTUATOR_CONFIGURATION)
        .map(|(node, _, _)| *node)
        .collect();
    assert_eq!(stored, [2, 3, 4, 5].into_iter().collect());
}

#[test]
async fn test_scene_reuses_slots_and_releases_dropped_entries() {
    let h = Harness::new();
    let scene = GroupingId::scene("dinner");
    h.registry.add_entity(zwave_light("light.a", 2, &["brightness"]));
    h.registry.add_entity(zwave_light("light.b", 3, &["brightness"]));
    h.registry.set_scene(
        &scene,
        &[("light.a", json!("on")), ("light.b", json!({"state": "on", "brightness": 40}))],
    );
    h.orchestrator.reconcile(&scene).await.unwrap();
    let slots = h.orchestrator.handlers().scene_slots();
    assert_eq!(slots.in_use(Backend::ZWaveJs, "2"), 1);
    assert_eq!(slots.in_use(Backend::ZWaveJs, "3"), 1);

    h.registry.set_scene(&scene, &[("light.a", json!("on"))]);
    h.orchestrator.reconcile(&scene).await.unwrap();

    let mapping = h.store.get(&scene).unwrap();
    let group = &mapping.groups[&zwave_key(Capability::Dimmer)];
    assert_eq!(group.scene.len(), 1);
    assert_eq!(group.scene[0].entity_id, "light.a");
    assert_eq!(group.scene[0].slot, 100);
    assert_eq!(slots.in_use(Backend::ZWaveJs, "2"), 1);
    assert_eq!(slots.in_use(Backend::ZWaveJs, "3"), 0);
}

#[test]
async fn test_removed_grouping_leaves_no_native_groups() {
    let h = Harness::new();
    let area = GroupingId::area("den");
    h.registry.add_entity(zha_light("light.a", "00:0d:6f:00:0a:90:69:01"));
    h.registry.add_entity(zha_light("light.b", "00:0d:6f:00:0a:90:69:02"));
    h.registry.set_members(&area, &["light.a", "light.b"]);
    h.orchestrator.reconcile(&area).await.unwrap();
    assert_eq!(h.zha.group_ids().len(), 1);

    h.registry.remove(&area);
    let report = h.orchestrator.reconcile(&area).await.unwrap();

    assert_eq!(report.state, GroupingState::Unmapped);
    assert!(report.keys.iter().all(|k| k.action == KeyAction::Deleted && k.succeeded()));
    assert!(h.zha.group_ids().is_empty());
    assert!(matches!(
        h.orchestrator.status(&StatusQuery::Grouping(area.clone())),
        StatusSnapshot::Absent { .. }
    ));
}

#[test]
async fn test_failed_teardown_leaves_tombstone_until_retry() {
    let h = Harness::new();
    let area = GroupingId::area("garage");
    h.registry.add_entity(zha_light("light.a", "00:0d:6f:00:0a:90:69:01"));
    h.registry.set_members(&area, &["light.a"]);
    h.orchestrator.reconcile(&area).await.unwrap();

    h.zha.down.store(true, Ordering::SeqCst);
    let report = h.orchestrator.deprovision(&area).await.unwrap();
    assert_eq!(report.state, GroupingState::Deprovisioning);
    assert_eq!(report.failures().count(), 1);
    match h.orchestrator.status(&StatusQuery::Grouping(area.clone())) {
        StatusSnapshot::Grouping(status) => {
            assert!(status.tombstone);
            assert_eq!(status.groups.len(), 1);
        }
        other => panic!("expected a tombstone, got {other:?}"),
    }

    // The gateway comes back and a full sync finishes the job.
    h.zha.down.store(false, Ordering::SeqCst);
    h.registry.remove(&area);
    let summary = h.orchestrator.sync(SyncScope::All).await.unwrap();
    assert_eq!(summary.failed(), 0);
    assert!(h.store.get(&area).is_none());
    assert!(h.zha.group_ids().is_empty());
}

#[test]
async fn test_rejected_key_is_skipped_until_members_change() {
    let h = Harness::new();
    let area = GroupingId::area("attic");
    h.registry.add_entity(zwave_light("light.a", 2, &["brightness"]));
    h.registry.add_entity(zwave_light("light.b", 9, &["brightness"]));
    h.zwave.missing.lock().unwrap().insert(9);
    h.registry.set_members(&area, &["light.a", "light.b"]);

    let report = h.orchestrator.reconcile(&area).await.unwrap();
    assert_eq!(report.failures().count(), 1);
    assert_eq!(report.failures().next().unwrap().error.as_ref().unwrap().kind, FailureKind::BackendRejected);
    assert_eq!(report.unmapped["light.a"], UnmappedReason::Rejected);
    let node_checks = *h.zwave.node_checks.lock().unwrap();

    let report = h.orchestrator.reconcile(&area).await.unwrap();
    assert_eq!(report.keys.len(), 1);
    assert_eq!(report.keys[0].action, KeyAction::Skipped);
    assert_eq!(*h.zwave.node_checks.lock().unwrap(), node_checks);

    // A membership change makes the key eligible again.
    h.registry.set_members(&area, &["light.a"]);
    let report = h.orchestrator.reconcile(&area).await.unwrap();
    assert!(report.is_complete());
    let mapping = h.store.get(&area).unwrap();
    assert!(mapping.rejected.is_empty());
    assert!(mapping.groups.contains_key(&zwave_key(Capability::Dimmer)));
}

#[test]
async fn test_disabled_kind_is_torn_down() {
    let store = Arc::new(MappingStore::open(Arc::new(groupcast_storage::backends::MemoryBackend::new())).unwrap());
    let registry = Arc::new(FakeRegistry::default());
    let label = GroupingId::label("evening");
    registry.add_entity(zha_light("light.a", "00:0d:6f:00:0a:90:69:01"));
    registry.set_members(&label, &["light.a"]);

    let h = Harness::with_store(Arc::clone(&store), Arc::clone(&registry));
    h.orchestrator.reconcile(&label).await.unwrap();
    assert!(store.get(&label).is_some());

    let mut config = common::test_config();
    config.groupings.labels = false;
    let h = Harness::build(Arc::clone(&store), registry, config, |builder| builder);
    let report = h.orchestrator.reconcile(&label).await.unwrap();
    assert_eq!(report.state, GroupingState::Unmapped);
    assert!(store.get(&label).is_none());
}

#[tokio::test]
async fn test_mappings_and_slots_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("groupcast.redb");
    let scene = GroupingId::scene("reading");
    let registry = Arc::new(FakeRegistry::default());
    registry.add_entity(zwave_light("light.a", 2, &["brightness"]));
    registry.set_scene(&scene, &[("light.a", json!("on"))]);

    {
        let store = Arc::new(MappingStore::open_path(&path).unwrap());
        let h = Harness::with_store(store, Arc::clone(&registry));
        h.orchestrator.reconcile(&scene).await.unwrap();
    }

    let store = Arc::new(MappingStore::open_path(&path).unwrap());
    let h = Harness::with_store(Arc::clone(&store), registry);
    let mapping = store.get(&scene).unwrap();
    assert_eq!(mapping.scene_entries().count(), 1);
    assert_eq!(h.orchestrator.state(&scene), GroupingState::Mapped);

    // Slot 100 on node 2 is already claimed by the stored scene.
    let next = h.orchestrator.handlers().scene_slots().reserve(Backend::ZWaveJs, "2").unwrap();
    assert_eq!(next, 101);
}

/// Hands out the same handle to every grouping.
struct StickyHandler;

#[async_trait]
impl ProtocolHandler for StickyHandler {
    fn backend(&self) -> Backend {
        Backend::Zha
    }

    async fn ensure_group(&self, _spec: GroupSpec<'_>) -> HandlerResult<NativeHandle> {
        Ok(NativeHandle::ManagedGroup {
            group_id: 0x1000,
            name: "groupcast_shared".into(),
        })
    }

    async fn delete_group(&self, _handle: &NativeHandle) -> HandlerResult<()> {
        Ok(())
    }

    async fn send_group_command(&self, _handle: &NativeHandle, _command: &Command) -> HandlerResult<()> {
        Ok(())
    }

    fn accepts(&self, _capability: Capability, _command: &Command) -> bool {
        true
    }

    async fn store_scene(&self, _handle: &NativeHandle, _entries: &[SceneEntry]) -> HandlerResult<()> {
        Ok(())
    }

    async fn reserve_scene_slot(&self, _device: &str) -> HandlerResult<SlotId> {
        Ok(100)
    }
}

#[test]
async fn test_handle_owned_by_another_grouping_is_refused() {
    let store = Arc::new(MappingStore::open(Arc::new(groupcast_storage::backends::MemoryBackend::new())).unwrap());
    let registry = Arc::new(FakeRegistry::default());
    let h = Harness::build(store, registry, common::test_config(), |builder| {
        builder.handler(Arc::new(StickyHandler))
    });
    let first = GroupingId::area("one");
    let second = GroupingId::area("two");
    h.registry.add_entity(zha_light("light.a", "00:0d:6f:00:0a:90:69:01"));
    h.registry.add_entity(zha_light("light.b", "00:0d:6f:00:0a:90:69:02"));
    h.registry.set_members(&first, &["light.a"]);
    h.registry.set_members(&second, &["light.b"]);

    assert!(h.orchestrator.reconcile(&first).await.unwrap().is_complete());
    let report = h.orchestrator.reconcile(&second).await.unwrap();

    let failure = report.failures().next().unwrap().error.clone().unwrap();
    assert_eq!(failure.kind, FailureKind::HandleConflict);
    assert!(h.store.get(&second).is_none());
    assert_eq!(report.unmapped["light.b"], UnmappedReason::Unavailable);
}

#[test]
async fn test_orphans_removed_after_two_sweeps() {
    let h = Harness::new();
    let area = GroupingId::area("hall");
    h.registry.add_entity(zha_light("light.a", "00:0d:6f:00:0a:90:69:01"));
    h.registry.set_members(&area, &["light.a"]);
    h.orchestrator.reconcile(&area).await.unwrap();
    h.zha.groups.lock().unwrap().push(ZhaGroupInfo {
        group_id: 0x1800,
        name: "groupcast_area_gone_zha_unified".into(),
        members: vec![],
    });
    h.zha.groups.lock().unwrap().push(ZhaGroupInfo {
        group_id: 0x0042,
        name: "Kitchen lights".into(),
        members: vec![],
    });

    let maintenance = Maintenance::new(Arc::clone(&h.orchestrator));
    assert_eq!(maintenance.cleanup_orphans().await, (0, 1));
    assert_eq!(maintenance.cleanup_orphans().await, (1, 0));

    let mut remaining = h.zha.group_ids();
    remaining.sort_unstable();
    assert_eq!(remaining.len(), 2);
    assert!(remaining.contains(&0x0042));
    assert!(!remaining.contains(&0x1800));
}
