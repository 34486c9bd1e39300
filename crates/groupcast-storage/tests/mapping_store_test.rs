//! MappingStore behavior over both backends.

use std::collections::BTreeSet;
use std::sync::Arc;

use groupcast_core::{
    Backend, Capability, GroupMapping, GroupMember, GroupingId, NativeGroup, NativeHandle, PartitionKey,
};
use groupcast_storage::backends::{MemoryBackend, RedbBackend};
use groupcast_storage::MappingStore;
use tokio::test;

fn broker_mapping(grouping: GroupingId, friendly_name: &str) -> GroupMapping {
    let mut mapping = GroupMapping::new(grouping);
    let members: BTreeSet<_> = [GroupMember::new("light.a", "0x01")].into_iter().collect();
    mapping.groups.insert(
        PartitionKey::new(Backend::Zigbee2Mqtt, Capability::Unified),
        NativeGroup::new(
            NativeHandle::BrokerGroup {
                friendly_name: friendly_name.to_string(),
            },
            members,
        ),
    );
    mapping.touch();
    mapping
}

#[test]
async fn test_put_get_delete() {
    let store = MappingStore::open(Arc::new(MemoryBackend::new())).unwrap();
    let id = GroupingId::area("kitchen");

    assert!(store.get(&id).is_none());
    store.put(broker_mapping(id.clone(), "groupcast_area_kitchen_zigbee2mqtt_unified")).await.unwrap();

    let stored = store.get(&id).unwrap();
    assert_eq!(stored.groups.len(), 1);
    assert!(stored.last_synced > 0);

    assert!(store.delete(&id).await.unwrap());
    assert!(store.get(&id).is_none());
    assert!(!store.delete(&id).await.unwrap());
}

#[test]
async fn test_redb_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("groupcast.redb");
    let id = GroupingId::label("night");

    {
        let store = MappingStore::open(Arc::new(RedbBackend::open(&path).unwrap())).unwrap();
        store.put(broker_mapping(id.clone(), "groupcast_label_night_zigbee2mqtt_unified")).await.unwrap();
    }

    let store = MappingStore::open(Arc::new(RedbBackend::open(&path).unwrap())).unwrap();
    assert!(store.is_persistent());
    let mapping = store.get(&id).unwrap();
    assert_eq!(mapping.grouping, id);
    assert_eq!(mapping.covered_entities().len(), 1);
}

#[test]
async fn test_handle_owner() {
    let store = MappingStore::open(Arc::new(MemoryBackend::new())).unwrap();
    let id = GroupingId::group("hall");
    store.put(broker_mapping(id.clone(), "groupcast_group_hall_zigbee2mqtt_unified")).await.unwrap();

    let owned = NativeHandle::BrokerGroup {
        friendly_name: "groupcast_group_hall_zigbee2mqtt_unified".into(),
    };
    let stranger = NativeHandle::BrokerGroup {
        friendly_name: "someone_else".into(),
    };
    assert_eq!(store.handle_owner(&owned), Some(id));
    assert_eq!(store.handle_owner(&stranger), None);
}

#[test]
async fn test_concurrent_puts_on_distinct_keys() {
    let store = Arc::new(MappingStore::open(Arc::new(MemoryBackend::new())).unwrap());
    let tasks: Vec<_> = (0..16)
        .map(|i| {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                let id = GroupingId::area(format!("room_{i}"));
                store.put(broker_mapping(id, &format!("g{i}"))).await
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }
    assert_eq!(store.len(), 16);
    assert_eq!(store.backend_counts().get("zigbee2mqtt"), Some(&16));
}
