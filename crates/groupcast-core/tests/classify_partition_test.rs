//! Classification feeding the partitioner, the way a reconcile pass uses them.

use groupcast_core::{
    Backend, Capability, CapabilityPartitioner, DeviceDescriptor, EntityClassifier, EntityDescriptor,
    PartitionKey, UnknownReason,
};

fn registry() -> Vec<(&'static str, Option<EntityDescriptor>)> {
    vec![
        (
            "light.color",
            Some(
                EntityDescriptor::new("light.color", "zwave_js")
                    .with_unique_id("100-2-51-0")
                    .with_color_modes(["hs"]),
            ),
        ),
        (
            "light.dimmer",
            Some(
                EntityDescriptor::new("light.dimmer", "zwave_js")
                    .with_unique_id("100-3-38-0")
                    .with_color_modes(["brightness"]),
            ),
        ),
        (
            "switch.plug",
            Some(EntityDescriptor::new("switch.plug", "zwave_js").with_unique_id("100-4-37-0")),
        ),
        (
            "light.z2m",
            Some(
                EntityDescriptor::new("light.z2m", "mqtt").with_device(
                    DeviceDescriptor::new("d1").with_identifier("mqtt", "zigbee2mqtt_0x00124b0001"),
                ),
            ),
        ),
        ("light.ghost", None),
        ("sensor.temp", Some(EntityDescriptor::new("sensor.temp", "zwave_js"))),
    ]
}

#[test]
fn test_mixed_grouping_partitions() {
    let classifier = EntityClassifier::default();
    let classified = registry()
        .into_iter()
        .map(|(id, desc)| classifier.classify(id, desc.as_ref()));
    let partition = CapabilityPartitioner::partition(classified);

    let keys: Vec<_> = partition.keys().copied().collect();
    assert_eq!(
        keys,
        vec![
            PartitionKey::new(Backend::ZWaveJs, Capability::Binary),
            PartitionKey::new(Backend::ZWaveJs, Capability::Dimmer),
            PartitionKey::new(Backend::ZWaveJs, Capability::Color),
            PartitionKey::new(Backend::Zigbee2Mqtt, Capability::Unified),
        ]
    );
    assert_eq!(partition.unmapped.len(), 2);
    assert_eq!(partition.unmapped["light.ghost"], UnknownReason::NotRegistered);
    assert_eq!(partition.unmapped["sensor.temp"], UnknownReason::UngroupableDomain);
    assert_eq!(partition.len(), 6);
}

#[test]
fn test_classification_is_deterministic() {
    let classifier = EntityClassifier::default();
    for (id, desc) in registry() {
        assert_eq!(
            classifier.classify(id, desc.as_ref()),
            classifier.classify(id, desc.as_ref())
        );
    }
}
