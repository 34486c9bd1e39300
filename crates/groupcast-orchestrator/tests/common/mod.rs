//! In-process collaborators for orchestrator tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use groupcast_core::config::{Zigbee2MqttConfig, ZhaConfig};
use groupcast_core::{
    Command, DeviceDescriptor, EntityDescriptor, GroupcastConfig, GroupingId, GroupingRegistry, SlotId,
    TransportError, TransportResult, UnicastService,
};
use groupcast_handlers::{
    HandlerSet, MqttPublisher, ValueWrite, ZWaveClient, ZhaGateway, ZhaGroupInfo, ZhaSceneCommand,
};
use groupcast_orchestrator::Orchestrator;
use groupcast_storage::backends::MemoryBackend;
use groupcast_storage::MappingStore;
use serde_json::{Map, Value};

// --- registry ----------------------------------------------------------

#[derive(Default)]
pub struct FakeRegistry {
    groupings: Mutex<BTreeMap<GroupingId, BTreeSet<String>>>,
    entities: Mutex<HashMap<String, EntityDescriptor>>,
    scenes: Mutex<HashMap<GroupingId, BTreeMap<String, Value>>>,
    resolve_calls: Mutex<HashMap<GroupingId, usize>>,
}

impl FakeRegistry {
    pub fn add_entity(&self, descriptor: EntityDescriptor) {
        self.entities
            .lock()
            .unwrap()
            .insert(descriptor.entity_id.clone(), descriptor);
    }

    pub fn set_members(&self, grouping: &GroupingId, members: &[&str]) {
        self.groupings
            .lock()
            .unwrap()
            .insert(grouping.clone(), members.iter().map(|m| m.to_string()).collect());
    }

    pub fn set_scene(&self, scene: &GroupingId, targets: &[(&str, Value)]) {
        let members: Vec<&str> = targets.iter().map(|(e, _)| *e).collect();
        self.set_members(scene, &members);
        self.scenes.lock().unwrap().insert(
            scene.clone(),
            targets.iter().map(|(e, v)| (e.to_string(), v.clone())).collect(),
        );
    }

    pub fn remove(&self, grouping: &GroupingId) {
        self.groupings.lock().unwrap().remove(grouping);
        self.scenes.lock().unwrap().remove(grouping);
    }

    pub fn resolve_count(&self, grouping: &GroupingId) -> usize {
        self.resolve_calls.lock().unwrap().get(grouping).copied().unwrap_or(0)
    }
}

#[async_trait]
impl GroupingRegistry for FakeRegistry {
    async fn resolve_members(&self, grouping: &GroupingId) -> groupcast_core::Result<Option<BTreeSet<String>>> {
        *self.resolve_calls.lock().unwrap().entry(grouping.clone()).or_insert(0) += 1;
        Ok(self.groupings.lock().unwrap().get(grouping).cloned())
    }

    async fn describe_entity(&self, entity_id: &str) -> Option<EntityDescriptor> {
        self.entities.lock().unwrap().get(entity_id).cloned()
    }

    async fn list_groupings(&self) -> groupcast_core::Result<Vec<GroupingId>> {
        Ok(self.groupings.lock().unwrap().keys().cloned().collect())
    }

    async fn scene_states(&self, scene: &GroupingId) -> groupcast_core::Result<BTreeMap<String, Value>> {
        Ok(self.scenes.lock().unwrap().get(scene).cloned().unwrap_or_default())
    }
}

// --- descriptors -------------------------------------------------------

pub fn zwave_light(entity_id: &str, node: u16, modes: &[&str]) -> EntityDescriptor {
    EntityDescriptor::new(entity_id, "zwave_js")
        .with_unique_id(format!("3967834985-{node}-38-0-currentValue"))
        .with_color_modes(modes.iter().copied())
}

pub fn z2m_light(entity_id: &str, ieee: &str) -> EntityDescriptor {
    EntityDescriptor::new(entity_id, "mqtt")
        .with_device(DeviceDescriptor::new(format!("dev-{ieee}")).with_identifier("mqtt", format!("zigbee2mqtt_{ieee}")))
        .with_color_modes(["xy"])
}

pub fn zha_light(entity_id: &str, ieee: &str) -> EntityDescriptor {
    EntityDescriptor::new(entity_id, "zha")
        .with_unique_id(format!("{ieee}-1"))
        .with_color_modes(["brightness"])
}

pub fn hue_light(entity_id: &str) -> EntityDescriptor {
    EntityDescriptor::new(entity_id, "hue").with_unique_id("bridge-7")
}

// --- transports --------------------------------------------------------

#[derive(Default)]
pub struct FakeZWave {
    pub missing: Mutex<HashSet<u16>>,
    pub down: AtomicBool,
    pub multicasts: Mutex<Vec<(Vec<u16>, ValueWrite)>>,
    pub cc_calls: Mutex<Vec<(u16, u8, Vec<Value>)>>,
    pub node_checks: Mutex<usize>,
}

impl FakeZWave {
    fn check(&self) -> TransportResult<()> {
        if self.down.load(Ordering::SeqCst) {
            return Err(TransportError::Unavailable("driver disconnected".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl ZWaveClient for FakeZWave {
    async fn node_exists(&self, node: u16) -> TransportResult<bool> {
        self.check()?;
        *self.node_checks.lock().unwrap() += 1;
        Ok(!self.missing.lock().unwrap().contains(&node))
    }

    async fn multicast_set_value(&self, nodes: &[u16], write: &ValueWrite) -> TransportResult<()> {
        self.check()?;
        self.multicasts.lock().unwrap().push((nodes.to_vec(), write.clone()));
        Ok(())
    }

    async fn invoke_cc_api(&self, node: u16, cc: u8, _method: &str, args: Vec<Value>) -> TransportResult<()> {
        self.check()?;
        self.cc_calls.lock().unwrap().push((node, cc, args));
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeMqtt {
    pub failing_topics: Mutex<HashSet<String>>,
    pub published: Mutex<Vec<(String, Value)>>,
}

impl FakeMqtt {
    pub fn fail_topic(&self, topic: &str) {
        self.failing_topics.lock().unwrap().insert(topic.to_string());
    }

    pub fn published_to(&self, topic: &str) -> Vec<Value> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, p)| p.clone())
            .collect()
    }
}

#[async_trait]
impl MqttPublisher for FakeMqtt {
    async fn publish(&self, topic: &str, payload: &str) -> TransportResult<()> {
        if self.failing_topics.lock().unwrap().contains(topic) {
            return Err(TransportError::Unavailable("broker offline".into()));
        }
        let value = serde_json::from_str(payload).map_err(|e| TransportError::Rejected(e.to_string()))?;
        self.published.lock().unwrap().push((topic.to_string(), value));
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeZha {
    pub down: AtomicBool,
    pub groups: Mutex<Vec<ZhaGroupInfo>>,
    pub calls: Mutex<Vec<(String, String, Map<String, Value>)>>,
    pub scene_calls: Mutex<Vec<(u16, ZhaSceneCommand, SlotId)>>,
}

impl FakeZha {
    fn check(&self) -> TransportResult<()> {
        if self.down.load(Ordering::SeqCst) {
            return Err(TransportError::Unavailable("gateway offline".into()));
        }
        Ok(())
    }

    pub fn group_ids(&self) -> Vec<u16> {
        self.groups.lock().unwrap().iter().map(|g| g.group_id).collect()
    }
}

#[async_trait]
impl ZhaGateway for FakeZha {
    async fn list_groups(&self) -> TransportResult<Vec<ZhaGroupInfo>> {
        self.check()?;
        Ok(self.groups.lock().unwrap().clone())
    }

    async fn create_group(&self, name: &str, members: &[String], group_id: u16) -> TransportResult<u16> {
        self.check()?;
        self.groups.lock().unwrap().push(ZhaGroupInfo {
            group_id,
            name: name.to_string(),
            members: members.to_vec(),
        });
        Ok(group_id)
    }

    async fn add_members(&self, group_id: u16, members: &[String]) -> TransportResult<()> {
        self.check()?;
        if let Some(group) = self.groups.lock().unwrap().iter_mut().find(|g| g.group_id == group_id) {
            group.members.extend(members.iter().cloned());
        }
        Ok(())
    }

    async fn remove_members(&self, group_id: u16, members: &[String]) -> TransportResult<()> {
        self.check()?;
        if let Some(group) = self.groups.lock().unwrap().iter_mut().find(|g| g.group_id == group_id) {
            group.members.retain(|m| !members.contains(m));
        }
        Ok(())
    }

    async fn remove_group(&self, group_id: u16) -> TransportResult<()> {
        self.check()?;
        self.groups.lock().unwrap().retain(|g| g.group_id != group_id);
        Ok(())
    }

    async fn scene_command(&self, group_id: u16, command: ZhaSceneCommand, scene_id: SlotId) -> TransportResult<()> {
        self.check()?;
        self.scene_calls.lock().unwrap().push((group_id, command, scene_id));
        Ok(())
    }

    async fn call_service(&self, domain: &str, service: &str, data: Map<String, Value>) -> TransportResult<()> {
        self.check()?;
        self.calls
            .lock()
            .unwrap()
            .push((domain.to_string(), service.to_string(), data));
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeUnicast {
    pub failing: Mutex<HashSet<String>>,
    pub calls: Mutex<Vec<(String, Command)>>,
}

impl FakeUnicast {
    pub fn entities(&self) -> BTreeSet<String> {
        self.calls.lock().unwrap().iter().map(|(e, _)| e.clone()).collect()
    }
}

#[async_trait]
impl UnicastService for FakeUnicast {
    async fn call_service(&self, entity_id: &str, command: &Command) -> TransportResult<()> {
        if self.failing.lock().unwrap().contains(entity_id) {
            return Err(TransportError::Unavailable(format!("{entity_id} unreachable")));
        }
        self.calls
            .lock()
            .unwrap()
            .push((entity_id.to_string(), command.clone()));
        Ok(())
    }
}

// --- harness -----------------------------------------------------------

pub fn test_config() -> GroupcastConfig {
    GroupcastConfig {
        backend_call_timeout_ms: 1_000,
        sync_debounce_ms: 50,
        reconcile_interval_secs: 3_600,
        zigbee2mqtt: Zigbee2MqttConfig {
            group_settle_ms: 0,
            scene_store_delay_ms: 0,
            ..Default::default()
        },
        zha: ZhaConfig {
            scene_store_delay_ms: 0,
        },
        ..Default::default()
    }
}

pub struct Harness {
    pub registry: Arc<FakeRegistry>,
    pub unicast: Arc<FakeUnicast>,
    pub zwave: Arc<FakeZWave>,
    pub mqtt: Arc<FakeMqtt>,
    pub zha: Arc<FakeZha>,
    pub store: Arc<MappingStore>,
    pub orchestrator: Arc<Orchestrator>,
}

impl Harness {
    pub fn new() -> Self {
        let store = MappingStore::open(Arc::new(MemoryBackend::new())).unwrap();
        Self::with_store(Arc::new(store), Arc::new(FakeRegistry::default()))
    }

    pub fn with_store(store: Arc<MappingStore>, registry: Arc<FakeRegistry>) -> Self {
        Self::build(store, registry, test_config(), |builder| builder)
    }

    pub fn build(
        store: Arc<MappingStore>,
        registry: Arc<FakeRegistry>,
        config: GroupcastConfig,
        customize: impl FnOnce(groupcast_handlers::HandlerSetBuilder) -> groupcast_handlers::HandlerSetBuilder,
    ) -> Self {
        let unicast = Arc::new(FakeUnicast::default());
        let zwave = Arc::new(FakeZWave::default());
        let mqtt = Arc::new(FakeMqtt::default());
        let zha = Arc::new(FakeZha::default());
        let builder = HandlerSet::builder()
            .config(&config)
            .zwave_js(zwave.clone())
            .zigbee2mqtt(mqtt.clone())
            .zha(zha.clone());
        let handlers = customize(builder).build();
        let orchestrator = Arc::new(Orchestrator::new(
            config,
            registry.clone(),
            unicast.clone(),
            handlers,
            Arc::clone(&store),
        ));
        Self {
            registry,
            unicast,
            zwave,
            mqtt,
            zha,
            store,
            orchestrator,
        }
    }
}
