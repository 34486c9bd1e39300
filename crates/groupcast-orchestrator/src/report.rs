//! Structured outcomes of orchestrator operations.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use groupcast_core::{
    Backend, Capability, GroupMapping, GroupMember, GroupingId, NativeHandle, PartitionKey, SceneEntry,
    UnknownReason,
};
use groupcast_handlers::HandlerError;
use serde::{Deserialize, Serialize};

/// Lifecycle of one grouping as the orchestrator sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupingState {
    #[default]
    Unmapped,
    Provisioning,
    Mapped,
    Deprovisioning,
}

impl fmt::Display for GroupingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GroupingState::Unmapped => "unmapped",
            GroupingState::Provisioning => "provisioning",
            GroupingState::Mapped => "mapped",
            GroupingState::Deprovisioning => "deprovisioning",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    BackendUnavailable,
    BackendRejected,
    SlotExhausted,
    /// The backend handed back a handle another grouping owns.
    HandleConflict,
    /// No handler is configured for the backend.
    NoHandler,
    Unsupported,
}

/// A failed backend call, in reportable form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
}

impl Failure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind == FailureKind::BackendUnavailable
    }
}

impl From<&HandlerError> for Failure {
    fn from(e: &HandlerError) -> Self {
        let kind = match e {
            HandlerError::BackendUnavailable(_) => FailureKind::BackendUnavailable,
            HandlerError::BackendRejected(_) => FailureKind::BackendRejected,
            HandlerError::SlotExhausted { .. } => FailureKind::SlotExhausted,
            HandlerError::Unsupported(_) => FailureKind::Unsupported,
        };
        Failure::new(kind, e.to_string())
    }
}

impl From<HandlerError> for Failure {
    fn from(e: HandlerError) -> Self {
        Failure::from(&e)
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyAction {
    /// EnsureGroup was called.
    Ensured,
    /// DeleteGroup was called for a dropped key.
    Deleted,
    /// A previously rejected key with unchanged members.
    Skipped,
}

/// What happened to one partition key during a pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyOutcome {
    pub key: PartitionKey,
    pub action: KeyAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Failure>,
}

impl KeyOutcome {
    pub fn ok(key: PartitionKey, action: KeyAction) -> Self {
        Self {
            key,
            action,
            error: None,
        }
    }

    pub fn failed(key: PartitionKey, action: KeyAction, error: Failure) -> Self {
        Self {
            key,
            action,
            error: Some(error),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Why a member is served by unicast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum UnmappedReason {
    /// The classifier found no native capability.
    Unknown(UnknownReason),
    /// Native backend without a configured handler.
    NoHandler,
    /// The backend rejected the member's key.
    Rejected,
    /// The member's key could not be provisioned this pass.
    Unavailable,
}

impl fmt::Display for UnmappedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnmappedReason::Unknown(reason) => write!(f, "{reason}"),
            UnmappedReason::NoHandler => f.write_str("no handler for backend"),
            UnmappedReason::Rejected => f.write_str("rejected by backend"),
            UnmappedReason::Unavailable => f.write_str("backend unavailable"),
        }
    }
}

/// Scene slot failure for one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneFailure {
    pub entity_id: String,
    pub key: PartitionKey,
    pub error: Failure,
}

/// Result of one reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub grouping: GroupingId,
    pub state: GroupingState,
    pub keys: Vec<KeyOutcome>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scene_failures: Vec<SceneFailure>,
    /// Members left to unicast after this pass.
    pub unmapped: BTreeMap<String, UnmappedReason>,
}

impl ReconcileReport {
    pub fn new(grouping: GroupingId) -> Self {
        Self {
            grouping,
            state: GroupingState::Unmapped,
            keys: Vec::new(),
            scene_failures: Vec::new(),
            unmapped: BTreeMap::new(),
        }
    }

    /// Every key call succeeded. Scene failures and unmapped members do not
    /// count against a pass.
    pub fn is_complete(&self) -> bool {
        self.keys.iter().all(KeyOutcome::succeeded)
    }

    pub fn failures(&self) -> impl Iterator<Item = &KeyOutcome> {
        self.keys.iter().filter(|k| !k.succeeded())
    }
}

/// What the most recent pass left behind for a grouping. Kept in memory
/// only; a restart starts from nothing until the next pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastPass {
    pub unmapped: BTreeMap<String, UnmappedReason>,
    /// Failed keys of the pass, or why the pass aborted.
    pub error: Option<String>,
    /// Unix timestamp the pass finished.
    pub finished_at: i64,
}

impl LastPass {
    pub fn from_report(report: &ReconcileReport, finished_at: i64) -> Self {
        let failed: Vec<String> = report
            .failures()
            .filter_map(|k| k.error.as_ref().map(|e| format!("{}: {}", k.key, e)))
            .collect();
        Self {
            unmapped: report.unmapped.clone(),
            error: (!failed.is_empty()).then(|| failed.join("; ")),
            finished_at,
        }
    }

    /// A pass that aborted. The unmapped set of the previous pass still
    /// describes what dispatch will do.
    pub fn aborted(previous: Option<LastPass>, error: impl Into<String>, finished_at: i64) -> Self {
        Self {
            unmapped: previous.map(|p| p.unmapped).unwrap_or_default(),
            error: Some(error.into()),
            finished_at,
        }
    }
}

/// Outcome of one grouping within a sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum SyncResult {
    Completed { report: ReconcileReport },
    /// The pass aborted, e.g. the registry or the store failed.
    Failed { error: String },
}

impl SyncResult {
    /// The pass ran and every key call succeeded.
    pub fn is_success(&self) -> bool {
        matches!(self, SyncResult::Completed { report } if report.is_complete())
    }
}

/// Per-grouping results of a sync.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSummary {
    pub results: BTreeMap<GroupingId, SyncResult>,
}

impl SyncSummary {
    pub fn succeeded(&self) -> usize {
        self.results.values().filter(|r| r.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }

    pub fn get(&self, grouping: &GroupingId) -> Option<&SyncResult> {
        self.results.get(grouping)
    }
}

/// How a dispatched command reached its devices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "route", rename_all = "snake_case")]
pub enum DispatchRoute {
    Group {
        grouping: GroupingId,
        key: PartitionKey,
        handle: NativeHandle,
    },
    SceneRecall {
        grouping: GroupingId,
        key: PartitionKey,
        devices: usize,
    },
    Unicast {
        entity_id: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchOutcome {
    pub route: DispatchRoute,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Failure>,
}

impl DispatchOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Every sub-target of one dispatch, each reported on its own.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchReport {
    pub outcomes: Vec<DispatchOutcome>,
}

impl DispatchReport {
    pub fn group_calls(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.route, DispatchRoute::Group { .. }))
            .count()
    }

    pub fn unicast_calls(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.route, DispatchRoute::Unicast { .. }))
            .count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &DispatchOutcome> {
        self.outcomes.iter().filter(|o| !o.succeeded())
    }

    pub fn all_succeeded(&self) -> bool {
        self.outcomes.iter().all(DispatchOutcome::succeeded)
    }

    /// Entities that received a unicast call.
    pub fn unicast_entities(&self) -> BTreeSet<&str> {
        self.outcomes
            .iter()
            .filter_map(|o| match &o.route {
                DispatchRoute::Unicast { entity_id } => Some(entity_id.as_str()),
                _ => None,
            })
            .collect()
    }
}

/// Diagnostic view of one native group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyStatus {
    pub backend: Backend,
    pub capability: Capability,
    pub handle: NativeHandle,
    pub members: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scene_slots: Vec<(String, u16)>,
}

/// Diagnostic view of one grouping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupingStatus {
    pub grouping: GroupingId,
    pub state: GroupingState,
    pub tombstone: bool,
    pub last_synced: i64,
    pub groups: Vec<KeyStatus>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rejected: Vec<(PartitionKey, String)>,
    /// Members the last pass left to unicast.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub unmapped: BTreeMap<String, UnmappedReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_error: Option<String>,
}

/// Where one entity is natively grouped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityPlacement {
    pub grouping: GroupingId,
    pub key: PartitionKey,
    pub handle: NativeHandle,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scene_slot: Option<u16>,
}

/// Diagnostic view of one entity across all groupings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityStatus {
    pub entity_id: String,
    pub placements: Vec<EntityPlacement>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StatusSnapshot {
    Grouping(GroupingStatus),
    Entity(EntityStatus),
    /// Nothing is stored for the grouping.
    Absent { grouping: GroupingId },
}

impl GroupingStatus {
    pub fn from_mapping(mapping: &GroupMapping, state: GroupingState) -> Self {
        Self {
            grouping: mapping.grouping.clone(),
            state,
            tombstone: mapping.tombstone,
            last_synced: mapping.last_synced,
            groups: mapping
                .groups
                .iter()
                .map(|(key, group)| KeyStatus::from_group(key, &group.members, &group.handle, &group.scene))
                .collect(),
            rejected: mapping
                .rejected
                .iter()
                .map(|(key, rejected)| (*key, rejected.reason.clone()))
                .collect(),
            unmapped: BTreeMap::new(),
            sync_error: None,
        }
    }

    pub fn with_last_pass(mut self, last: Option<&LastPass>) -> Self {
        if let Some(last) = last {
            self.unmapped = last.unmapped.clone();
            self.sync_error = last.error.clone();
        }
        self
    }
}

impl EntityStatus {
    /// Collect every native group holding `entity_id`.
    pub fn locate<'a>(entity_id: &str, mappings: impl IntoIterator<Item = &'a GroupMapping>) -> Self {
        let placements = mappings
            .into_iter()
            .filter_map(|mapping| {
                let (key, group) = mapping.group_of(entity_id)?;
                Some(EntityPlacement {
                    grouping: mapping.grouping.clone(),
                    key: *key,
                    handle: group.handle.clone(),
                    scene_slot: group.scene.iter().find(|e| e.entity_id == entity_id).map(|e| e.slot),
                })
            })
            .collect();
        Self {
            entity_id: entity_id.to_string(),
            placements,
        }
    }
}

impl KeyStatus {
    pub fn from_group(key: &PartitionKey, members: &BTreeSet<GroupMember>, handle: &NativeHandle, scene: &[SceneEntry]) -> Self {
        Self {
            backend: key.backend,
            capability: key.capability,
            handle: handle.clone(),
            members: members.iter().map(|m| m.entity_id.clone()).collect(),
            scene_slots: scene.iter().map(|e| (e.entity_id.clone(), e.slot)).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_from_handler_error() {
        let failure = Failure::from(HandlerError::BackendUnavailable("timeout".into()));
        assert_eq!(failure.kind, FailureKind::BackendUnavailable);
        assert!(failure.is_transient());

        let failure = Failure::from(HandlerError::SlotExhausted { device: "5".into() });
        assert_eq!(failure.kind, FailureKind::SlotExhausted);
        assert!(!failure.is_transient());
    }

    #[test]
    fn test_report_completeness() {
        let key = PartitionKey::new(Backend::Zha, Capability::Unified);
        let mut report = ReconcileReport::new(GroupingId::group("g"));
        report.keys.push(KeyOutcome::ok(key, KeyAction::Ensured));
        assert!(report.is_complete());

        report.keys.push(KeyOutcome::failed(
            key,
            KeyAction::Deleted,
            Failure::new(FailureKind::BackendUnavailable, "down"),
        ));
        assert!(!report.is_complete());
        assert_eq!(report.failures().count(), 1);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["keys"][0]["key"], "zha/unified");
        assert!(json["keys"][0].get("error").is_none());
    }

    #[test]
    fn test_last_pass_summarizes_failures() {
        let key = PartitionKey::new(Backend::Zha, Capability::Unified);
        let mut report = ReconcileReport::new(GroupingId::group("g"));
        report.unmapped.insert("light.x".into(), UnmappedReason::Unavailable);
        assert_eq!(LastPass::from_report(&report, 1).error, None);

        report.keys.push(KeyOutcome::failed(
            key,
            KeyAction::Ensured,
            Failure::new(FailureKind::BackendUnavailable, "gateway offline"),
        ));
        let last = LastPass::from_report(&report, 2);
        assert_eq!(last.error.as_deref(), Some("zha/unified: gateway offline"));

        let aborted = LastPass::aborted(Some(last), "registry down", 3);
        assert_eq!(aborted.unmapped.len(), 1);
        assert_eq!(aborted.error.as_deref(), Some("registry down"));
    }
}
