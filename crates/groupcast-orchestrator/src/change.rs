//! Change detection.
//!
//! Hosts report raw change notifications as [`ChangeEvent`]s. The
//! [`ChangeDetector`] turns each one into zero or more [`GroupingSignal`]s,
//! which the intake queues for the debounce scheduler.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use groupcast_core::config::GroupingToggles;
use groupcast_core::{GroupingId, GroupingKind};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::{OrchestratorError, Result};

/// Registry action carried by registry-updated events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistryAction {
    Create,
    Update,
    Remove,
}

/// A raw change notification from the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ChangeEvent {
    /// State change of a `group.*` or `scene.*` entity. `None` stands for an
    /// absent state, so a missing old state is a creation and a missing new
    /// state a removal.
    StateChanged {
        entity_id: String,
        old_members: Option<BTreeSet<String>>,
        new_members: Option<BTreeSet<String>>,
    },
    /// Explicit "membership changed" notification for a group.
    MembershipChanged { entity_id: String },
    /// Explicit scene lifecycle notification.
    SceneChanged {
        entity_id: String,
        action: RegistryAction,
    },
    /// Area, floor or label registry update.
    GroupingRegistry {
        kind: GroupingKind,
        id: String,
        action: RegistryAction,
    },
    /// Entity registry update; `changes` names the changed fields.
    EntityRegistry {
        entity_id: String,
        changes: BTreeSet<String>,
    },
    /// Device registry update; `changes` names the changed fields.
    DeviceRegistry {
        device_id: String,
        changes: BTreeSet<String>,
    },
}

/// Normalized "something about this grouping changed".
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum GroupingSignal {
    Changed(GroupingId),
    Removed(GroupingId),
    /// Resync every grouping of a kind.
    Kind(GroupingKind),
}

/// Debounce identity of a signal. `Changed` and `Removed` for the same
/// grouping share a key, so the later one replaces the earlier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SignalKey {
    Grouping(GroupingId),
    Kind(GroupingKind),
}

impl GroupingSignal {
    pub fn key(&self) -> SignalKey {
        match self {
            GroupingSignal::Changed(id) | GroupingSignal::Removed(id) => SignalKey::Grouping(id.clone()),
            GroupingSignal::Kind(kind) => SignalKey::Kind(*kind),
        }
    }

    pub fn kind(&self) -> GroupingKind {
        match self {
            GroupingSignal::Changed(id) | GroupingSignal::Removed(id) => id.kind(),
            GroupingSignal::Kind(kind) => *kind,
        }
    }
}

impl fmt::Display for GroupingSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupingSignal::Changed(id) => write!(f, "changed {id}"),
            GroupingSignal::Removed(id) => write!(f, "removed {id}"),
            GroupingSignal::Kind(kind) => write!(f, "resync {kind}"),
        }
    }
}

impl fmt::Display for SignalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalKey::Grouping(id) => write!(f, "{id}"),
            SignalKey::Kind(kind) => write!(f, "{kind}.*"),
        }
    }
}

/// Translates raw events into grouping signals.
#[derive(Debug, Clone, Default)]
pub struct ChangeDetector {
    toggles: GroupingToggles,
}

impl ChangeDetector {
    pub fn new(toggles: GroupingToggles) -> Self {
        Self { toggles }
    }

    /// Signals for `event`, dropping those of disabled grouping kinds.
    pub fn normalize(&self, event: &ChangeEvent) -> Vec<GroupingSignal> {
        let mut signals = Vec::new();
        match event {
            ChangeEvent::StateChanged {
                entity_id,
                old_members,
                new_members,
            } => {
                if let Some(id) = entity_grouping(entity_id) {
                    match (old_members, new_members) {
                        (_, None) => signals.push(GroupingSignal::Removed(id)),
                        (None, Some(_)) => signals.push(GroupingSignal::Changed(id)),
                        (Some(old), Some(new)) if old != new => signals.push(GroupingSignal::Changed(id)),
                        _ => {}
                    }
                }
            }
            ChangeEvent::MembershipChanged { entity_id } => {
                if let Some(id) = entity_grouping(entity_id) {
                    signals.push(GroupingSignal::Changed(id));
                }
            }
            ChangeEvent::SceneChanged { entity_id, action } => {
                if let Some(id) = entity_grouping(entity_id).filter(|id| id.kind() == GroupingKind::Scene) {
                    signals.push(lifecycle_signal(id, *action));
                }
            }
            ChangeEvent::GroupingRegistry { kind, id, action } => {
                if matches!(kind, GroupingKind::Area | GroupingKind::Floor | GroupingKind::Label) {
                    signals.push(lifecycle_signal(GroupingId::new(*kind, id.clone()), *action));
                    // Floors are made of areas.
                    if *kind == GroupingKind::Area {
                        signals.push(GroupingSignal::Kind(GroupingKind::Floor));
                    }
                }
            }
            ChangeEvent::EntityRegistry { changes, .. } | ChangeEvent::DeviceRegistry { changes, .. } => {
                if changes.contains("area_id") {
                    signals.push(GroupingSignal::Kind(GroupingKind::Area));
                    signals.push(GroupingSignal::Kind(GroupingKind::Floor));
                }
                if changes.contains("labels") {
                    signals.push(GroupingSignal::Kind(GroupingKind::Label));
                }
            }
        }
        signals.retain(|signal| self.toggles.enabled(signal.kind()));
        signals
    }
}

fn entity_grouping(entity_id: &str) -> Option<GroupingId> {
    GroupingId::parse(entity_id)
        .ok()
        .filter(|id| matches!(id.kind(), GroupingKind::Group | GroupingKind::Scene))
}

fn lifecycle_signal(id: GroupingId, action: RegistryAction) -> GroupingSignal {
    match action {
        RegistryAction::Remove => GroupingSignal::Removed(id),
        RegistryAction::Create | RegistryAction::Update => GroupingSignal::Changed(id),
    }
}

/// Producer side of the bounded change queue.
#[derive(Clone)]
pub struct ChangeIntake {
    detector: Arc<ChangeDetector>,
    tx: mpsc::Sender<GroupingSignal>,
}

/// Create an intake and the receiver the scheduler drains.
pub fn intake(detector: ChangeDetector, capacity: usize) -> (ChangeIntake, mpsc::Receiver<GroupingSignal>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        ChangeIntake {
            detector: Arc::new(detector),
            tx,
        },
        rx,
    )
}

impl ChangeIntake {
    /// Normalize and queue `event`, waiting for room. Returns the number of
    /// signals queued.
    pub async fn submit(&self, event: &ChangeEvent) -> Result<usize> {
        let signals = self.detector.normalize(event);
        let count = signals.len();
        for signal in signals {
            self.signal(signal).await?;
        }
        Ok(count)
    }

    /// Like [`submit`](Self::submit) but fails instead of waiting.
    pub fn try_submit(&self, event: &ChangeEvent) -> Result<usize> {
        let signals = self.detector.normalize(event);
        let count = signals.len();
        for signal in signals {
            self.tx.try_send(signal).map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => OrchestratorError::IntakeFull,
                mpsc::error::TrySendError::Closed(_) => OrchestratorError::IntakeClosed,
            })?;
        }
        Ok(count)
    }

    /// Queue an already normalized signal.
    pub async fn signal(&self, signal: GroupingSignal) -> Result<()> {
        tracing::trace!(%signal, "Queued change signal");
        self.tx
            .send(signal)
            .await
            .map_err(|_| OrchestratorError::IntakeClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
