//! Opaque references to native groups.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::backend::Capability;

/// Backend-specific reference to a native group.
///
/// Handles are produced by protocol handlers and persisted verbatim in the
/// mapping store; the orchestrator only compares and forwards them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NativeHandle {
    /// Z-Wave multicast: a node list addressed in one frame. Nothing is
    /// stored on the network.
    Multicast {
        name: String,
        capability: Capability,
        nodes: Vec<u16>,
    },
    /// Group held by a pub/sub bridge, addressed by friendly name.
    BrokerGroup { friendly_name: String },
    /// Group created through a coordinator gateway, addressed by numeric id.
    ManagedGroup { group_id: u16, name: String },
}

impl NativeHandle {
    pub fn name(&self) -> &str {
        match self {
            NativeHandle::Multicast { name, .. } => name,
            NativeHandle::BrokerGroup { friendly_name } => friendly_name,
            NativeHandle::ManagedGroup { name, .. } => name,
        }
    }

    /// Whether two handles point at the same native group, ignoring
    /// membership details that change over time.
    pub fn same_native_group(&self, other: &NativeHandle) -> bool {
        match (self, other) {
            (NativeHandle::Multicast { name: a, .. }, NativeHandle::Multicast { name: b, .. }) => {
                a == b
            }
            (
                NativeHandle::BrokerGroup { friendly_name: a },
                NativeHandle::BrokerGroup { friendly_name: b },
            ) => a == b,
            (
                NativeHandle::ManagedGroup { group_id: a, .. },
                NativeHandle::ManagedGroup { group_id: b, .. },
            ) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for NativeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NativeHandle::Multicast { name, nodes, .. } => {
                write!(f, "multicast:{name} ({} nodes)", nodes.len())
            }
            NativeHandle::BrokerGroup { friendly_name } => write!(f, "broker:{friendly_name}"),
            NativeHandle::ManagedGroup { group_id, name } => {
                write!(f, "managed:0x{group_id:04x} ({name})")
            }
        }
    }
}
