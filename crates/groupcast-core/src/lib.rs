//! Core types and pure logic for groupcast.
//!
//! This crate defines the domain model shared by every other crate in the
//! workspace: grouping identifiers, entity descriptors, backends and
//! capabilities, commands, native handles and the persisted mapping. It also
//! hosts the two pure stages of the pipeline, the [`EntityClassifier`] and the
//! [`CapabilityPartitioner`], and the collaborator traits the host implements.

pub mod backend;
pub mod classifier;
pub mod command;
pub mod config;
pub mod entity;
pub mod error;
pub mod grouping;
pub mod handle;
pub mod mapping;
pub mod partition;
pub mod registry;

pub use backend::{Backend, Capability, PartitionKey, PartitionRule};
pub use classifier::{Classification, ClassifiedEntity, EntityClassifier, UnknownReason};
pub use command::{Command, DispatchTarget};
pub use config::GroupcastConfig;
pub use entity::{entity_domain, DeviceDescriptor, EntityDescriptor};
pub use error::{Error, Result, TransportError, TransportResult};
pub use grouping::{GroupingId, GroupingKind};
pub use handle::NativeHandle;
pub use mapping::{GroupMapping, GroupMember, NativeGroup, RejectedGroup, SceneEntry, SlotId};
pub use partition::{CapabilityPartitioner, Partition};
pub use registry::{GroupingRegistry, ResolvedTarget, UnicastService};

/// Re-exports commonly used types.
pub mod prelude {
    pub use crate::backend::{Backend, Capability, PartitionKey};
    pub use crate::classifier::{Classification, EntityClassifier};
    pub use crate::command::{Command, DispatchTarget};
    pub use crate::config::GroupcastConfig;
    pub use crate::error::{Error, Result, TransportError};
    pub use crate::grouping::{GroupingId, GroupingKind};
    pub use crate::handle::NativeHandle;
    pub use crate::mapping::{GroupMapping, GroupMember, NativeGroup};
    pub use crate::registry::{GroupingRegistry, UnicastService};
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
