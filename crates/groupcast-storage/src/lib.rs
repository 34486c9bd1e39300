//! Persistent mapping store for groupcast.
//!
//! Every grouping's [`GroupMapping`](groupcast_core::GroupMapping) is kept
//! as one versioned JSON record keyed by grouping id. Reads are served from
//! an in-memory snapshot; writes go to the backend first and only reach the
//! snapshot once committed.

pub mod backends;
pub mod error;
pub mod store;

pub use backends::{available_backends, create_backend, MappingBackend};
pub use error::{Error, Result};
pub use store::{MappingStore, StoredMapping, STORAGE_VERSION};
