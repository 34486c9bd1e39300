//! Mapping backend implementations.
//!
//! A backend is a flat key/value table of serialized mapping records. The
//! [`MappingStore`](crate::MappingStore) layers versioning, the read
//! snapshot and per-key write ordering on top.

use std::sync::Arc;

use serde_json::Value;

use crate::error::{Error, Result};

#[cfg(feature = "redb")]
pub mod redb;

#[cfg(feature = "memory")]
pub mod memory;

#[cfg(feature = "redb")]
pub use self::redb::{RedbBackend, RedbBackendConfig};

#[cfg(feature = "memory")]
pub use memory::MemoryBackend;

/// Synchronous key/value persistence for mapping records.
///
/// Calls may block; the store runs them on the blocking pool.
pub trait MappingBackend: Send + Sync {
    /// Insert or replace a record. Durable once this returns `Ok`.
    fn write(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Remove a record. Returns whether it existed.
    fn delete(&self, key: &str) -> Result<bool>;

    /// Every stored record.
    fn load_all(&self) -> Result<Vec<(String, Vec<u8>)>>;

    /// Whether records survive a restart.
    fn is_persistent(&self) -> bool;
}

/// Create a mapping backend by type identifier.
///
/// ```no_run
/// use groupcast_storage::backends::create_backend;
/// use serde_json::json;
///
/// let backend = create_backend("redb", &json!({ "path": "./data/groupcast.redb" })).unwrap();
/// assert!(backend.is_persistent());
/// ```
pub fn create_backend(backend_type: &str, config: &Value) -> Result<Arc<dyn MappingBackend>> {
    match backend_type {
        #[cfg(feature = "redb")]
        "redb" => {
            let cfg: RedbBackendConfig = serde_json::from_value(config.clone())
                .map_err(|e| Error::Configuration(format!("Invalid redb config: {}", e)))?;
            Ok(Arc::new(RedbBackend::new(cfg)?))
        }

        #[cfg(feature = "memory")]
        "memory" => Ok(Arc::new(MemoryBackend::new())),

        _ => Err(Error::Configuration(format!(
            "Unknown backend type: {}. Available backends: {}",
            backend_type,
            available_backends().join(", ")
        ))),
    }
}

/// Backend types compiled into this build.
pub fn available_backends() -> Vec<&'static str> {
    let mut backends = Vec::new();
    #[cfg(feature = "redb")]
    backends.push("redb");
    #[cfg(feature = "memory")]
    backends.push("memory");
    backends
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_available_backends() {
        let backends = available_backends();
        assert!(!backends.is_empty());
    }

    #[test]
    fn test_create_backend_unknown() {
        let result = create_backend("sqlite", &serde_json::json!({}));
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[cfg(feature = "memory")]
    #[test]
    fn test_create_memory_backend() {
        let backend = create_backend("memory", &serde_json::json!({})).unwrap();
        assert!(!backend.is_persistent());
    }

    #[cfg(feature = "redb")]
    #[test]
    fn test_create_redb_backend_requires_path() {
        let result = create_backend("redb", &serde_json::json!({}));
        assert!(matches!(result, Err(Error::Configuration(_))));
    }
}
