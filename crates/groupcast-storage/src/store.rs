//! The mapping store.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use dashmap::DashMap;
use groupcast_core::{GroupMapping, GroupingId, NativeHandle};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::backends::MappingBackend;
use crate::error::{Error, Result};

/// Current on-disk record version.
pub const STORAGE_VERSION: u32 = 1;

/// On-disk envelope around a mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMapping {
    pub version: u32,
    pub mapping: GroupMapping,
}

impl StoredMapping {
    fn encode(mapping: &GroupMapping) -> Result<Vec<u8>> {
        let record = StoredMapping {
            version: STORAGE_VERSION,
            mapping: mapping.clone(),
        };
        Ok(serde_json::to_vec(&record)?)
    }

    fn decode(key: &str, bytes: &[u8]) -> Result<GroupMapping> {
        let record: StoredMapping = serde_json::from_slice(bytes)?;
        if record.version != STORAGE_VERSION {
            return Err(Error::UnsupportedVersion {
                key: key.to_string(),
                found: record.version,
                supported: STORAGE_VERSION,
            });
        }
        Ok(record.mapping)
    }
}

/// Durable grouping -> mapping table with a lock-free read snapshot.
///
/// Writes for the same grouping are applied in call order; writes for
/// different groupings do not wait on each other beyond the backend's own
/// commit serialization. The snapshot only ever shows committed records.
pub struct MappingStore {
    backend: Arc<dyn MappingBackend>,
    snapshot: DashMap<GroupingId, Arc<GroupMapping>>,
    write_locks: DashMap<GroupingId, Arc<Mutex<()>>>,
}

impl MappingStore {
    /// Load every record from `backend`.
    ///
    /// Unreadable records are skipped with a warning so one bad entry does
    /// not block startup; the grouping is rebuilt on its next reconcile.
    pub fn open(backend: Arc<dyn MappingBackend>) -> Result<Self> {
        let snapshot = DashMap::new();
        let mut skipped = 0usize;
        for (key, bytes) in backend.load_all()? {
            let grouping = match GroupingId::parse(&key) {
                Ok(id) => id,
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Skipping record with invalid key");
                    skipped += 1;
                    continue;
                }
            };
            match StoredMapping::decode(&key, &bytes) {
                Ok(mapping) => {
                    snapshot.insert(grouping, Arc::new(mapping));
                }
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Skipping unreadable mapping record");
                    skipped += 1;
                }
            }
        }
        tracing::info!(
            loaded = snapshot.len(),
            skipped,
            persistent = backend.is_persistent(),
            "Mapping store loaded"
        );
        Ok(Self {
            backend,
            snapshot,
            write_locks: DashMap::new(),
        })
    }

    /// Open a redb-backed store at `path`.
    #[cfg(feature = "redb")]
    pub fn open_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::open(Arc::new(crate::backends::RedbBackend::open(path)?))
    }

    /// Committed mapping for `grouping`.
    pub fn get(&self, grouping: &GroupingId) -> Option<Arc<GroupMapping>> {
        self.snapshot.get(grouping).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, grouping: &GroupingId) -> bool {
        self.snapshot.contains_key(grouping)
    }

    /// Every committed mapping, ordered by grouping id.
    pub fn list_all(&self) -> Vec<Arc<GroupMapping>> {
        let mut all: Vec<_> = self.snapshot.iter().map(|e| Arc::clone(e.value())).collect();
        all.sort_by(|a, b| a.grouping.cmp(&b.grouping));
        all
    }

    pub fn grouping_ids(&self) -> Vec<GroupingId> {
        let mut ids: Vec<_> = self.snapshot.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.snapshot.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot.is_empty()
    }

    /// Grouping whose committed mapping references `handle`.
    pub fn handle_owner(&self, handle: &NativeHandle) -> Option<GroupingId> {
        self.snapshot
            .iter()
            .find(|entry| entry.value().key_for_handle(handle).is_some())
            .map(|entry| entry.key().clone())
    }

    /// Durably write `mapping`, then publish it to readers.
    pub async fn put(&self, mapping: GroupMapping) -> Result<()> {
        let grouping = mapping.grouping.clone();
        let _guard = self.lock_key(&grouping).await;

        let bytes = StoredMapping::encode(&mapping)?;
        let backend = Arc::clone(&self.backend);
        let key = grouping.to_string();
        tokio::task::spawn_blocking(move || backend.write(&key, &bytes)).await??;

        self.snapshot.insert(grouping, Arc::new(mapping));
        Ok(())
    }

    /// Durably remove the mapping for `grouping`. Returns whether it existed.
    pub async fn delete(&self, grouping: &GroupingId) -> Result<bool> {
        let guard = self.lock_key(grouping).await;

        let backend = Arc::clone(&self.backend);
        let key = grouping.to_string();
        let existed = tokio::task::spawn_blocking(move || backend.delete(&key)).await??;
        self.snapshot.remove(grouping);

        drop(guard);
        // A count of one means only the table holds the lock and nobody is queued.
        self.write_locks
            .remove_if(grouping, |_, lock| Arc::strong_count(lock) == 1);
        Ok(existed)
    }

    /// Groupings with a live write lock entry.
    pub fn write_lock_count(&self) -> usize {
        self.write_locks.len()
    }

    pub fn is_persistent(&self) -> bool {
        self.backend.is_persistent()
    }

    /// Native groups per backend, for diagnostics.
    pub fn backend_counts(&self) -> HashMap<String, usize> {
        let mut counts = HashMap::new();
        for entry in self.snapshot.iter() {
            for key in entry.value().groups.keys() {
                *counts.entry(key.backend.to_string()).or_insert(0) += 1;
            }
        }
        counts
    }

    async fn lock_key(&self, grouping: &GroupingId) -> tokio::sync::OwnedMutexGuard<()> {
        let lock = self
            .write_locks
            .entry(grouping.clone())
            .or_default()
            .clone();
        lock.lock_owned().await
    }
}
