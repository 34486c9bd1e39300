//! Per-key async mutual exclusion.

use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// One lazily created mutex per key. Holders of different keys never
/// contend.
pub struct KeyedLocks<K> {
    locks: DashMap<K, Arc<Mutex<()>>>,
}

impl<K: Eq + Hash + Clone> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`.
    pub async fn lock(&self, key: &K) -> OwnedMutexGuard<()> {
        // Clone the Arc out so the shard lock is not held across the await.
        let mutex = Arc::clone(self.locks.entry(key.clone()).or_default().value());
        mutex.lock_owned().await
    }

    /// Whether someone currently holds `key`.
    pub fn is_locked(&self, key: &K) -> bool {
        self.locks
            .get(key)
            .map(|mutex| mutex.try_lock().is_err())
            .unwrap_or(false)
    }

    /// Drop mutexes nobody holds or waits on.
    pub fn prune(&self) {
        self.locks.retain(|_, mutex| Arc::strong_count(mutex) > 1);
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
