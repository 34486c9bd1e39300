//! Redb mapping backend.
//!
//! Provides persistent storage using the redb embedded database.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use redb::{Database, ReadableTable, TableDefinition};

use super::MappingBackend;
use crate::error::Result;

// grouping id -> versioned JSON record
const MAPPINGS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("groupcast_mappings");

/// Configuration for RedbBackend.
#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct RedbBackendConfig {
    /// Path to the database file.
    pub path: String,

    /// Create parent directories if they don't exist.
    #[serde(default = "default_create_dirs")]
    pub create_dirs: bool,
}

fn default_create_dirs() -> bool {
    true
}

impl RedbBackendConfig {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            create_dirs: true,
        }
    }

    pub fn with_create_dirs(mut self, create_dirs: bool) -> Self {
        self.create_dirs = create_dirs;
        self
    }

    /// Throwaway database in the temp dir, removed on drop.
    pub fn temporary() -> Self {
        Self {
            path: ":memory:".to_string(),
            create_dirs: false,
        }
    }
}

/// redb-based persistent mapping backend.
pub struct RedbBackend {
    db: Arc<Database>,
    path: String,
    /// Backing file of a temporary database, for cleanup.
    temp_path: Option<PathBuf>,
}

impl RedbBackend {
    pub fn new(config: RedbBackendConfig) -> Result<Self> {
        let (db, temp_path) = if config.path == ":memory:" {
            // redb has no in-memory mode; use a temp file.
            let temp_path = std::env::temp_dir().join(format!("groupcast_{}.redb", uuid::Uuid::new_v4()));
            (Database::create(&temp_path)?, Some(temp_path))
        } else {
            let path_ref = Path::new(&config.path);
            if config.create_dirs {
                if let Some(parent) = path_ref.parent() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            (Database::create(path_ref)?, None)
        };

        // Create the table up front so first reads see an empty table.
        let txn = db.begin_write()?;
        txn.open_table(MAPPINGS_TABLE)?;
        txn.commit()?;

        tracing::debug!(path = %config.path, "Opened redb mapping backend");
        Ok(Self {
            db: Arc::new(db),
            path: config.path,
            temp_path,
        })
    }

    /// Open or create a redb backend at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::new(RedbBackendConfig::new(
            path.as_ref().to_string_lossy().to_string(),
        ))
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl MappingBackend for RedbBackend {
    fn write(&self, key: &str, value: &[u8]) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut t = txn.open_table(MAPPINGS_TABLE)?;
            t.insert(key, value)?;
        }
        txn.commit()?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool> {
        let txn = self.db.begin_write()?;
        let removed = {
            let mut t = txn.open_table(MAPPINGS_TABLE)?;
            let removed = t.remove(key)?.is_some();
            removed
        };
        txn.commit()?;
        Ok(removed)
    }

    fn load_all(&self) -> Result<Vec<(String, Vec<u8>)>> {
        let txn = self.db.begin_read()?;
        let t = txn.open_table(MAPPINGS_TABLE)?;

        let mut results = Vec::new();
        for item in t.iter()? {
            let (key, value) = item?;
            results.push((key.value().to_string(), value.value().to_vec()));
        }
        Ok(results)
    }

    fn is_persistent(&self) -> bool {
        self.temp_path.is_none()
    }
}

impl Drop for RedbBackend {
    fn drop(&mut self) {
        if let Some(temp_path) = &self.temp_path {
            if let Err(e) = std::fs::remove_file(temp_path) {
                tracing::debug!("Failed to remove temporary database file {}: {}", temp_path.display(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = RedbBackendConfig::new("./data/test.redb").with_create_dirs(false);
        assert_eq!(config.path, "./data/test.redb");
        assert!(!config.create_dirs);
    }

    #[test]
    fn test_write_delete_load() {
        let backend = RedbBackend::new(RedbBackendConfig::temporary()).unwrap();
        assert!(!backend.is_persistent());
        assert!(backend.load_all().unwrap().is_empty());

        backend.write("area.a", b"one").unwrap();
        backend.write("area.b", b"two").unwrap();
        backend.write("area.a", b"three").unwrap();

        let mut all = backend.load_all().unwrap();
        all.sort();
        assert_eq!(all, vec![("area.a".to_string(), b"three".to_vec()), ("area.b".to_string(), b"two".to_vec())]);

        assert!(backend.delete("area.a").unwrap());
        assert!(!backend.delete("area.a").unwrap());
        assert_eq!(backend.load_all().unwrap().len(), 1);
    }

    #[test]
    fn test_reopen_keeps_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("mappings.redb");
        {
            let backend = RedbBackend::open(&path).unwrap();
            assert!(backend.is_persistent());
            backend.write("label.night", b"{}").unwrap();
        }
        let backend = RedbBackend::open(&path).unwrap();
        assert_eq!(backend.load_all().unwrap().len(), 1);
    }
}
