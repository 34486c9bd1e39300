//! In-memory mapping backend, for tests and dry runs.

use dashmap::DashMap;

use super::MappingBackend;
use crate::error::Result;

#[derive(Debug, Default)]
pub struct MemoryBackend {
    records: DashMap<String, Vec<u8>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MappingBackend for MemoryBackend {
    fn write(&self, key: &str, value: &[u8]) -> Result<()> {
        self.records.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.records.remove(key).is_some())
    }

    fn load_all(&self) -> Result<Vec<(String, Vec<u8>)>> {
        Ok(self
            .records
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect())
    }

    fn is_persistent(&self) -> bool {
        false
    }
}
