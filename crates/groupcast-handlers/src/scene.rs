//! Scene slot bookkeeping.
//!
//! Devices that store scenes locally expose a finite slot range. The table
//! tracks which slots are in use per `(backend, device)` and always hands out
//! the smallest free one. It is rebuilt from the mapping store at startup.

use std::collections::BTreeSet;
use std::ops::Range;

use dashmap::DashMap;
use groupcast_core::{Backend, SlotId};

use crate::error::{HandlerError, HandlerResult};

/// Usable scene slots. Lower ids are left to the user.
pub const SCENE_SLOTS: Range<SlotId> = 100..255;

#[derive(Debug)]
pub struct SceneSlotTable {
    range: Range<SlotId>,
    used: DashMap<(Backend, String), BTreeSet<SlotId>>,
}

impl Default for SceneSlotTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SceneSlotTable {
    pub fn new() -> Self {
        Self::with_range(SCENE_SLOTS)
    }

    pub fn with_range(range: Range<SlotId>) -> Self {
        Self {
            range,
            used: DashMap::new(),
        }
    }

    /// Take the smallest free slot on `device`.
    pub fn reserve(&self, backend: Backend, device: &str) -> HandlerResult<SlotId> {
        let mut used = self.used.entry((backend, device.to_string())).or_default();
        let slot = self
            .range
            .clone()
            .find(|slot| !used.contains(slot))
            .ok_or_else(|| HandlerError::SlotExhausted {
                device: device.to_string(),
            })?;
        used.insert(slot);
        Ok(slot)
    }

    /// Mark a slot as used, e.g. when replaying stored mappings.
    pub fn seed(&self, backend: Backend, device: &str, slot: SlotId) {
        if !self.range.contains(&slot) {
            tracing::warn!(%backend, device, slot, "Ignoring stored scene slot outside range");
            return;
        }
        self.used
            .entry((backend, device.to_string()))
            .or_default()
            .insert(slot);
    }

    pub fn release(&self, backend: Backend, device: &str, slot: SlotId) {
        let key = (backend, device.to_string());
        if let Some(mut used) = self.used.get_mut(&key) {
            used.remove(&slot);
        }
        self.used.remove_if(&key, |_, used| used.is_empty());
    }

    pub fn in_use(&self, backend: Backend, device: &str) -> usize {
        self.used
            .get(&(backend, device.to_string()))
            .map(|used| used.len())
            .unwrap_or(0)
    }

    pub fn capacity(&self) -> usize {
        self.range.len()
    }
}
