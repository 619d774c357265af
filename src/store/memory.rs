use std::collections::BTreeMap;

use crate::core::Result;
use super::{UnitId, UnitStore};

/// In-memory unit store
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    units: BTreeMap<UnitId, Vec<u8>>,
}

impl MemoryStore {
    /// Creates an empty store
    pub fn new() -> Self {
        MemoryStore::default()
    }

    /// Number of stored units
    pub fn len(&self) -> usize {
        self.units.len()
    }

    /// Whether the store holds no units
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

impl UnitStore for MemoryStore {
    fn put(&mut self, unit: UnitId, frame: &[u8]) -> Result<()> {
        self.units.insert(unit, frame.to_vec());
        Ok(())
    }

    fn get(&self, unit: UnitId) -> Result<Option<Vec<u8>>> {
        Ok(self.units.get(&unit).cloned())
    }

    fn contains(&self, unit: UnitId) -> Result<bool> {
        Ok(self.units.contains_key(&unit))
    }

    fn remove(&mut self, unit: UnitId) -> Result<bool> {
        Ok(self.units.remove(&unit).is_some())
    }

    fn units(&self) -> Result<Vec<UnitId>> {
        Ok(self.units.keys().copied().collect())
    }
}
