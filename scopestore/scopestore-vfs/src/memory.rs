//! In-memory backing store.

use crate::backing::BackingStore;
use dashmap::{DashMap, DashSet};
use scopestore_core::error::{Result, StoreError};
use scopestore_core::types::StorageUnit;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Backing store keeping unit contents in memory.
///
/// Units can be flagged read-only; writes to them fail the way a write to a
/// locked file would.
#[derive(Debug, Default)]
pub struct MemoryStore {
    files: DashMap<StorageUnit, Vec<u8>>,
    read_only: DashSet<StorageUnit>,
    writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark or unmark a unit as read-only
    pub fn set_read_only(&self, unit: &StorageUnit, read_only: bool) {
        if read_only {
            self.read_only.insert(unit.clone());
        } else {
            self.read_only.remove(unit);
        }
    }

    /// Replace a unit's bytes without counting it as a store write, as an
    /// edit made by another process would.
    pub fn put_external(&self, unit: &StorageUnit, bytes: impl Into<Vec<u8>>) {
        self.files.insert(unit.clone(), bytes.into());
    }

    /// Remove a unit behind the store's back
    pub fn remove_external(&self, unit: &StorageUnit) {
        self.files.remove(unit);
    }

    /// Current bytes of a unit
    pub fn contents(&self, unit: &StorageUnit) -> Option<Vec<u8>> {
        self.files.get(unit).map(|entry| entry.value().clone())
    }

    /// Number of successful writes through [`BackingStore::write`]
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Number of units present
    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl BackingStore for MemoryStore {
    fn read(&self, unit: &StorageUnit) -> Result<Option<Vec<u8>>> {
        Ok(self.contents(unit))
    }

    fn write(&self, unit: &StorageUnit, bytes: &[u8]) -> Result<()> {
        if self.read_only.contains(unit) {
            return Err(StoreError::backing(unit, "unit is read-only"));
        }
        self.files.insert(unit.clone(), bytes.to_vec());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn delete(&self, unit: &StorageUnit) -> Result<()> {
        if self.read_only.contains(unit) {
            return Err(StoreError::backing(unit, "unit is read-only"));
        }
        self.files.remove(unit);
        Ok(())
    }

    fn is_writable(&self, unit: &StorageUnit) -> bool {
        !self.read_only.contains(unit)
    }
}
