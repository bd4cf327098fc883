//! Backing store capability and its local filesystem implementation.

use scopestore_core::error::{Result, StoreError};
use scopestore_core::types::StorageUnit;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Raw read/write access to storage units.
///
/// Implementations must make a single `write` atomic with respect to readers:
/// a unit either has its previous bytes or the new ones, never a mix.
pub trait BackingStore: Send + Sync {
    /// Read the unit's bytes; `None` if the unit does not exist
    fn read(&self, unit: &StorageUnit) -> Result<Option<Vec<u8>>>;

    /// Replace the unit's bytes, creating it if needed
    fn write(&self, unit: &StorageUnit, bytes: &[u8]) -> Result<()>;

    /// Remove the unit; removing a missing unit is not an error
    fn delete(&self, unit: &StorageUnit) -> Result<()>;

    /// Whether a write to the unit is expected to succeed
    fn is_writable(&self, unit: &StorageUnit) -> bool;
}

/// Backing store on the local filesystem.
///
/// Writes go to a sibling temp file that is renamed over the target, so a
/// crash mid-write leaves the previous contents in place.
#[derive(Debug, Clone)]
pub struct LocalFileStore {
    durable: bool,
}

impl LocalFileStore {
    /// Create a store; `durable` flushes file contents to the device before
    /// the rename.
    pub fn new(durable: bool) -> Self {
        Self { durable }
    }

    fn temp_path(path: &Path) -> PathBuf {
        let mut name = path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        path.with_file_name(name)
    }

    fn write_atomic(&self, path: &Path, bytes: &[u8]) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let temp_path = Self::temp_path(path);
        let result = (|| {
            let mut file = fs::File::create(&temp_path)?;
            file.write_all(bytes)?;
            if self.durable {
                file.sync_all()?;
            }
            fs::rename(&temp_path, path)
        })();

        if result.is_err() {
            if let Err(e) = fs::remove_file(&temp_path) {
                if e.kind() != ErrorKind::NotFound {
                    warn!("Failed to remove temp file {}: {}", temp_path.display(), e);
                }
            }
        }

        result
    }
}

impl Default for LocalFileStore {
    fn default() -> Self {
        Self::new(true)
    }
}

impl BackingStore for LocalFileStore {
    fn read(&self, unit: &StorageUnit) -> Result<Option<Vec<u8>>> {
        match fs::read(unit.path()) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::backing(unit, format!("read failed: {}", e))),
        }
    }

    fn write(&self, unit: &StorageUnit, bytes: &[u8]) -> Result<()> {
        self.write_atomic(unit.path(), bytes)
            .map_err(|e| StoreError::backing(unit, format!("write failed: {}", e)))?;
        debug!("Wrote {} bytes to {}", bytes.len(), unit);
        Ok(())
    }

    fn delete(&self, unit: &StorageUnit) -> Result<()> {
        match fs::remove_file(unit.path()) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::backing(unit, format!("delete failed: {}", e))),
        }
    }

    fn is_writable(&self, unit: &StorageUnit) -> bool {
        match fs::metadata(unit.path()) {
            Ok(meta) => !meta.permissions().readonly(),
            // A missing file is created on write
            Err(_) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_read_missing_is_none() {
        let dir = TempDir::new().unwrap();
        let store = LocalFileStore::default();
        let unit = StorageUnit::new(dir.path().join("absent.json"));

        assert!(store.read(&unit).unwrap().is_none());
        assert!(store.is_writable(&unit));
    }

    #[test]
    fn test_write_creates_parents_and_leaves_no_temp() {
        let dir = TempDir::new().unwrap();
        let store = LocalFileStore::new(false);
        let unit = StorageUnit::new(dir.path().join(".scopestore").join("misc.json"));

        store.write(&unit, b"{\"a\":1}").unwrap();

        assert_eq!(store.read(&unit).unwrap().unwrap(), b"{\"a\":1}");
        assert!(!LocalFileStore::temp_path(unit.path()).exists());
    }

    #[test]
    fn test_overwrite_replaces_content() {
        let dir = TempDir::new().unwrap();
        let store = LocalFileStore::default();
        let unit = StorageUnit::new(dir.path().join("misc.json"));

        store.write(&unit, b"first").unwrap();
        store.write(&unit, b"second").unwrap();

        assert_eq!(store.read(&unit).unwrap().unwrap(), b"second");
    }

    #[test]
    fn test_delete_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = LocalFileStore::default();
        let unit = StorageUnit::new(dir.path().join("misc.json"));

        store.write(&unit, b"x").unwrap();
        store.delete(&unit).unwrap();
        store.delete(&unit).unwrap();
        assert!(store.read(&unit).unwrap().is_none());
    }

    #[test]
    fn test_readonly_file_not_writable() {
        let dir = TempDir::new().unwrap();
        let store = LocalFileStore::default();
        let unit = StorageUnit::new(dir.path().join("locked.json"));
        store.write(&unit, b"{}").unwrap();

        let mut perms = fs::metadata(unit.path()).unwrap().permissions();
        perms.set_readonly(true);
        fs::set_permissions(unit.path(), perms).unwrap();

        assert!(!store.is_writable(&unit));
    }

    #[test]
    fn test_temp_path_is_sibling() {
        let temp = LocalFileStore::temp_path(Path::new("/p/.scopestore/misc.json"));
        assert_eq!(temp, PathBuf::from("/p/.scopestore/misc.json.tmp"));
    }
}
