//! One storage file shared by the components mapped to it.
//!
//! On disk a storage is a JSON object keyed by component name. Values are
//! kept in their collapsed form (path macros unexpanded); expansion happens
//! when a value is handed to a component.
//!
//! Scopes of one tree that map the same unit share a single [`FileStorage`]
//! through a [`StoragePool`], so each of them merges into what the others
//! last wrote.

use parking_lot::RwLock;
use scopestore_core::error::{Result, StoreError};
use scopestore_core::types::{ComponentName, StorageUnit};
use scopestore_vfs::{BackingStore, ContentHash};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Weak};
use tracing::debug;

/// Parsed contents of a storage file
pub type Document = BTreeMap<ComponentName, Value>;

#[derive(Debug, Default)]
struct Snapshot {
    document: Document,
    /// Hash of the bytes last loaded or written; `None` if the file did not
    /// exist
    hash: Option<ContentHash>,
}

/// A pending write for one storage, produced while collecting a save.
#[derive(Debug)]
pub struct StagedWrite {
    pub storage: Arc<FileStorage>,
    pub bytes: Vec<u8>,
    pub hash: ContentHash,
    document: Document,
    /// States of the staging scope's components, merged into `document`
    states: BTreeMap<ComponentName, Option<Value>>,
    /// Cached hash `document` was computed from
    base: Option<ContentHash>,
}

impl StagedWrite {
    pub fn unit(&self) -> &StorageUnit {
        self.storage.unit()
    }

    /// Recompute the write if the storage was committed to since staging.
    ///
    /// Only the staging scope's own entries are merged again, on top of the
    /// current cache. Returns `None` when nothing is left to write.
    pub fn rebase(self) -> Result<Option<StagedWrite>> {
        if self.storage.cached_hash() == self.base {
            return Ok(Some(self));
        }
        debug!("{} changed since staging, merging again", self.storage.unit());
        let storage = Arc::clone(&self.storage);
        storage.stage(self.states)
    }
}

/// Cached view of one storage unit.
#[derive(Debug)]
pub struct FileStorage {
    unit: StorageUnit,
    template: String,
    snapshot: RwLock<Snapshot>,
}

impl FileStorage {
    pub fn new(unit: StorageUnit, template: impl Into<String>) -> Self {
        Self {
            unit,
            template: template.into(),
            snapshot: RwLock::new(Snapshot::default()),
        }
    }

    pub fn unit(&self) -> &StorageUnit {
        &self.unit
    }

    /// Template the unit was expanded from
    pub fn template(&self) -> &str {
        &self.template
    }

    /// Hash of what is currently cached
    pub fn cached_hash(&self) -> Option<ContentHash> {
        self.snapshot.read().hash
    }

    /// Re-read the unit from the backing store into the cache
    pub fn load(&self, backing: &dyn BackingStore) -> Result<()> {
        let (document, hash) = match backing.read(&self.unit)? {
            Some(bytes) => (self.parse(&bytes)?, Some(ContentHash::of(&bytes))),
            None => (Document::new(), None),
        };

        debug!(
            "Loaded {} ({} component(s), hash {})",
            self.unit,
            document.len(),
            hash.map(|h| h.short()).unwrap_or_else(|| "-".to_string())
        );

        *self.snapshot.write() = Snapshot { document, hash };
        Ok(())
    }

    /// Cached (collapsed) state of one component
    pub fn component_state(&self, name: &ComponentName) -> Option<Value> {
        self.snapshot.read().document.get(name).cloned()
    }

    /// Component names present in the cached document
    pub fn cached_components(&self) -> BTreeSet<ComponentName> {
        self.snapshot.read().document.keys().cloned().collect()
    }

    /// Parse storage bytes; blank content is an empty document
    pub fn parse(&self, bytes: &[u8]) -> Result<Document> {
        if bytes.iter().all(|b| b.is_ascii_whitespace()) {
            return Ok(Document::new());
        }
        serde_json::from_slice(bytes).map_err(|e| {
            StoreError::backing(&self.unit, format!("malformed storage content: {}", e))
        })
    }

    fn serialize(document: &Document) -> Result<Vec<u8>> {
        let mut bytes = serde_json::to_vec_pretty(document)?;
        bytes.push(b'\n');
        Ok(bytes)
    }

    /// Compute the write needed to persist `states`.
    ///
    /// `states` holds every component of the scope mapped to this storage,
    /// `None` meaning the component has nothing to persist. Entries for
    /// components the scope does not know are preserved. Returns `None`
    /// when the result equals what is cached.
    pub fn stage(
        self: &Arc<Self>,
        states: BTreeMap<ComponentName, Option<Value>>,
    ) -> Result<Option<StagedWrite>> {
        let snapshot = self.snapshot.read();

        let mut document = snapshot.document.clone();
        for (name, state) in &states {
            match state {
                Some(value) => {
                    document.insert(name.clone(), value.clone());
                }
                None => {
                    document.remove(name);
                }
            }
        }

        if document == snapshot.document && (snapshot.hash.is_some() || document.is_empty()) {
            return Ok(None);
        }

        let bytes = Self::serialize(&document)?;
        let hash = ContentHash::of(&bytes);
        if snapshot.hash == Some(hash) {
            return Ok(None);
        }

        Ok(Some(StagedWrite {
            storage: Arc::clone(self),
            bytes,
            hash,
            document,
            states,
            base: snapshot.hash,
        }))
    }

    /// Record a staged write as durable
    pub fn commit(&self, staged: StagedWrite) {
        *self.snapshot.write() = Snapshot {
            document: staged.document,
            hash: Some(staged.hash),
        };
    }

    /// Compare current on-disk bytes (`None` = deleted) with the cache.
    ///
    /// Returns the names whose stored value differs, restricted to `known`.
    pub fn changed_components(
        &self,
        current: Option<&[u8]>,
        known: &BTreeSet<ComponentName>,
    ) -> Result<BTreeSet<ComponentName>> {
        let snapshot = self.snapshot.read();

        let new_document = match current {
            Some(bytes) => {
                if snapshot.hash == Some(ContentHash::of(bytes)) {
                    return Ok(BTreeSet::new());
                }
                self.parse(bytes)?
            }
            None if snapshot.hash.is_none() => return Ok(BTreeSet::new()),
            None => Document::new(),
        };

        Ok(known
            .iter()
            .filter(|name| snapshot.document.get(*name) != new_document.get(*name))
            .cloned()
            .collect())
    }
}

/// Storages of one scope tree, keyed by unit.
///
/// Entries are held weakly; a storage lives as long as some scope maps it.
#[derive(Debug, Default)]
pub struct StoragePool {
    storages: RwLock<BTreeMap<StorageUnit, Weak<FileStorage>>>,
}

impl StoragePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// The pooled storage of `unit`, loading it on first use
    pub fn get_or_load(
        &self,
        unit: &StorageUnit,
        template: &str,
        backing: &dyn BackingStore,
    ) -> Result<Arc<FileStorage>> {
        if let Some(existing) = self.storages.read().get(unit).and_then(Weak::upgrade) {
            return Ok(existing);
        }

        let mut storages = self.storages.write();
        if let Some(existing) = storages.get(unit).and_then(Weak::upgrade) {
            return Ok(existing);
        }
        let storage = Arc::new(FileStorage::new(unit.clone(), template));
        storage.load(backing)?;
        storages.insert(unit.clone(), Arc::downgrade(&storage));
        Ok(storage)
    }

    /// Number of storages still mapped by some scope
    pub fn len(&self) -> usize {
        self.storages
            .read()
            .values()
            .filter(|storage| storage.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scopestore_vfs::MemoryStore;
    use serde_json::json;

    fn names(items: &[&str]) -> BTreeSet<ComponentName> {
        items.iter().map(|s| ComponentName::from(*s)).collect()
    }

    fn storage() -> Arc<FileStorage> {
        Arc::new(FileStorage::new(
            StorageUnit::new("/p/.scopestore/misc.json"),
            "$SCOPE_DIR$/.scopestore/misc.json",
        ))
    }

    #[test]
    fn test_stage_nothing_for_empty_missing_file() {
        let storage = storage();
        let staged = storage
            .stage(BTreeMap::from([(ComponentName::from("a"), None)]))
            .unwrap();
        assert!(staged.is_none());
    }

    #[test]
    fn test_stage_commit_then_unchanged() {
        let storage = storage();
        let states = BTreeMap::from([(ComponentName::from("a"), Some(json!({"x": 1})))]);

        let staged = storage.stage(states.clone()).unwrap().unwrap();
        assert_eq!(staged.unit(), storage.unit());
        storage.commit(staged);

        assert!(storage.cached_hash().is_some());
        assert!(storage.stage(states).unwrap().is_none());
    }

    #[test]
    fn test_stage_preserves_unknown_entries() {
        let backing = MemoryStore::new();
        let storage = storage();
        backing.put_external(storage.unit(), r#"{"a": 1, "legacy": {"keep": true}}"#);
        storage.load(&backing).unwrap();

        let staged = storage
            .stage(BTreeMap::from([(ComponentName::from("a"), Some(json!(2)))]))
            .unwrap()
            .unwrap();
        let written: Document = serde_json::from_slice(&staged.bytes).unwrap();

        assert_eq!(written.get("a"), Some(&json!(2)));
        assert_eq!(written.get("legacy"), Some(&json!({"keep": true})));
    }

    #[test]
    fn test_load_rejects_malformed_content() {
        let backing = MemoryStore::new();
        let storage = storage();
        backing.put_external(storage.unit(), "{not json");

        assert!(storage.load(&backing).is_err());
    }

    #[test]
    fn test_changed_components() {
        let backing = MemoryStore::new();
        let storage = storage();
        backing.put_external(storage.unit(), r#"{"a": 1, "b": 2}"#);
        storage.load(&backing).unwrap();
        let known = names(&["a", "b"]);

        let same = backing.contents(storage.unit()).unwrap();
        assert!(storage.changed_components(Some(&same), &known).unwrap().is_empty());

        let edited = br#"{"a": 1, "b": 3, "c": 9}"#;
        assert_eq!(
            storage.changed_components(Some(edited), &known).unwrap(),
            names(&["b"])
        );

        assert_eq!(storage.changed_components(None, &known).unwrap(), known);
        assert!(storage.changed_components(Some(b"[1,"), &known).is_err());
    }

    #[test]
    fn test_rebase_merges_onto_newer_commit() {
        let storage = storage();
        let first = storage
            .stage(BTreeMap::from([(ComponentName::from("a"), Some(json!(1)))]))
            .unwrap()
            .unwrap();
        let second = storage
            .stage(BTreeMap::from([(ComponentName::from("b"), Some(json!(2)))]))
            .unwrap()
            .unwrap();

        let first = first.rebase().unwrap().unwrap();
        storage.commit(first);
        let second = second.rebase().unwrap().unwrap();
        let written: Document = serde_json::from_slice(&second.bytes).unwrap();
        storage.commit(second);

        assert_eq!(written.get("a"), Some(&json!(1)));
        assert_eq!(written.get("b"), Some(&json!(2)));
        assert_eq!(storage.cached_components(), names(&["a", "b"]));
    }

    #[test]
    fn test_rebase_drops_write_made_redundant() {
        let storage = storage();
        let states = BTreeMap::from([(ComponentName::from("a"), Some(json!(1)))]);
        let first = storage.stage(states.clone()).unwrap().unwrap();
        let second = storage.stage(states).unwrap().unwrap();

        storage.commit(first);
        assert!(second.rebase().unwrap().is_none());
    }

    #[test]
    fn test_pool_shares_storage_per_unit() {
        let backing = MemoryStore::new();
        let pool = StoragePool::new();
        let unit = StorageUnit::new("/work/shared/B.json");
        backing.put_external(&unit, r#"{"b1": 1}"#);

        let first = pool.get_or_load(&unit, "/work/shared/B.json", &backing).unwrap();
        let second = pool.get_or_load(&unit, "$PROJECT_DIR$/B.json", &backing).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.template(), "/work/shared/B.json");
        assert_eq!(pool.len(), 1);

        drop(first);
        drop(second);
        assert!(pool.is_empty());
    }
}
