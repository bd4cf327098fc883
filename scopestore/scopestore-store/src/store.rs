//! Per-scope component store.

use crate::registry::ScopeRegistry;
use crate::session::{CompositeSaveSession, SaveSession, ScopeSaveSession};
use crate::storage::{FileStorage, StoragePool};
use crate::substitutor::expand_value;
use parking_lot::RwLock;
use scopestore_core::error::{Result, StoreError};
use scopestore_core::id::ScopeId;
use scopestore_core::traits::{PathSubstitutor, PersistentComponent};
use scopestore_core::types::{ComponentName, StorageUnit};
use scopestore_vfs::BackingStore;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

struct Entry {
    component: Arc<dyn PersistentComponent>,
    storage: Arc<FileStorage>,
}

/// Components of one storage, as captured by a save session
pub(crate) struct StorageLayout {
    pub storage: Arc<FileStorage>,
    pub components: Vec<Arc<dyn PersistentComponent>>,
}

/// Owner of the component name to storage mapping of one scope.
///
/// A project scope and each of its modules have their own store; children
/// are found through the attached [`ScopeRegistry`]. Stores of one tree
/// share a [`StoragePool`] so that scopes mapping the same unit see each
/// other's writes; build children with [`ComponentStore::child`].
///
/// At most one save session may be open per scope tree at a time. This is a
/// precondition on callers and is not enforced here.
pub struct ComponentStore {
    id: ScopeId,
    name: String,
    backing: Arc<dyn BackingStore>,
    substitutor: Option<Arc<dyn PathSubstitutor>>,
    components: RwLock<BTreeMap<ComponentName, Entry>>,
    storages: RwLock<BTreeMap<StorageUnit, Arc<FileStorage>>>,
    pool: Arc<StoragePool>,
    registry: RwLock<Option<Arc<dyn ScopeRegistry>>>,
}

impl ComponentStore {
    pub fn new(name: impl Into<String>, backing: Arc<dyn BackingStore>) -> Self {
        Self {
            id: ScopeId::new(),
            name: name.into(),
            backing,
            substitutor: None,
            components: RwLock::new(BTreeMap::new()),
            storages: RwLock::new(BTreeMap::new()),
            pool: Arc::new(StoragePool::new()),
            registry: RwLock::new(None),
        }
    }

    /// A store for a child scope, sharing this store's backing and pool
    pub fn child(&self, name: impl Into<String>) -> Self {
        Self::new(name, Arc::clone(&self.backing)).with_storage_pool(Arc::clone(&self.pool))
    }

    /// Use `pool` for storages registered from now on
    pub fn with_storage_pool(mut self, pool: Arc<StoragePool>) -> Self {
        self.pool = pool;
        self
    }

    pub fn storage_pool(&self) -> &Arc<StoragePool> {
        &self.pool
    }

    pub fn with_substitutor(mut self, substitutor: Arc<dyn PathSubstitutor>) -> Self {
        self.substitutor = Some(substitutor);
        self
    }

    pub fn with_registry(self, registry: Arc<dyn ScopeRegistry>) -> Self {
        *self.registry.write() = Some(registry);
        self
    }

    /// Attach or replace the child scope registry
    pub fn set_registry(&self, registry: Arc<dyn ScopeRegistry>) {
        *self.registry.write() = Some(registry);
    }

    pub fn id(&self) -> ScopeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn backing(&self) -> &Arc<dyn BackingStore> {
        &self.backing
    }

    pub fn substitutor(&self) -> Option<&Arc<dyn PathSubstitutor>> {
        self.substitutor.as_ref()
    }

    /// Map a component to the storage named by `template` and load its state.
    ///
    /// The template is expanded with the scope's substitutor. Components of
    /// the same scope may share a storage unit.
    pub fn register_component(
        &self,
        component: Arc<dyn PersistentComponent>,
        template: &str,
    ) -> Result<StorageUnit> {
        let name = component.name().clone();
        if self.components.read().contains_key(&name) {
            return Err(StoreError::DuplicateComponent(name.to_string()));
        }

        let unit = StorageUnit::new(match &self.substitutor {
            Some(sub) => sub.expand_path(template),
            None => template.to_string(),
        });
        let storage = self.storage_for(&unit, template)?;

        let state = storage
            .component_state(&name)
            .map(|value| expand_value(self.substitutor.as_deref(), value));
        component.load_state(state);

        debug!("Scope '{}': registered '{}' -> {}", self.name, name, unit);
        self.components
            .write()
            .insert(name, Entry { component, storage });
        Ok(unit)
    }

    fn storage_for(&self, unit: &StorageUnit, template: &str) -> Result<Arc<FileStorage>> {
        if let Some(existing) = self.storages.read().get(unit) {
            return Ok(Arc::clone(existing));
        }

        let storage = self
            .pool
            .get_or_load(unit, template, self.backing.as_ref())?;
        self.storages
            .write()
            .insert(unit.clone(), Arc::clone(&storage));
        Ok(storage)
    }

    /// Registered component by name
    pub fn component(&self, name: &str) -> Option<Arc<dyn PersistentComponent>> {
        self.components
            .read()
            .get(name)
            .map(|entry| Arc::clone(&entry.component))
    }

    pub fn component_names(&self) -> Vec<ComponentName> {
        self.components.read().keys().cloned().collect()
    }

    /// Storage unit a component is mapped to
    pub fn storage_of(&self, name: &str) -> Option<StorageUnit> {
        self.components
            .read()
            .get(name)
            .map(|entry| entry.storage.unit().clone())
    }

    /// Storage units owned by this scope alone
    pub fn storage_units(&self) -> BTreeSet<StorageUnit> {
        self.storages.read().keys().cloned().collect()
    }

    /// Child scopes at this moment; empty when no registry is attached.
    pub fn persistent_children(&self) -> Vec<Arc<ComponentStore>> {
        let registry = self.registry.read().clone();
        match registry {
            Some(registry) => registry.enumerate_children(),
            None => Vec::new(),
        }
    }

    pub(crate) fn layout(&self) -> Vec<StorageLayout> {
        let components = self.components.read();
        self.storages
            .read()
            .values()
            .map(|storage| StorageLayout {
                storage: Arc::clone(storage),
                components: components
                    .values()
                    .filter(|entry| Arc::ptr_eq(&entry.storage, storage))
                    .map(|entry| Arc::clone(&entry.component))
                    .collect(),
            })
            .collect()
    }

    /// Reinitialize the named components from their storages.
    ///
    /// With `reload_data` the affected storages are re-read from the backing
    /// store first; otherwise components return to the last loaded state.
    /// Names not registered in a scope are ignored there. This scope is done
    /// before any child starts.
    pub fn reinit_components(
        &self,
        names: &BTreeSet<ComponentName>,
        reload_data: bool,
    ) -> Result<()> {
        self.reinit_own(names, reload_data)?;
        for child in self.persistent_children() {
            child.reinit_components(names, reload_data)?;
        }
        Ok(())
    }

    fn reinit_own(&self, names: &BTreeSet<ComponentName>, reload_data: bool) -> Result<()> {
        let targets: Vec<(Arc<dyn PersistentComponent>, Arc<FileStorage>)> = {
            let components = self.components.read();
            names
                .iter()
                .filter_map(|name| components.get(name))
                .map(|entry| (Arc::clone(&entry.component), Arc::clone(&entry.storage)))
                .collect()
        };
        if targets.is_empty() {
            return Ok(());
        }

        if reload_data {
            let mut reloaded = BTreeSet::new();
            for (_, storage) in &targets {
                if reloaded.insert(storage.unit().clone()) {
                    storage.load(self.backing.as_ref())?;
                }
            }
        }

        for (component, storage) in &targets {
            let state = storage
                .component_state(component.name())
                .map(|value| expand_value(self.substitutor.as_deref(), value));
            component.load_state(state);
        }

        info!(
            "Scope '{}': reinitialized {} component(s){}",
            self.name,
            targets.len(),
            if reload_data { " from disk" } else { "" }
        );
        Ok(())
    }

    /// Whether every named component, here and in every child, can be
    /// reloaded while live. Stops at the first scope that refuses.
    pub fn is_reload_possible(&self, names: &BTreeSet<ComponentName>) -> bool {
        self.own_reload_possible(names)
            && self
                .persistent_children()
                .iter()
                .all(|child| child.is_reload_possible(names))
    }

    fn own_reload_possible(&self, names: &BTreeSet<ComponentName>) -> bool {
        let components = self.components.read();
        let refused = names
            .iter()
            .filter_map(|name| components.get(name))
            .find(|entry| !entry.component.is_reloadable());
        match refused {
            Some(entry) => {
                debug!(
                    "Scope '{}': component '{}' cannot be reloaded",
                    self.name,
                    entry.component.name()
                );
                false
            }
            None => true,
        }
    }

    /// This scope's substitutor followed by those of the child scopes, in
    /// enumeration order. Scopes without one are skipped.
    pub fn substitutors(&self) -> Vec<Arc<dyn PathSubstitutor>> {
        let mut result: Vec<Arc<dyn PathSubstitutor>> = self.substitutor.iter().cloned().collect();
        for child in self.persistent_children() {
            result.extend(child.substitutors());
        }
        result
    }

    /// Open a save session over this scope and the children enumerated now.
    pub fn start_save(&self) -> CompositeSaveSession {
        let children: Vec<Box<dyn SaveSession>> = self
            .persistent_children()
            .iter()
            .map(|child| Box::new(child.start_save()) as Box<dyn SaveSession>)
            .collect();
        debug!(
            "Scope '{}': save session opened with {} child session(s)",
            self.name,
            children.len()
        );
        CompositeSaveSession::new(Box::new(ScopeSaveSession::new(self)), children)
    }

    /// Save the whole tree in one session.
    ///
    /// Read-only targets abort the save before anything is written. A
    /// staging failure does not stop the other scopes from being written;
    /// it is returned after the session finished.
    pub fn save(&self) -> Result<()> {
        let mut session = self.start_save();
        let mut readonly = Vec::new();
        let staged = session.save(&mut readonly);

        if !readonly.is_empty() {
            session.reset()?;
            warn!(
                "Scope '{}': save refused, {} read-only file(s)",
                self.name,
                readonly.len()
            );
            return Err(StoreError::ReadOnlyFiles(
                readonly.into_iter().map(|file| file.unit).collect(),
            ));
        }

        let finished = session.finish_save();
        if let (Err(_), Err(e)) = (&staged, &finished) {
            warn!("Scope '{}': {}", self.name, e);
        }
        staged.and(finished)
    }
}

impl fmt::Debug for ComponentStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentStore")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("components", &self.component_names())
            .field("storages", &self.storage_units())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::JsonComponent;
    use crate::registry::ModuleRegistry;
    use crate::substitutor::MacroSubstitutor;
    use scopestore_vfs::MemoryStore;
    use serde_json::json;
    use std::path::Path;

    fn names(items: &[&str]) -> BTreeSet<ComponentName> {
        items.iter().map(|s| ComponentName::from(*s)).collect()
    }

    fn scope(name: &str, backing: &Arc<MemoryStore>) -> ComponentStore {
        let sub = MacroSubstitutor::for_scope(Path::new(&format!("/p/{}", name)));
        ComponentStore::new(name, Arc::clone(backing) as Arc<dyn BackingStore>)
            .with_substitutor(Arc::new(sub))
    }

    #[test]
    fn test_register_expands_template_and_loads_state() {
        let backing = Arc::new(MemoryStore::new());
        backing.put_external(
            &StorageUnit::new("/p/root/.scopestore/misc.json"),
            r#"{"out": {"dir": "$SCOPE_DIR$/target"}}"#,
        );
        let store = scope("root", &backing);
        let out = Arc::new(JsonComponent::new("out"));

        let unit = store
            .register_component(out.clone(), "$SCOPE_DIR$/.scopestore/misc.json")
            .unwrap();

        assert_eq!(unit, StorageUnit::new("/p/root/.scopestore/misc.json"));
        assert_eq!(out.get(), Some(json!({"dir": "/p/root/target"})));
    }

    #[test]
    fn test_duplicate_registration_is_rejected() {
        let backing = Arc::new(MemoryStore::new());
        let store = scope("root", &backing);
        store
            .register_component(Arc::new(JsonComponent::new("a")), "$SCOPE_DIR$/a.json")
            .unwrap();

        let err = store
            .register_component(Arc::new(JsonComponent::new("a")), "$SCOPE_DIR$/b.json")
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateComponent(name) if name == "a"));
    }

    #[test]
    fn test_shared_storage_unit() {
        let backing = Arc::new(MemoryStore::new());
        let store = scope("root", &backing);
        store
            .register_component(Arc::new(JsonComponent::new("a")), "$SCOPE_DIR$/misc.json")
            .unwrap();
        store
            .register_component(Arc::new(JsonComponent::new("b")), "$SCOPE_DIR$/misc.json")
            .unwrap();

        assert_eq!(store.storage_units().len(), 1);
        assert_eq!(store.storage_of("a"), store.storage_of("b"));
        assert_eq!(store.layout()[0].components.len(), 2);
    }

    #[test]
    fn test_child_shares_storages_of_the_tree() {
        let backing = Arc::new(MemoryStore::new());
        let root = scope("root", &backing);
        let child = root.child("m1");
        let b1 = Arc::new(JsonComponent::new("b1"));
        let b2 = Arc::new(JsonComponent::new("b2"));
        root.register_component(b1, "/p/shared/B.json").unwrap();
        child.register_component(b2, "/p/shared/B.json").unwrap();

        assert!(Arc::ptr_eq(root.storage_pool(), child.storage_pool()));
        assert!(Arc::ptr_eq(&root.layout()[0].storage, &child.layout()[0].storage));
        assert_eq!(child.layout()[0].components.len(), 1);
        assert_eq!(root.storage_pool().len(), 1);
    }

    #[test]
    fn test_children_empty_without_registry() {
        let backing = Arc::new(MemoryStore::new());
        let store = scope("root", &backing);
        assert!(store.persistent_children().is_empty());

        store.set_registry(Arc::new(ModuleRegistry::new()));
        assert!(store.persistent_children().is_empty());
    }

    #[test]
    fn test_reinit_without_reload_discards_memory_changes() {
        let backing = Arc::new(MemoryStore::new());
        backing.put_external(&StorageUnit::new("/p/root/misc.json"), r#"{"a": 1}"#);
        let store = scope("root", &backing);
        let a = Arc::new(JsonComponent::new("a"));
        store
            .register_component(a.clone(), "$SCOPE_DIR$/misc.json")
            .unwrap();

        a.set(json!(5));
        backing.put_external(&StorageUnit::new("/p/root/misc.json"), r#"{"a": 2}"#);

        store.reinit_components(&names(&["a"]), false).unwrap();
        assert_eq!(a.get(), Some(json!(1)));

        store.reinit_components(&names(&["a"]), true).unwrap();
        assert_eq!(a.get(), Some(json!(2)));
    }

    #[test]
    fn test_save_refuses_read_only_files() {
        let backing = Arc::new(MemoryStore::new());
        let store = scope("root", &backing);
        let a = Arc::new(JsonComponent::new("a"));
        let unit = store
            .register_component(a.clone(), "$SCOPE_DIR$/misc.json")
            .unwrap();

        a.set(json!(true));
        backing.set_read_only(&unit, true);

        let err = store.save().unwrap_err();
        assert!(matches!(err, StoreError::ReadOnlyFiles(units) if units == vec![unit.clone()]));
        assert_eq!(backing.write_count(), 0);

        backing.set_read_only(&unit, false);
        store.save().unwrap();
        assert_eq!(backing.write_count(), 1);
    }
}
