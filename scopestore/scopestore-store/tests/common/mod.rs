//! Shared fixtures for scope store integration tests.

#![allow(dead_code)]

use scopestore_core::traits::PersistentComponent;
use scopestore_core::types::{ChangedFile, ChangedFiles, ComponentName, StorageUnit};
use scopestore_core::{Result, StoreError};
use scopestore_store::{ComponentStore, JsonComponent, MacroSubstitutor, ModuleRegistry};
use scopestore_vfs::{BackingStore, MemoryStore};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A project scope with module scopes over one in-memory backing store
pub struct Tree {
    pub backing: Arc<MemoryStore>,
    pub root: Arc<ComponentStore>,
    pub modules: Arc<ModuleRegistry>,
}

impl Tree {
    pub fn new() -> Self {
        let backing = Arc::new(MemoryStore::new());
        let modules = Arc::new(ModuleRegistry::new());
        let root = Arc::new(
            ComponentStore::new("project", Arc::clone(&backing) as Arc<dyn BackingStore>)
                .with_substitutor(Arc::new(MacroSubstitutor::for_scope(&scope_dir("project"))))
                .with_registry(modules.clone()),
        );
        Self {
            backing,
            root,
            modules,
        }
    }

    /// Add a module scope named `name` and return it
    pub fn add_module(&self, name: &str) -> Arc<ComponentStore> {
        let module = Arc::new(
            self.root
                .child(name)
                .with_substitutor(Arc::new(MacroSubstitutor::for_scope(&scope_dir(name)))),
        );
        self.modules.add(Arc::clone(&module));
        module
    }
}

pub fn scope_dir(name: &str) -> PathBuf {
    Path::new("/work").join(name)
}

/// Register a JSON component stored in `<scope dir>/.scopestore/<file>`
pub fn component(store: &ComponentStore, name: &str, file: &str) -> Arc<JsonComponent> {
    let component = Arc::new(JsonComponent::new(name));
    store
        .register_component(component.clone(), &format!("$SCOPE_DIR$/.scopestore/{}", file))
        .unwrap();
    component
}

/// Component whose state cannot be computed
pub struct Unavailable {
    name: ComponentName,
}

impl PersistentComponent for Unavailable {
    fn name(&self) -> &ComponentName {
        &self.name
    }

    fn state(&self) -> Result<Option<serde_json::Value>> {
        Err(StoreError::internal(format!("{} has no state", self.name)))
    }

    fn load_state(&self, _state: Option<serde_json::Value>) {}
}

/// Register an [`Unavailable`] component stored in `<scope dir>/.scopestore/<file>`
pub fn unavailable(store: &ComponentStore, name: &str, file: &str) {
    let component = Arc::new(Unavailable {
        name: ComponentName::from(name),
    });
    store
        .register_component(component, &format!("$SCOPE_DIR$/.scopestore/{}", file))
        .unwrap();
}

/// Storage unit of `file` in the state directory of scope `name`
pub fn unit(scope_name: &str, file: &str) -> StorageUnit {
    StorageUnit::new(scope_dir(scope_name).join(".scopestore").join(file))
}

pub fn names(items: &[&str]) -> BTreeSet<ComponentName> {
    items.iter().map(|s| ComponentName::from(*s)).collect()
}

pub fn changed(units: &[StorageUnit]) -> ChangedFiles {
    units.iter().cloned().map(ChangedFile::new).collect()
}

pub fn read_json(backing: &MemoryStore, unit: &StorageUnit) -> serde_json::Value {
    serde_json::from_slice(&backing.contents(unit).unwrap()).unwrap()
}
