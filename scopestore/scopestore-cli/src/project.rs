//! Scope tree of an on-disk project.
//!
//! A project directory holds a `scopestore.toml` manifest naming its modules.
//! Every scope (the project and each module) keeps its storage files in its
//! state directory; each top-level key of a storage file becomes a
//! [`JsonComponent`].

use scopestore_core::config::MANIFEST_FILENAME;
use scopestore_core::error::{Result, StoreError};
use scopestore_core::id::ScopeId;
use scopestore_core::types::{ChangedFile, ChangedFiles, ComponentName};
use scopestore_core::{ProjectManifest, StoreConfig};
use scopestore_store::{
    ComponentStore, JsonComponent, MacroSubstitutor, ModuleRegistry, PROJECT_DIR_MACRO,
    StoragePool,
};
use scopestore_vfs::{BackingStore, LocalFileStore};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Storage file receiving components created from the command line
const DEFAULT_STORAGE: &str = "misc";

/// One scope of an opened project
pub struct ScopeHandle {
    pub name: String,
    pub dir: PathBuf,
    pub store: Arc<ComponentStore>,
    pub components: BTreeMap<String, Arc<JsonComponent>>,
}

impl ScopeHandle {
    fn open(
        name: &str,
        dir: PathBuf,
        project_dir: &Path,
        backing: &Arc<dyn BackingStore>,
        pool: &Arc<StoragePool>,
        config: &StoreConfig,
    ) -> Result<Self> {
        let substitutor =
            MacroSubstitutor::for_scope(&dir).with_macro(PROJECT_DIR_MACRO, project_dir);
        let store = Arc::new(
            ComponentStore::new(name, Arc::clone(backing))
                .with_storage_pool(Arc::clone(pool))
                .with_substitutor(Arc::new(substitutor)),
        );

        let mut handle = Self {
            name: name.to_string(),
            dir,
            store,
            components: BTreeMap::new(),
        };
        handle.discover(config)?;
        Ok(handle)
    }

    /// Register one component per top-level key of every storage file
    fn discover(&mut self, config: &StoreConfig) -> Result<()> {
        let state_dir = config.state_dir_for(&self.dir);
        if !state_dir.is_dir() {
            debug!("Scope '{}': no state directory at {}", self.name, state_dir.display());
            return Ok(());
        }

        let mut files: Vec<PathBuf> = std::fs::read_dir(&state_dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.is_file()
                    && path.extension().and_then(|e| e.to_str())
                        == Some(config.storage.extension.as_str())
            })
            .collect();
        files.sort();

        for path in files {
            let bytes = std::fs::read(&path)?;
            if bytes.iter().all(|b| b.is_ascii_whitespace()) {
                continue;
            }
            let document: BTreeMap<String, serde_json::Value> = serde_json::from_slice(&bytes)
                .map_err(|e| StoreError::invalid_input(format!("{}: {}", path.display(), e)))?;

            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let template = format!("$SCOPE_DIR$/{}/{}", config.storage.state_dir, file_name);
            for name in document.keys() {
                self.register(name, &template)?;
            }
        }

        debug!(
            "Scope '{}': discovered {} component(s)",
            self.name,
            self.components.len()
        );
        Ok(())
    }

    fn register(&mut self, name: &str, template: &str) -> Result<Arc<JsonComponent>> {
        let component = Arc::new(JsonComponent::new(name));
        self.store.register_component(component.clone(), template)?;
        self.components
            .insert(name.to_string(), Arc::clone(&component));
        Ok(component)
    }
}

/// A project scope and its module scopes, opened from disk
pub struct Project {
    pub dir: PathBuf,
    pub manifest: ProjectManifest,
    scopes: Vec<ScopeHandle>,
    modules: Arc<ModuleRegistry>,
    config: StoreConfig,
}

impl Project {
    /// Open the project rooted at `dir`
    pub fn open(dir: &Path, config: &StoreConfig) -> Result<Self> {
        let dir = std::fs::canonicalize(dir).map_err(|e| {
            StoreError::invalid_input(format!("Cannot open project {}: {}", dir.display(), e))
        })?;
        if !dir.join(MANIFEST_FILENAME).is_file() {
            return Err(StoreError::invalid_input(format!(
                "{} has no {}",
                dir.display(),
                MANIFEST_FILENAME
            )));
        }
        let manifest = ProjectManifest::load(&dir)?;

        let backing: Arc<dyn BackingStore> =
            Arc::new(LocalFileStore::new(config.storage.durable_writes));
        let modules = Arc::new(ModuleRegistry::new());
        let pool = Arc::new(StoragePool::new());

        let root = ScopeHandle::open(&manifest.name, dir.clone(), &dir, &backing, &pool, config)?;
        root.store.set_registry(modules.clone());
        let mut scopes = vec![root];

        for entry in &manifest.modules {
            let module_dir = dir.join(&entry.dir);
            let module = ScopeHandle::open(&entry.name, module_dir, &dir, &backing, &pool, config)?;
            modules.add(Arc::clone(&module.store));
            scopes.push(module);
        }

        info!(
            "Opened project '{}' with {} module(s)",
            manifest.name,
            manifest.modules.len()
        );

        Ok(Self {
            dir,
            manifest,
            scopes,
            modules,
            config: config.clone(),
        })
    }

    /// The project scope
    pub fn root(&self) -> &Arc<ComponentStore> {
        &self.scopes[0].store
    }

    /// Project scope first, then modules in manifest order
    pub fn scopes(&self) -> &[ScopeHandle] {
        &self.scopes
    }

    pub fn scope(&self, name: &str) -> Option<&ScopeHandle> {
        self.scopes.iter().find(|s| s.name == name)
    }

    /// Currently registered module scopes
    pub fn module_count(&self) -> usize {
        self.modules.len()
    }

    /// Look up a component, registering it in the scope's default storage
    /// file when it does not exist yet
    pub fn component_or_create(
        &mut self,
        scope: &str,
        component: &str,
    ) -> Result<Arc<JsonComponent>> {
        let template = format!(
            "$SCOPE_DIR$/{}/{}.{}",
            self.config.storage.state_dir, DEFAULT_STORAGE, self.config.storage.extension
        );
        let handle = self
            .scopes
            .iter_mut()
            .find(|s| s.name == scope)
            .ok_or_else(|| StoreError::invalid_input(format!("Unknown scope '{}'", scope)))?;

        match handle.components.get(component) {
            Some(existing) => Ok(Arc::clone(existing)),
            None => handle.register(component, &template),
        }
    }

    /// Every component name in the tree
    pub fn all_component_names(&self) -> BTreeSet<ComponentName> {
        self.scopes
            .iter()
            .flat_map(|s| s.store.component_names())
            .collect()
    }

    /// Attribute changed files to the scope owning them
    pub fn attribute(&self, changed: ChangedFiles) -> ChangedFiles {
        changed
            .into_iter()
            .map(|file| match self.owner_of(&file) {
                Some(owner) => ChangedFile::owned_by(file.unit, owner),
                None => file,
            })
            .collect()
    }

    fn owner_of(&self, file: &ChangedFile) -> Option<ScopeId> {
        let mut owners = self
            .scopes
            .iter()
            .filter(|s| s.store.storage_units().contains(&file.unit));
        match (owners.next(), owners.next()) {
            (Some(only), None) => Some(only.store.id()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(path: &Path, content: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn fixture() -> TempDir {
        let dir = TempDir::new().unwrap();
        write(
            &dir.path().join(MANIFEST_FILENAME),
            "name = \"demo\"\n\n[[modules]]\nname = \"core\"\ndir = \"core\"\n",
        );
        write(
            &dir.path().join(".scopestore/misc.json"),
            r#"{"vcs": {"root": "$PROJECT_DIR$"}, "encoding": "utf-8"}"#,
        );
        write(
            &dir.path().join("core/.scopestore/build.json"),
            r#"{"output": "$SCOPE_DIR$/target"}"#,
        );
        dir
    }

    #[test]
    fn test_open_discovers_scopes_and_components() {
        let dir = fixture();
        let project = Project::open(dir.path(), &StoreConfig::default()).unwrap();

        assert_eq!(project.scopes().len(), 2);
        assert_eq!(project.module_count(), 1);
        assert_eq!(project.root().persistent_children().len(), 1);

        let root = project.scope("demo").unwrap();
        assert_eq!(
            root.components.keys().cloned().collect::<Vec<_>>(),
            vec!["encoding", "vcs"]
        );

        let core = project.scope("core").unwrap();
        let output = core.components["output"].get().unwrap();
        assert!(output.as_str().unwrap().ends_with("core/target"));
        assert!(!output.as_str().unwrap().contains('$'));
    }

    #[test]
    fn test_component_or_create_uses_default_storage() {
        let dir = fixture();
        let mut project = Project::open(dir.path(), &StoreConfig::default()).unwrap();

        let created = project.component_or_create("core", "facets").unwrap();
        created.set(serde_json::json!({"web": true}));
        project.root().save().unwrap();

        let written =
            std::fs::read_to_string(dir.path().join("core/.scopestore/misc.json")).unwrap();
        assert!(written.contains("facets"));

        assert!(project.component_or_create("nope", "x").is_err());
    }

    #[test]
    fn test_missing_manifest_is_rejected() {
        let dir = TempDir::new().unwrap();
        assert!(Project::open(dir.path(), &StoreConfig::default()).is_err());
    }

    #[test]
    fn test_attribute_single_owner() {
        let dir = fixture();
        let project = Project::open(dir.path(), &StoreConfig::default()).unwrap();
        let core = project.scope("core").unwrap();
        let unit = core.store.storage_of("output").unwrap();

        let attributed = project.attribute([ChangedFile::new(unit)].into_iter().collect());
        let file = attributed.into_iter().next().unwrap();
        assert_eq!(file.owner, Some(core.store.id()));
    }
}
