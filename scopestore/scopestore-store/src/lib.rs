//! Component stores and the save session protocol.
//!
//! A [`ComponentStore`] maps component names of one scope to storage files.
//! Stores form a tree through [`ScopeRegistry`]: saving the root opens a
//! [`CompositeSaveSession`] holding one session per scope enumerated at that
//! moment.
//!
//! # Example
//!
//! ```no_run
//! use scopestore_store::{ComponentStore, JsonComponent, MacroSubstitutor, ModuleRegistry};
//! use scopestore_vfs::LocalFileStore;
//! use serde_json::json;
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! # fn example() -> scopestore_core::Result<()> {
//! let backing = Arc::new(LocalFileStore::default());
//! let modules = Arc::new(ModuleRegistry::new());
//! let project = ComponentStore::new("demo", backing)
//!     .with_substitutor(Arc::new(MacroSubstitutor::for_scope(Path::new("/work/demo"))))
//!     .with_registry(modules.clone());
//!
//! let vcs = Arc::new(JsonComponent::new("vcs"));
//! project.register_component(vcs.clone(), "$SCOPE_DIR$/.scopestore/vcs.json")?;
//! vcs.set(json!({"mapping": "$SCOPE_DIR$"}));
//! project.save()?;
//! # Ok(())
//! # }
//! ```

pub mod component;
pub mod registry;
pub mod session;
pub mod storage;
pub mod store;
pub mod substitutor;

pub use component::JsonComponent;
pub use registry::{ModuleRegistry, ScopeRegistry};
pub use session::{CompositeSaveSession, SaveSession, ScopeSaveSession};
pub use storage::{FileStorage, StagedWrite, StoragePool};
pub use store::ComponentStore;
pub use substitutor::{
    MacroSubstitutor, PROJECT_DIR_MACRO, SCOPE_DIR_MACRO, collapse_value, expand_value,
};
