//! Enumeration of child scopes.

use crate::store::ComponentStore;
use parking_lot::RwLock;
use scopestore_core::id::ScopeId;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Source of the live child scopes of a parent scope.
///
/// Queried fresh each time a save session is opened or a reinit fans out;
/// the returned order is the enumeration order used by every aggregate.
pub trait ScopeRegistry: Send + Sync {
    fn enumerate_children(&self) -> Vec<Arc<ComponentStore>>;
}

/// Registry of module scopes owned by a project scope.
///
/// Module lifecycle is driven from outside; this only keeps the current list
/// in insertion order.
#[derive(Default)]
pub struct ModuleRegistry {
    modules: RwLock<Vec<Arc<ComponentStore>>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a module scope; a scope already present is left in place
    pub fn add(&self, module: Arc<ComponentStore>) {
        let mut modules = self.modules.write();
        if modules.iter().any(|m| m.id() == module.id()) {
            return;
        }
        debug!("Registered module scope '{}'", module.name());
        modules.push(module);
    }

    /// Remove a module scope by id
    pub fn remove(&self, id: ScopeId) -> Option<Arc<ComponentStore>> {
        let mut modules = self.modules.write();
        let index = modules.iter().position(|m| m.id() == id)?;
        let removed = modules.remove(index);
        debug!("Removed module scope '{}'", removed.name());
        Some(removed)
    }

    /// Find a module scope by name
    pub fn find(&self, name: &str) -> Option<Arc<ComponentStore>> {
        self.modules.read().iter().find(|m| m.name() == name).cloned()
    }

    pub fn len(&self) -> usize {
        self.modules.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.read().is_empty()
    }
}

impl ScopeRegistry for ModuleRegistry {
    fn enumerate_children(&self) -> Vec<Arc<ComponentStore>> {
        self.modules.read().clone()
    }
}

impl fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self
            .modules
            .read()
            .iter()
            .map(|m| m.name().to_string())
            .collect();
        f.debug_struct("ModuleRegistry").field("modules", &names).finish()
    }
}
