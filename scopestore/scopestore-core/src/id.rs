//! Identifiers for scopes.

use std::fmt;
use uuid::Uuid;

/// Identity of one scope (a project or a module) for the lifetime of the
/// process.
///
/// Scope names are for humans and need not be unique across a tree; the id
/// is what change notifications use to point at an owning scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ScopeId(Uuid);

impl ScopeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ScopeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}
