//! Shared value types for scopes, components and storage units.

use crate::id::ScopeId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

/// Name of a persisted component, unique within one scope.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ComponentName(String);

impl ComponentName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ComponentName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ComponentName {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl From<String> for ComponentName {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl std::borrow::Borrow<str> for ComponentName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// The physical artifact a storage writes to.
///
/// Units are compared by path; two scopes mapping the same file yield equal
/// units.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StorageUnit(PathBuf);

impl StorageUnit {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    pub fn path(&self) -> &Path {
        &self.0
    }

    /// File name of the unit, used in log lines.
    pub fn file_name(&self) -> Option<&str> {
        self.0.file_name().and_then(|n| n.to_str())
    }
}

impl fmt::Display for StorageUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

impl From<PathBuf> for StorageUnit {
    fn from(path: PathBuf) -> Self {
        Self(path)
    }
}

impl From<&Path> for StorageUnit {
    fn from(path: &Path) -> Self {
        Self(path.to_path_buf())
    }
}

/// Lifecycle of a save session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Just constructed
    Open,
    /// Diff computed, writes staged
    Collecting,
    /// Terminal: staged writes committed
    Finished,
    /// Terminal: staged writes discarded
    Reset,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Collecting => "collecting",
            Self::Finished => "finished",
            Self::Reset => "reset",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Reset)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of comparing on-disk state with what was loaded into memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExternalChanges {
    /// The listed components changed on disk (possibly none).
    Reloadable(BTreeSet<ComponentName>),
    /// Divergence cannot be determined safely; the caller must not reload
    /// automatically.
    Unreloadable,
}

impl ExternalChanges {
    pub fn none() -> Self {
        Self::Reloadable(BTreeSet::new())
    }

    pub fn is_unreloadable(&self) -> bool {
        matches!(self, Self::Unreloadable)
    }

    /// Changed components, or `None` for the unreloadable case.
    pub fn components(&self) -> Option<&BTreeSet<ComponentName>> {
        match self {
            Self::Reloadable(names) => Some(names),
            Self::Unreloadable => None,
        }
    }

    pub fn into_components(self) -> Option<BTreeSet<ComponentName>> {
        match self {
            Self::Reloadable(names) => Some(names),
            Self::Unreloadable => None,
        }
    }
}

/// A storage unit known to have changed since it was last loaded.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChangedFile {
    pub unit: StorageUnit,
    /// Scope owning the storage, when the notifier knows it. `None` matches
    /// every scope mapping the unit.
    pub owner: Option<ScopeId>,
}

impl ChangedFile {
    pub fn new(unit: StorageUnit) -> Self {
        Self { unit, owner: None }
    }

    pub fn owned_by(unit: StorageUnit, owner: ScopeId) -> Self {
        Self {
            unit,
            owner: Some(owner),
        }
    }

    /// Whether this change concerns `scope`.
    pub fn concerns(&self, scope: ScopeId) -> bool {
        self.owner.is_none_or(|owner| owner == scope)
    }
}

/// Snapshot of changed files handed to external change analysis.
pub type ChangedFiles = BTreeSet<ChangedFile>;

/// A storage unit that must be written but is read-only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadonlyFile {
    pub scope: String,
    pub unit: StorageUnit,
}
