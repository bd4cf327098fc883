//! Error types for the scope store.

use crate::types::{SessionState, StorageUnit};

/// Result type alias for scope store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Main error type for the scope store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Backing store errors (read/write of a storage unit)
    #[error("Backing store error on {unit}: {message}")]
    Backing { unit: StorageUnit, message: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Computing the staged diff failed for one participant
    #[error("Failed to stage changes for scope '{scope}': {source}")]
    Staging {
        scope: String,
        #[source]
        source: Box<StoreError>,
    },

    /// Writing a staged file failed for one participant
    #[error("Failed to write {unit} for scope '{scope}': {source}")]
    Commit {
        scope: String,
        unit: StorageUnit,
        #[source]
        source: Box<StoreError>,
    },

    /// At least one child session failed to finish.
    ///
    /// Only the first failure (in enumeration order) is kept; the others are
    /// counted in `suppressed`.
    #[error("Save failed: {first} ({suppressed} further failure(s) suppressed)")]
    ChildSaveFailed {
        #[source]
        first: Box<StoreError>,
        suppressed: usize,
    },

    /// Storage units that must be written are read-only
    #[error("Read-only storage files: {}", format_units(.0))]
    ReadOnlyFiles(Vec<StorageUnit>),

    /// Save protocol misuse
    #[error("Cannot {operation} a save session in state {state}")]
    InvalidSessionState {
        state: SessionState,
        operation: &'static str,
    },

    /// Component lookup errors
    #[error("Unknown component '{0}'")]
    UnknownComponent(String),

    /// Component registered twice in one scope
    #[error("Component '{0}' is already registered")]
    DuplicateComponent(String),

    /// Invalid input errors
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Change feed errors
    #[error("Watcher error: {0}")]
    Watcher(String),

    /// Generic internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

fn format_units(units: &[StorageUnit]) -> String {
    units
        .iter()
        .map(|u| u.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl StoreError {
    /// Create a new backing store error
    pub fn backing(unit: &StorageUnit, msg: impl Into<String>) -> Self {
        Self::Backing {
            unit: unit.clone(),
            message: msg.into(),
        }
    }

    /// Wrap an error as a staging failure of `scope`
    pub fn staging(scope: impl Into<String>, source: StoreError) -> Self {
        Self::Staging {
            scope: scope.into(),
            source: Box::new(source),
        }
    }

    /// Wrap an error as a commit failure of `unit` in `scope`
    pub fn commit(scope: impl Into<String>, unit: &StorageUnit, source: StoreError) -> Self {
        Self::Commit {
            scope: scope.into(),
            unit: unit.clone(),
            source: Box::new(source),
        }
    }

    /// Create a new invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a new config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new watcher error
    pub fn watcher(msg: impl Into<String>) -> Self {
        Self::Watcher(msg.into())
    }

    /// Create a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// The first underlying failure of an aggregate, or `self`
    pub fn first_failure(&self) -> &StoreError {
        match self {
            Self::ChildSaveFailed { first, .. } => first.first_failure(),
            other => other,
        }
    }

    /// Check if this is a protocol misuse error
    pub fn is_invalid_state(&self) -> bool {
        matches!(self, Self::InvalidSessionState { .. })
    }

    /// Check if this is a commit error
    pub fn is_commit(&self) -> bool {
        matches!(self, Self::Commit { .. })
    }

    pub fn is_staging(&self) -> bool {
        matches!(self, Self::Staging { .. })
    }
}
