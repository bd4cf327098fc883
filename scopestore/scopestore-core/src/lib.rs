//! Core types and abstractions for the scope store.
//!
//! This crate provides the error taxonomy, identifiers, shared value types,
//! collaborator traits and configuration used by the other scope store
//! crates.

pub mod error;
pub mod types;
pub mod traits;
pub mod id;
pub mod config;

pub use error::{StoreError, Result};
pub use types::*;
pub use traits::*;
pub use id::ScopeId;
pub use config::{ProjectManifest, ModuleEntry, StoreConfig};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::error::{StoreError, Result};
    pub use crate::types::*;
    pub use crate::traits::*;
    pub use crate::id::ScopeId;
    pub use crate::config::{ProjectManifest, StoreConfig};
}
