//! Backing store layer for the scope store.
//!
//! This crate provides the storage capability component stores write
//! through:
//! - `BackingStore`: per-unit read/write/delete with atomic writes
//! - `LocalFileStore` and `MemoryStore` implementations
//! - `ContentHash`: blake3 hashing to detect whether bytes changed
//! - `FileWatcher`: live change feed with debouncing and coalescing
//! - `ChangeTracker`: snapshots of changed units for external change analysis
//!
//! # Example
//!
//! ```no_run
//! use scopestore_vfs::{BackingStore, LocalFileStore};
//! use scopestore_core::StorageUnit;
//!
//! # fn example() -> scopestore_core::Result<()> {
//! let store = LocalFileStore::default();
//! let unit = StorageUnit::new("/home/user/project/.scopestore/misc.json");
//! store.write(&unit, b"{}")?;
//! assert_eq!(store.read(&unit)?.as_deref(), Some(&b"{}"[..]));
//! # Ok(())
//! # }
//! ```

pub mod backing;
pub mod hash;
pub mod memory;
pub mod tracker;
pub mod watcher;

pub use backing::{BackingStore, LocalFileStore};
pub use hash::ContentHash;
pub use memory::MemoryStore;
pub use tracker::ChangeTracker;
pub use watcher::{FileEvent, FileWatcher, WatcherConfig, WatcherStats};
