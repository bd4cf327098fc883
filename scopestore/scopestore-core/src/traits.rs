//! Interfaces for the collaborators a component store consumes.

use crate::error::Result;
use crate::types::ComponentName;
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;

/// Resolves symbolic path variables (`$NAME$`) used in storage locations and
/// in persisted state.
///
/// The store never inspects a substitutor beyond these calls; it only
/// collects references to them.
pub trait PathSubstitutor: Send + Sync + fmt::Debug {
    /// Replace known `$NAME$` references with their paths.
    fn expand_path(&self, text: &str) -> String;

    /// Replace known paths with `$NAME$` references.
    fn collapse_path(&self, text: &str) -> String;

    /// References met during expansion that had no known value.
    fn unknown_macros(&self) -> BTreeSet<String>;

    /// Forget the recorded unknown references.
    fn reset_unknown_macros(&self) {}
}

/// A logical piece of configuration whose state is persisted by a store.
///
/// Implementations hold their state behind interior mutability; the store
/// calls `state` while collecting a save and `load_state` on load and reinit.
pub trait PersistentComponent: Send + Sync {
    /// Name unique within the owning scope
    fn name(&self) -> &ComponentName;

    /// Current state to persist, `None` when there is nothing to write
    ///
    /// An error here fails staging for the owning scope only.
    fn state(&self) -> Result<Option<Value>>;

    /// Replace the in-memory state; `None` resets to defaults
    fn load_state(&self, state: Option<Value>);

    /// Whether the component tolerates being reloaded from disk while live
    fn is_reloadable(&self) -> bool {
        true
    }
}
