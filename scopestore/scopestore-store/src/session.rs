//! Save sessions: the two-phase save protocol of one scope and its fan-out
//! over a scope tree.
//!
//! A session moves through `Open -> Collecting -> Finished | Reset`.
//! `save` stages the writes, `finish_save` commits them and `reset` discards
//! them. Calling `finish_save` or `reset` on a terminal session is an error.
//!
//! # Partial failure
//!
//! [`CompositeSaveSession::finish_save`] attempts every child even when some
//! fail and always finishes its own scope afterwards. Files that were written
//! stay written: there is no rollback of children that already flushed, so a
//! failed save can leave some scopes on the new state and others on the old
//! one. The failure is always reported, as [`StoreError::ChildSaveFailed`]
//! carrying the first failure and a count of the rest.

use crate::storage::{FileStorage, StagedWrite};
use crate::store::{ComponentStore, StorageLayout};
use crate::substitutor::collapse_value;
use scopestore_core::error::{Result, StoreError};
use scopestore_core::id::ScopeId;
use scopestore_core::traits::PathSubstitutor;
use scopestore_core::types::{
    ChangedFiles, ComponentName, ExternalChanges, ReadonlyFile, SessionState, StorageUnit,
};
use scopestore_vfs::BackingStore;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// One in-flight save.
pub trait SaveSession: Send {
    /// Name of the scope the session was opened on
    fn scope_name(&self) -> &str;

    fn state(&self) -> SessionState;

    /// Compute and stage the writes needed to persist current state.
    ///
    /// Targets that must change but are read-only are appended to
    /// `readonly` and not staged. May be called again while collecting.
    fn save(&mut self, readonly: &mut Vec<ReadonlyFile>) -> Result<()>;

    /// Commit staged writes
    fn finish_save(&mut self) -> Result<()>;

    /// Discard staged writes
    fn reset(&mut self) -> Result<()>;

    /// Components whose on-disk state diverges from what was loaded, given a
    /// snapshot of changed files.
    fn analyze_external_changes(&self, changed: &ChangedFiles) -> ExternalChanges;

    /// Storage units of this scope, plus those of every child scope when
    /// `including_sub` is set
    fn all_storage_files(&self, including_sub: bool) -> BTreeSet<StorageUnit>;

    /// Storage units with a staged write
    fn storage_files_to_save(&self, including_sub: bool) -> BTreeSet<StorageUnit>;

    /// Number of scope sessions taking part in this session
    fn session_count(&self) -> usize {
        1
    }
}

fn check_transition(state: SessionState, operation: &'static str) -> Result<()> {
    if state.is_terminal() {
        return Err(StoreError::InvalidSessionState { state, operation });
    }
    Ok(())
}

/// Save session of a single scope.
///
/// Storages and their components are captured when the session is opened;
/// components registered later are not part of it.
pub struct ScopeSaveSession {
    scope_id: ScopeId,
    scope_name: String,
    backing: Arc<dyn BackingStore>,
    substitutor: Option<Arc<dyn PathSubstitutor>>,
    layout: Vec<StorageLayout>,
    staged: Vec<StagedWrite>,
    state: SessionState,
}

impl ScopeSaveSession {
    pub fn new(store: &ComponentStore) -> Self {
        Self {
            scope_id: store.id(),
            scope_name: store.name().to_string(),
            backing: Arc::clone(store.backing()),
            substitutor: store.substitutor().cloned(),
            layout: store.layout(),
            staged: Vec::new(),
            state: SessionState::Open,
        }
    }

    fn stage_storage(&self, slot: &StorageLayout) -> Result<Option<StagedWrite>> {
        let mut states = BTreeMap::new();
        for component in &slot.components {
            let state = component
                .state()?
                .map(|value| collapse_value(self.substitutor.as_deref(), value));
            states.insert(component.name().clone(), state);
        }
        slot.storage.stage(states)
    }

    fn analyze_storage(&self, slot: &StorageLayout) -> Option<BTreeSet<ComponentName>> {
        let storage: &FileStorage = &slot.storage;
        let current = match self.backing.read(storage.unit()) {
            Ok(current) => current,
            Err(e) => {
                warn!("Scope '{}': cannot read {}: {}", self.scope_name, storage.unit(), e);
                return None;
            }
        };

        let known: BTreeSet<ComponentName> = slot
            .components
            .iter()
            .map(|component| component.name().clone())
            .collect();

        match storage.changed_components(current.as_deref(), &known) {
            Ok(changed) => Some(changed),
            Err(e) => {
                warn!("Scope '{}': {}", self.scope_name, e);
                None
            }
        }
    }
}

impl SaveSession for ScopeSaveSession {
    fn scope_name(&self) -> &str {
        &self.scope_name
    }

    fn state(&self) -> SessionState {
        self.state
    }

    fn save(&mut self, readonly: &mut Vec<ReadonlyFile>) -> Result<()> {
        check_transition(self.state, "save")?;
        self.state = SessionState::Collecting;
        self.staged.clear();

        let mut staged = Vec::new();
        for slot in &self.layout {
            let write = self
                .stage_storage(slot)
                .map_err(|e| StoreError::staging(&self.scope_name, e))?;
            let Some(write) = write else {
                continue;
            };

            if !self.backing.is_writable(write.unit()) {
                debug!("Scope '{}': {} is read-only", self.scope_name, write.unit());
                readonly.push(ReadonlyFile {
                    scope: self.scope_name.clone(),
                    unit: write.unit().clone(),
                });
                continue;
            }
            staged.push(write);
        }

        debug!(
            "Scope '{}': staged {} write(s)",
            self.scope_name,
            staged.len()
        );
        self.staged = staged;
        Ok(())
    }

    fn finish_save(&mut self) -> Result<()> {
        check_transition(self.state, "finish")?;
        self.state = SessionState::Finished;

        let mut first = None;
        for write in std::mem::take(&mut self.staged) {
            let unit = write.unit().clone();
            let write = match write.rebase() {
                Ok(Some(write)) => write,
                Ok(None) => {
                    debug!("Scope '{}': {} already up to date", self.scope_name, unit);
                    continue;
                }
                Err(e) => {
                    error!("Scope '{}': cannot merge {}: {}", self.scope_name, unit, e);
                    if first.is_none() {
                        first = Some(StoreError::commit(&self.scope_name, &unit, e));
                    }
                    continue;
                }
            };
            match self.backing.write(&unit, &write.bytes) {
                Ok(()) => {
                    debug!("Scope '{}': wrote {} ({})", self.scope_name, unit, write.hash.short());
                    let storage = Arc::clone(&write.storage);
                    storage.commit(write);
                }
                Err(e) => {
                    error!("Scope '{}': failed to write {}: {}", self.scope_name, unit, e);
                    if first.is_none() {
                        first = Some(StoreError::commit(&self.scope_name, &unit, e));
                    }
                }
            }
        }

        match first {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn reset(&mut self) -> Result<()> {
        check_transition(self.state, "reset")?;
        self.state = SessionState::Reset;
        self.staged.clear();
        Ok(())
    }

    fn analyze_external_changes(&self, changed: &ChangedFiles) -> ExternalChanges {
        let mut components = BTreeSet::new();
        for slot in &self.layout {
            let unit = slot.storage.unit();
            let affected = changed
                .iter()
                .any(|file| &file.unit == unit && file.concerns(self.scope_id));
            if !affected {
                continue;
            }

            match self.analyze_storage(slot) {
                Some(names) => components.extend(names),
                None => return ExternalChanges::Unreloadable,
            }
        }
        ExternalChanges::Reloadable(components)
    }

    fn all_storage_files(&self, _including_sub: bool) -> BTreeSet<StorageUnit> {
        self.layout
            .iter()
            .map(|slot| slot.storage.unit().clone())
            .collect()
    }

    fn storage_files_to_save(&self, _including_sub: bool) -> BTreeSet<StorageUnit> {
        self.staged.iter().map(|write| write.unit().clone()).collect()
    }
}

/// Save session of a scope together with the sessions of its children.
///
/// The child sessions are fixed when the composite is built; scopes added to
/// or removed from the tree afterwards do not affect it.
pub struct CompositeSaveSession {
    own: Box<dyn SaveSession>,
    children: Vec<Box<dyn SaveSession>>,
    state: SessionState,
}

impl CompositeSaveSession {
    pub fn new(own: Box<dyn SaveSession>, children: Vec<Box<dyn SaveSession>>) -> Self {
        Self {
            own,
            children,
            state: SessionState::Open,
        }
    }

    pub fn children(&self) -> &[Box<dyn SaveSession>] {
        &self.children
    }
}

impl SaveSession for CompositeSaveSession {
    fn scope_name(&self) -> &str {
        self.own.scope_name()
    }

    fn state(&self) -> SessionState {
        self.state
    }

    /// Stages this scope first, then every child. A failing participant does
    /// not stop the others; the first failure is returned.
    fn save(&mut self, readonly: &mut Vec<ReadonlyFile>) -> Result<()> {
        check_transition(self.state, "save")?;
        self.state = SessionState::Collecting;

        let mut first = None;
        let participants = std::iter::once(&mut self.own).chain(self.children.iter_mut());
        for session in participants {
            if let Err(e) = session.save(readonly) {
                warn!("Staging failed for scope '{}': {}", session.scope_name(), e);
                if first.is_none() {
                    first = Some(e);
                }
            }
        }

        match first {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Finishes every child, then this scope regardless of child failures.
    fn finish_save(&mut self) -> Result<()> {
        check_transition(self.state, "finish")?;
        self.state = SessionState::Finished;

        info!(
            "Finishing save of scope '{}' ({} child session(s))",
            self.own.scope_name(),
            self.children.len()
        );

        let mut first = None;
        let mut suppressed = 0;
        for child in &mut self.children {
            if let Err(e) = child.finish_save() {
                if first.is_none() {
                    warn!("Save of scope '{}' failed: {}", child.scope_name(), e);
                    first = Some(e);
                } else {
                    warn!("Save of scope '{}' failed (suppressed): {}", child.scope_name(), e);
                    suppressed += 1;
                }
            }
        }

        let own = self.own.finish_save();

        match (first, own) {
            (None, own) => own,
            (Some(first), Ok(())) => Err(StoreError::ChildSaveFailed {
                first: Box::new(first),
                suppressed,
            }),
            (Some(first), Err(e)) => {
                warn!(
                    "Save of scope '{}' failed (suppressed): {}",
                    self.own.scope_name(),
                    e
                );
                Err(StoreError::ChildSaveFailed {
                    first: Box::new(first),
                    suppressed: suppressed + 1,
                })
            }
        }
    }

    /// Resets every child, then this scope. Child failures are only logged.
    fn reset(&mut self) -> Result<()> {
        check_transition(self.state, "reset")?;
        self.state = SessionState::Reset;

        for child in &mut self.children {
            if let Err(e) = child.reset() {
                warn!("Reset of scope '{}' failed: {}", child.scope_name(), e);
            }
        }
        self.own.reset()
    }

    fn analyze_external_changes(&self, changed: &ChangedFiles) -> ExternalChanges {
        let mut components = match self.own.analyze_external_changes(changed) {
            ExternalChanges::Unreloadable => return ExternalChanges::Unreloadable,
            ExternalChanges::Reloadable(names) => names,
        };

        for child in &self.children {
            match child.analyze_external_changes(changed) {
                ExternalChanges::Unreloadable => {
                    debug!("Scope '{}' cannot be reloaded", child.scope_name());
                    return ExternalChanges::Unreloadable;
                }
                ExternalChanges::Reloadable(names) => components.extend(names),
            }
        }
        ExternalChanges::Reloadable(components)
    }

    fn all_storage_files(&self, including_sub: bool) -> BTreeSet<StorageUnit> {
        let mut units = self.own.all_storage_files(false);
        if including_sub {
            for child in &self.children {
                units.extend(child.all_storage_files(true));
            }
        }
        units
    }

    fn storage_files_to_save(&self, including_sub: bool) -> BTreeSet<StorageUnit> {
        let mut units = self.own.storage_files_to_save(false);
        if including_sub {
            for child in &self.children {
                units.extend(child.storage_files_to_save(true));
            }
        }
        units
    }

    fn session_count(&self) -> usize {
        self.own.session_count()
            + self
                .children
                .iter()
                .map(|child| child.session_count())
                .sum::<usize>()
    }
}
