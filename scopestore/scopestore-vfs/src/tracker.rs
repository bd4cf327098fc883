//! Accumulates change notifications until a save session analyses them.

use crate::watcher::FileEvent;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use scopestore_core::id::ScopeId;
use scopestore_core::types::{ChangedFile, ChangedFiles, StorageUnit};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

/// Thread-safe set of storage units changed since the last snapshot.
///
/// The change feed may record from any thread. Analysis works on the value
/// returned by [`ChangeTracker::take_snapshot`], which is never mutated
/// afterwards.
#[derive(Debug, Default)]
pub struct ChangeTracker {
    pending: Mutex<BTreeMap<ChangedFile, DateTime<Utc>>>,
}

impl ChangeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a change of `unit`, owned by `owner` when known
    pub fn record(&self, unit: StorageUnit, owner: Option<ScopeId>) {
        let change = ChangedFile { unit, owner };
        self.pending.lock().entry(change).or_insert_with(Utc::now);
    }

    /// Record a batch from the change feed
    ///
    /// Temp files written by atomic saves are skipped.
    pub fn record_events(&self, events: &[FileEvent]) {
        let mut pending = self.pending.lock();
        for event in events {
            let paths: Vec<&Path> = match event {
                FileEvent::Renamed { from, to } => vec![from.as_path(), to.as_path()],
                other => vec![other.path()],
            };
            for path in paths {
                if is_temp_file(path) {
                    continue;
                }
                debug!("Tracking change of {}", path.display());
                pending
                    .entry(ChangedFile::new(StorageUnit::from(path)))
                    .or_insert_with(Utc::now);
            }
        }
    }

    /// Take everything recorded so far, leaving the tracker empty
    pub fn take_snapshot(&self) -> ChangedFiles {
        let pending = std::mem::take(&mut *self.pending.lock());
        pending.into_keys().collect()
    }

    /// When the oldest pending change was first seen
    pub fn oldest_pending(&self) -> Option<DateTime<Utc>> {
        self.pending.lock().values().min().copied()
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}

fn is_temp_file(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "tmp")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Arc;

    #[test]
    fn test_snapshot_drains_tracker() {
        let tracker = ChangeTracker::new();
        tracker.record(StorageUnit::new("/p/a.json"), None);
        tracker.record(StorageUnit::new("/p/a.json"), None);
        tracker.record(StorageUnit::new("/p/b.json"), None);

        assert_eq!(tracker.len(), 2);
        assert!(tracker.oldest_pending().is_some());

        let snapshot = tracker.take_snapshot();
        assert_eq!(snapshot.len(), 2);
        assert!(tracker.is_empty());
        assert!(tracker.take_snapshot().is_empty());
    }

    #[test]
    fn test_record_events_skips_temp_files() {
        let tracker = ChangeTracker::new();
        tracker.record_events(&[
            FileEvent::Created(PathBuf::from("/p/.scopestore/misc.json.tmp")),
            FileEvent::Renamed {
                from: PathBuf::from("/p/.scopestore/misc.json.tmp"),
                to: PathBuf::from("/p/.scopestore/misc.json"),
            },
        ]);

        let snapshot = tracker.take_snapshot();
        let units: Vec<_> = snapshot.iter().map(|c| c.unit.clone()).collect();
        assert_eq!(units, vec![StorageUnit::new("/p/.scopestore/misc.json")]);
    }

    #[test]
    fn test_snapshot_isolated_from_later_records() {
        let tracker = Arc::new(ChangeTracker::new());
        tracker.record(StorageUnit::new("/p/a.json"), None);
        let snapshot = tracker.take_snapshot();

        let feeder = {
            let tracker = Arc::clone(&tracker);
            std::thread::spawn(move || tracker.record(StorageUnit::new("/p/b.json"), None))
        };
        feeder.join().unwrap();

        assert_eq!(snapshot.len(), 1);
        assert_eq!(tracker.len(), 1);
    }
}
