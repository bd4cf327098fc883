//! Change feed: notify events debounced and coalesced into batches.
//!
//! The feed is live. Batches are produced for as long as the watcher exists
//! and a dropped watcher cannot be resumed.

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use scopestore_core::config::WatcherSettings;
use scopestore_core::error::{Result, StoreError};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Change of one path reported by the feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileEvent {
    Created(PathBuf),
    Modified(PathBuf),
    Deleted(PathBuf),
    Renamed { from: PathBuf, to: PathBuf },
}

impl FileEvent {
    /// Path whose contents the event affects
    pub fn path(&self) -> &Path {
        match self {
            Self::Created(p) | Self::Modified(p) | Self::Deleted(p) => p,
            Self::Renamed { to, .. } => to,
        }
    }

    /// Fold a later event for the same path into this one
    fn absorb(self, later: FileEvent) -> FileEvent {
        use FileEvent::*;
        match (self, later) {
            (Created(p), Modified(_)) => Created(p),
            (Deleted(_), Created(p)) => Modified(p),
            (Created(_), Deleted(p)) | (Modified(_), Deleted(p)) => Deleted(p),
            (_, later) => later,
        }
    }

    fn from_notify(event: Event) -> Option<FileEvent> {
        let mut paths = event.paths.into_iter();
        let first = paths.next()?;
        let second = paths.next();

        match (event.kind, second) {
            (EventKind::Create(_), _) => Some(FileEvent::Created(first)),
            (EventKind::Modify(ModifyKind::Name(RenameMode::Both)), Some(to))
            | (EventKind::Any, Some(to)) => Some(FileEvent::Renamed { from: first, to }),
            (EventKind::Modify(ModifyKind::Name(RenameMode::From)), _) => {
                Some(FileEvent::Deleted(first))
            }
            (EventKind::Modify(_), _) => Some(FileEvent::Modified(first)),
            (EventKind::Remove(_), _) => Some(FileEvent::Deleted(first)),
            _ => None,
        }
    }
}

/// Timing of the change feed
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Quiet time a path needs before its event is emitted
    pub debounce_duration: Duration,
    /// How often pending events are checked for emission
    pub batch_interval: Duration,
    /// Pending paths that force an emission regardless of debounce
    pub max_batch_size: usize,
    /// Merge successive events of one path into one
    pub coalesce_events: bool,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self::from(&WatcherSettings::default())
    }
}

impl From<&WatcherSettings> for WatcherConfig {
    fn from(settings: &WatcherSettings) -> Self {
        Self {
            debounce_duration: Duration::from_millis(settings.debounce_ms),
            batch_interval: Duration::from_millis(settings.batch_interval_ms),
            max_batch_size: settings.max_batch_size,
            coalesce_events: true,
        }
    }
}

/// Counters of a running watcher
#[derive(Debug, Default)]
pub struct WatcherStats {
    raw_events: AtomicU64,
    events_delivered: AtomicU64,
    batches_emitted: AtomicU64,
}

impl WatcherStats {
    /// Events received from notify
    pub fn raw_events(&self) -> u64 {
        self.raw_events.load(Ordering::Relaxed)
    }

    /// Events handed to the consumer through `recv`
    pub fn events_delivered(&self) -> u64 {
        self.events_delivered.load(Ordering::Relaxed)
    }

    pub fn batches_emitted(&self) -> u64 {
        self.batches_emitted.load(Ordering::Relaxed)
    }
}

/// Events waiting for their debounce period to pass
struct Pending {
    events: BTreeMap<PathBuf, (FileEvent, Instant)>,
    config: WatcherConfig,
}

impl Pending {
    fn push(&mut self, event: FileEvent, now: Instant) {
        let path = event.path().to_path_buf();
        let merged = match self.events.remove(&path) {
            Some((earlier, _)) if self.config.coalesce_events => earlier.absorb(event),
            _ => event,
        };
        self.events.insert(path, (merged, now));
    }

    /// Remove and return the events that are ready
    fn drain_ready(&mut self, now: Instant) -> Vec<FileEvent> {
        let force = self.events.len() >= self.config.max_batch_size;
        if force {
            debug!("{} pending paths, emitting without debounce", self.events.len());
        }

        let debounce = self.config.debounce_duration;
        let ready: Vec<PathBuf> = self
            .events
            .iter()
            .filter(|(_, (_, seen))| force || now.duration_since(*seen) >= debounce)
            .map(|(path, _)| path.clone())
            .collect();

        ready
            .into_iter()
            .filter_map(|path| self.events.remove(&path).map(|(event, _)| event))
            .collect()
    }
}

/// File system watcher delivering coalesced batches of events.
///
/// Must be created inside a tokio runtime.
pub struct FileWatcher {
    _watcher: RecommendedWatcher,
    batches: mpsc::UnboundedReceiver<Vec<FileEvent>>,
    task: JoinHandle<()>,
    watched_path: PathBuf,
    stats: Arc<WatcherStats>,
}

impl FileWatcher {
    /// Watch `path` recursively with default timing
    pub fn new(path: &Path) -> Result<Self> {
        Self::with_config(path, WatcherConfig::default())
    }

    pub fn with_config(path: &Path, config: WatcherConfig) -> Result<Self> {
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let (batch_tx, batch_rx) = mpsc::unbounded_channel();
        let stats = Arc::new(WatcherStats::default());

        let counter = Arc::clone(&stats);
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                counter.raw_events.fetch_add(1, Ordering::Relaxed);
                if let Some(event) = FileEvent::from_notify(event) {
                    let _ = raw_tx.send(event);
                }
            }
            Err(e) => warn!("Watch error: {}", e),
        })
        .map_err(|e| StoreError::watcher(format!("Failed to create watcher: {}", e)))?;

        watcher
            .watch(path, RecursiveMode::Recursive)
            .map_err(|e| {
                StoreError::watcher(format!("Failed to watch {}: {}", path.display(), e))
            })?;

        let task = tokio::spawn(Self::run(raw_rx, batch_tx, config, Arc::clone(&stats)));
        info!("Watching {}", path.display());

        Ok(Self {
            _watcher: watcher,
            batches: batch_rx,
            task,
            watched_path: path.to_path_buf(),
            stats,
        })
    }

    /// Root of the watched tree
    pub fn watched_path(&self) -> &Path {
        &self.watched_path
    }

    async fn run(
        mut raw_rx: mpsc::UnboundedReceiver<FileEvent>,
        batch_tx: mpsc::UnboundedSender<Vec<FileEvent>>,
        config: WatcherConfig,
        stats: Arc<WatcherStats>,
    ) {
        let mut ticker = tokio::time::interval(config.batch_interval);
        let mut pending = Pending {
            events: BTreeMap::new(),
            config,
        };

        loop {
            tokio::select! {
                event = raw_rx.recv() => match event {
                    Some(event) => pending.push(event, Instant::now()),
                    None => break,
                },
                _ = ticker.tick() => {
                    let batch = pending.drain_ready(Instant::now());
                    if batch.is_empty() {
                        continue;
                    }
                    debug!("Emitting batch of {} event(s)", batch.len());
                    stats.batches_emitted.fetch_add(1, Ordering::Relaxed);
                    if batch_tx.send(batch).is_err() {
                        break;
                    }
                }
            }
        }
    }

    /// Next batch of events; `None` once the feed has stopped
    pub async fn recv(&mut self) -> Option<Vec<FileEvent>> {
        let batch = self.batches.recv().await?;
        self.stats
            .events_delivered
            .fetch_add(batch.len() as u64, Ordering::Relaxed);
        Some(batch)
    }

    /// Next batch if one is ready
    pub fn try_recv(&mut self) -> Option<Vec<FileEvent>> {
        self.batches.try_recv().ok()
    }

    pub fn stats(&self) -> &WatcherStats {
        &self.stats
    }
}

impl Drop for FileWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending(debounce_ms: u64, max_batch_size: usize) -> Pending {
        Pending {
            events: BTreeMap::new(),
            config: WatcherConfig {
                debounce_duration: Duration::from_millis(debounce_ms),
                batch_interval: Duration::from_millis(10),
                max_batch_size,
                coalesce_events: true,
            },
        }
    }

    fn notify_event(kind: EventKind, paths: &[&str]) -> Event {
        Event {
            kind,
            paths: paths.iter().map(PathBuf::from).collect(),
            attrs: Default::default(),
        }
    }

    #[test]
    fn test_notify_create() {
        let event = notify_event(
            EventKind::Create(notify::event::CreateKind::File),
            &["/p/misc.json"],
        );
        assert_eq!(
            FileEvent::from_notify(event),
            Some(FileEvent::Created(PathBuf::from("/p/misc.json")))
        );
    }

    #[test]
    fn test_notify_rename_targets_new_path() {
        let event = notify_event(
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            &["/p/misc.json.tmp", "/p/misc.json"],
        );
        let converted = FileEvent::from_notify(event).unwrap();
        assert_eq!(converted.path(), Path::new("/p/misc.json"));
    }

    #[test]
    fn test_notify_without_paths_is_dropped() {
        let event = notify_event(EventKind::Remove(notify::event::RemoveKind::File), &[]);
        assert!(FileEvent::from_notify(event).is_none());
    }

    #[test]
    fn test_absorb() {
        let p = || PathBuf::from("/p/misc.json");
        assert_eq!(
            FileEvent::Created(p()).absorb(FileEvent::Modified(p())),
            FileEvent::Created(p())
        );
        assert_eq!(
            FileEvent::Modified(p()).absorb(FileEvent::Deleted(p())),
            FileEvent::Deleted(p())
        );
        assert_eq!(
            FileEvent::Deleted(p()).absorb(FileEvent::Created(p())),
            FileEvent::Modified(p())
        );
    }

    #[test]
    fn test_pending_waits_for_debounce() {
        let mut pending = pending(100, 100);
        let start = Instant::now();
        pending.push(FileEvent::Modified(PathBuf::from("/p/a.json")), start);
        pending.push(FileEvent::Modified(PathBuf::from("/p/a.json")), start);

        assert!(pending.drain_ready(start).is_empty());
        let ready = pending.drain_ready(start + Duration::from_millis(150));
        assert_eq!(ready.len(), 1);
        assert!(pending.events.is_empty());
    }

    #[test]
    fn test_pending_forces_full_batch() {
        let mut pending = pending(10_000, 2);
        let now = Instant::now();
        pending.push(FileEvent::Created(PathBuf::from("/p/a.json")), now);
        pending.push(FileEvent::Created(PathBuf::from("/p/b.json")), now);

        assert_eq!(pending.drain_ready(now).len(), 2);
    }

    #[test]
    fn test_config_from_settings() {
        let settings = WatcherSettings {
            debounce_ms: 50,
            batch_interval_ms: 200,
            max_batch_size: 10,
        };
        let config = WatcherConfig::from(&settings);

        assert_eq!(config.debounce_duration, Duration::from_millis(50));
        assert_eq!(config.batch_interval, Duration::from_millis(200));
        assert_eq!(config.max_batch_size, 10);
        assert!(config.coalesce_events);
    }
}
