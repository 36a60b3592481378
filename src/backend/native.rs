// src/backend/native.rs

//! Kernel change-queue backend built on the `notify` crate.
//!
//! One `RecommendedWatcher` serves a whole context. Its callback runs on the
//! watcher's own reader and only forwards raw events into a bounded channel;
//! translation and dispatch happen in a source on the shared event loop.
//! When the channel is full the event is dropped and an overflow flag is
//! raised, which the loop turns into one overflow per watched root.
//!
//! A loss burst is reported once. After an overflow covering every root the
//! source discards whatever the reader still delivers, further drops
//! included, until the queue has stayed empty for [`OVERFLOW_QUIET`].

use std::path::{Path, PathBuf};
use std::rc::Weak;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use notify::event::{ModifyKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

use crate::backend::{
    resolve_root, usize_option, BackendInit, BackendOptions, NotifyBackend, SubscriptionChange,
    Subscriptions,
};
use crate::errors::{NotifyError, Result};
use crate::event_loop::{EventLoop, SourceId};
use crate::fs::RealFileSystem;
use crate::types::{Action, ChangeMask};
use crate::watch::{Dispatcher, RawChange};

/// Raw events buffered between the native reader and the loop by default.
pub const DEFAULT_QUEUE_CAPACITY: usize = 4096;

/// How long the raw queue must stay empty before a reported loss burst is
/// considered over.
pub const OVERFLOW_QUIET: Duration = Duration::from_millis(100);

// EMFILE / ENFILE share these values on Linux and macOS.
const EMFILE: i32 = 24;
const ENFILE: i32 = 23;

/// Tuning for the native backend.
///
/// Scope options `queue_capacity` and `max_watches` override these values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeConfig {
    pub queue_capacity: usize,
    /// Cap on distinct native roots per context; `None` leaves the limit to
    /// the kernel.
    pub max_watches: Option<usize>,
}

impl Default for NativeConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            max_watches: None,
        }
    }
}

impl NativeConfig {
    pub fn with_options(&self, options: &BackendOptions) -> Result<Self> {
        let mut config = self.clone();
        if let Some(capacity) = usize_option(options, "queue_capacity")? {
            config.queue_capacity = capacity;
        }
        if let Some(max) = usize_option(options, "max_watches")? {
            config.max_watches = Some(max);
        }
        if config.queue_capacity == 0 {
            return Err(NotifyError::Config(
                "native queue_capacity must be >= 1 (got 0)".to_string(),
            ));
        }
        Ok(config)
    }
}

pub struct NativeBackend {
    watcher: Option<RecommendedWatcher>,
    subs: Subscriptions,
    event_loop: EventLoop,
    source: Option<SourceId>,
    config: NativeConfig,
    fs: RealFileSystem,
}

impl std::fmt::Debug for NativeBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeBackend")
            .field("subs", &self.subs)
            .field("source", &self.source)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl NativeBackend {
    pub fn initialize(config: &NativeConfig, init: BackendInit<'_>) -> Result<Self> {
        let config = config.with_options(init.options)?;

        let (tx, rx) = mpsc::channel::<notify::Result<Event>>(config.queue_capacity);
        let dropped = Arc::new(AtomicBool::new(false));

        // Closure called by notify on its reader for every raw event.
        let watcher = RecommendedWatcher::new(
            {
                let dropped = Arc::clone(&dropped);
                move |res: notify::Result<Event>| match tx.try_send(res) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => dropped.store(true, Ordering::Release),
                    Err(TrySendError::Closed(_)) => {}
                }
            },
            Config::default(),
        )
        .map_err(|e| NotifyError::NotSupported(format!("kernel change queue unavailable: {e}")))?;

        let source = init.event_loop.add_source(
            "native",
            pump_events(rx, dropped, init.dispatcher, config.queue_capacity),
        );

        info!(queue_capacity = config.queue_capacity, "native change queue initialised");

        Ok(Self {
            watcher: Some(watcher),
            subs: Subscriptions::new(),
            event_loop: init.event_loop.clone(),
            source: Some(source),
            config,
            fs: RealFileSystem,
        })
    }
}

impl NotifyBackend for NativeBackend {
    fn watch(&mut self, path: &Path, _mask: ChangeMask, recursive: bool) -> Result<PathBuf> {
        let Some(watcher) = self.watcher.as_mut() else {
            return Err(NotifyError::NotSupported("native backend is shut down".to_string()));
        };

        let root = resolve_root(&self.fs, path)?;

        if !self.subs.contains(&root) {
            if let Some(max) = self.config.max_watches {
                if self.subs.len() >= max {
                    return Err(NotifyError::ResourceExhausted(format!(
                        "native watch limit of {max} roots reached"
                    )));
                }
            }
        }

        match self.subs.add(&root, recursive) {
            SubscriptionChange::Added { recursive } => {
                if let Err(err) = watcher.watch(&root, mode(recursive)) {
                    self.subs.remove(&root, recursive);
                    return Err(translate_error(err, &root));
                }
                debug!(?root, recursive, "native subscription added");
            }
            SubscriptionChange::ModeChanged { recursive } => {
                if let Err(err) = rewatch(watcher, &root, recursive) {
                    self.subs.remove(&root, recursive);
                    if let Err(restore) = watcher.watch(&root, mode(!recursive)) {
                        warn!(?root, error = %restore, "failed to restore native subscription");
                    }
                    return Err(translate_error(err, &root));
                }
                debug!(?root, recursive, "native subscription mode changed");
            }
            SubscriptionChange::Removed | SubscriptionChange::Unchanged => {}
        }

        Ok(root)
    }

    fn unwatch(&mut self, root: &Path, recursive: bool) {
        let change = self.subs.remove(root, recursive);
        let Some(watcher) = self.watcher.as_mut() else {
            return;
        };

        match change {
            SubscriptionChange::Removed => {
                if let Err(err) = watcher.unwatch(root) {
                    debug!(?root, error = %err, "native unwatch failed (root likely gone)");
                }
                debug!(?root, "native subscription removed");
            }
            SubscriptionChange::ModeChanged { recursive } => {
                if let Err(err) = rewatch(watcher, root, recursive) {
                    warn!(?root, error = %err, "failed to narrow native subscription");
                }
            }
            SubscriptionChange::Added { .. } | SubscriptionChange::Unchanged => {}
        }
    }

    fn native_resources(&self) -> usize {
        self.subs.len() + usize::from(self.source.is_some())
    }

    fn shutdown(&mut self) {
        if let Some(mut watcher) = self.watcher.take() {
            for root in self.subs.clear() {
                if let Err(err) = watcher.unwatch(&root) {
                    debug!(?root, error = %err, "native unwatch failed during shutdown");
                }
            }
        }
        if let Some(source) = self.source.take() {
            self.event_loop.remove_source(source);
        }
        info!("native backend shut down");
    }
}

fn mode(recursive: bool) -> RecursiveMode {
    if recursive {
        RecursiveMode::Recursive
    } else {
        RecursiveMode::NonRecursive
    }
}

fn rewatch(watcher: &mut RecommendedWatcher, root: &Path, recursive: bool) -> notify::Result<()> {
    if let Err(err) = watcher.unwatch(root) {
        debug!(?root, error = %err, "unwatch before mode change failed");
    }
    watcher.watch(root, mode(recursive))
}

/// Drain the raw channel one batch at a time and hand batches to the
/// dispatcher. Each batch is bounded by what is queued when it starts.
async fn pump_events(
    mut rx: mpsc::Receiver<notify::Result<Event>>,
    dropped: Arc<AtomicBool>,
    dispatcher: Weak<Dispatcher>,
    max_batch: usize,
) {
    let mut latch = OverflowLatch::default();
    loop {
        let next = if latch.is_latched() {
            match tokio::time::timeout(OVERFLOW_QUIET, rx.recv()).await {
                Ok(next) => next,
                Err(_) => {
                    if !dropped.swap(false, Ordering::AcqRel) {
                        debug!("native change queue caught up after overflow");
                        latch.clear();
                    }
                    continue;
                }
            }
        } else {
            rx.recv().await
        };
        let Some(first) = next else {
            break;
        };

        let mut batch = translate_result(first);
        for _ in 1..max_batch {
            match rx.try_recv() {
                Ok(next) => batch.extend(translate_result(next)),
                Err(_) => break,
            }
        }

        let lost = dropped.swap(false, Ordering::AcqRel);
        let batch = latch.admit(batch, lost);
        if batch.is_empty() {
            continue;
        }

        let Some(dispatcher) = dispatcher.upgrade() else {
            break;
        };
        dispatcher.dispatch_batch(batch);
    }
    debug!("native change stream closed");
}

/// Turns one loss burst into a single overflow.
///
/// Latched by the first batch that carries an overflow of every root; while
/// latched, batches are discarded whole since the receivers resynchronise
/// anyway.
#[derive(Debug, Default)]
struct OverflowLatch {
    latched: bool,
}

impl OverflowLatch {
    fn is_latched(&self) -> bool {
        self.latched
    }

    fn clear(&mut self) {
        self.latched = false;
    }

    fn admit(&mut self, mut batch: Vec<RawChange>, lost: bool) -> Vec<RawChange> {
        if self.latched {
            return Vec::new();
        }
        if lost {
            warn!("native change queue full; raw events were dropped");
            batch.push(RawChange::overflow(None));
        }
        if batch
            .iter()
            .any(|record| matches!(record, RawChange::Overflow { area: None }))
        {
            self.latched = true;
        }
        batch
    }
}

fn translate_result(res: notify::Result<Event>) -> Vec<RawChange> {
    match res {
        Ok(event) => translate(event),
        Err(err) => {
            // Whatever the reader failed on is lost; treat it as overflow.
            warn!(error = %err, "native change source reported an error");
            vec![RawChange::overflow(err.paths.first().cloned())]
        }
    }
}

/// Translate one `notify` event into raw records.
pub fn translate(event: Event) -> Vec<RawChange> {
    if event.need_rescan() {
        return vec![RawChange::overflow(event.paths.into_iter().next())];
    }

    let action = match event.kind {
        EventKind::Create(_) => Action::Created,
        EventKind::Remove(_) => Action::Deleted,
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => Action::RenamedFrom,
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => Action::RenamedTo,
        // Both halves were already reported individually.
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => return Vec::new(),
        EventKind::Modify(ModifyKind::Name(_)) => {
            // Unpaired rename: the side that still exists is the new name.
            return event
                .paths
                .into_iter()
                .map(|path| {
                    let action = if path.exists() {
                        Action::RenamedTo
                    } else {
                        Action::RenamedFrom
                    };
                    RawChange::change(path, action)
                })
                .collect();
        }
        EventKind::Modify(_) | EventKind::Any => Action::Modified,
        EventKind::Access(_) | EventKind::Other => return Vec::new(),
    };

    event
        .paths
        .into_iter()
        .map(|path| RawChange::change(path, action))
        .collect()
}

fn translate_error(err: notify::Error, root: &Path) -> NotifyError {
    match err.kind {
        notify::ErrorKind::MaxFilesWatch => {
            NotifyError::ResourceExhausted("kernel watch table is full".to_string())
        }
        notify::ErrorKind::PathNotFound => NotifyError::path_unavailable(root, "no such directory"),
        notify::ErrorKind::Io(ref io) => match (io.kind(), io.raw_os_error()) {
            (_, Some(EMFILE | ENFILE)) | (std::io::ErrorKind::StorageFull, _) => {
                NotifyError::ResourceExhausted(io.to_string())
            }
            (std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied, _) => {
                NotifyError::path_unavailable(root, io.to_string())
            }
            _ => NotifyError::NotSupported(io.to_string()),
        },
        _ => NotifyError::NotSupported(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, Flag, RemoveKind};

    fn event(kind: EventKind, path: &str) -> Event {
        Event::new(kind).add_path(PathBuf::from(path))
    }

    #[test]
    fn translates_basic_kinds() {
        assert_eq!(
            translate(event(EventKind::Create(CreateKind::File), "/d/a")),
            vec![RawChange::change("/d/a", Action::Created)]
        );
        assert_eq!(
            translate(event(EventKind::Remove(RemoveKind::File), "/d/a")),
            vec![RawChange::change("/d/a", Action::Deleted)]
        );
        assert_eq!(
            translate(event(EventKind::Modify(ModifyKind::Data(DataChange::Content)), "/d/a")),
            vec![RawChange::change("/d/a", Action::Modified)]
        );
    }

    #[test]
    fn rename_halves_map_and_pairs_are_skipped() {
        assert_eq!(
            translate(event(EventKind::Modify(ModifyKind::Name(RenameMode::From)), "/d/old")),
            vec![RawChange::change("/d/old", Action::RenamedFrom)]
        );
        assert_eq!(
            translate(event(EventKind::Modify(ModifyKind::Name(RenameMode::To)), "/d/new")),
            vec![RawChange::change("/d/new", Action::RenamedTo)]
        );
        let both = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path(PathBuf::from("/d/old"))
            .add_path(PathBuf::from("/d/new"));
        assert!(translate(both).is_empty());
    }

    #[test]
    fn rescan_flag_becomes_overflow() {
        let ev = Event::new(EventKind::Other).set_flag(Flag::Rescan);
        assert_eq!(translate(ev), vec![RawChange::overflow(None)]);
    }

    #[test]
    fn access_events_are_ignored() {
        let ev = event(EventKind::Access(notify::event::AccessKind::Read), "/d/a");
        assert!(translate(ev).is_empty());
    }

    #[test]
    fn errors_translate_into_taxonomy() {
        let root = Path::new("/d");
        assert!(matches!(
            translate_error(notify::Error::new(notify::ErrorKind::MaxFilesWatch), root),
            NotifyError::ResourceExhausted(_)
        ));
        assert!(matches!(
            translate_error(notify::Error::path_not_found(), root),
            NotifyError::PathUnavailable { .. }
        ));
        assert!(matches!(
            translate_error(notify::Error::generic("boom"), root),
            NotifyError::NotSupported(_)
        ));
    }

    #[test]
    fn overflow_latch_reports_a_burst_once() {
        let mut latch = OverflowLatch::default();
        let created = || vec![RawChange::change("/d/a", Action::Created)];

        assert_eq!(latch.admit(created(), false), created());
        assert!(!latch.is_latched());

        let first = latch.admit(created(), true);
        assert_eq!(first.last(), Some(&RawChange::overflow(None)));
        assert!(latch.is_latched());

        assert!(latch.admit(created(), true).is_empty());
        assert!(latch.admit(vec![RawChange::overflow(None)], false).is_empty());
        assert!(latch.admit(created(), false).is_empty());

        latch.clear();
        assert_eq!(latch.admit(created(), false), created());
    }

    #[test]
    fn scoped_overflow_does_not_latch() {
        let mut latch = OverflowLatch::default();
        let scoped = vec![RawChange::overflow(Some(PathBuf::from("/d/sub")))];
        assert_eq!(latch.admit(scoped.clone(), false), scoped);
        assert!(!latch.is_latched());

        latch.admit(vec![RawChange::overflow(None)], false);
        assert!(latch.is_latched());
    }

    #[test]
    fn options_override_defaults() {
        let mut options = BackendOptions::new();
        options.insert("queue_capacity".into(), "16".into());
        options.insert("max_watches".into(), "2".into());
        let config = NativeConfig::default().with_options(&options).unwrap();
        assert_eq!(config.queue_capacity, 16);
        assert_eq!(config.max_watches, Some(2));

        options.insert("queue_capacity".into(), "0".into());
        assert!(NativeConfig::default().with_options(&options).is_err());
    }
}
