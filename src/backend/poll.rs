// src/backend/poll.rs

//! Polling fallback backend.
//!
//! On every tick of a loop timer each watched root is snapshotted (entry
//! path → type, length, modification time) and diffed against the previous
//! snapshot to synthesize `Deleted`, `Created` and `Modified` records, in
//! that order and in path order within each kind.
//!
//! Two opposite changes to the same path within one interval (create then
//! delete, or a rewrite that restores length and timestamp) cancel out and
//! produce no event. That is the price of polling, not a bug.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::rc::{Rc, Weak};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::backend::{
    resolve_root, usize_option, BackendInit, BackendOptions, NotifyBackend, SubscriptionChange,
    Subscriptions,
};
use crate::config::parse_duration;
use crate::errors::{NotifyError, Result};
use crate::event_loop::{EventLoop, SourceId};
use crate::fs::{EntryStat, FileSystem, RealFileSystem};
use crate::types::{Action, ChangeMask};
use crate::watch::{Dispatcher, RawChange};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Tuning for the polling backend.
///
/// Scope options `poll_interval` (duration string) and `max_roots` override
/// these values.
#[derive(Debug, Clone)]
pub struct PollConfig {
    pub interval: Duration,
    pub max_roots: Option<usize>,
    pub fs: Arc<dyn FileSystem>,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL)
    }
}

impl PollConfig {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            max_roots: None,
            fs: Arc::new(RealFileSystem),
        }
    }

    /// Snapshot through `fs` instead of the real filesystem.
    pub fn with_filesystem(mut self, fs: Arc<dyn FileSystem>) -> Self {
        self.fs = fs;
        self
    }

    pub fn with_options(&self, options: &BackendOptions) -> Result<Self> {
        let mut config = self.clone();
        if let Some(raw) = options.get("poll_interval") {
            config.interval = parse_duration(raw).map_err(|e| {
                NotifyError::Config(format!("invalid value for option 'poll_interval': {e}"))
            })?;
        }
        if let Some(max) = usize_option(options, "max_roots")? {
            config.max_roots = Some(max);
        }
        if config.interval.is_zero() {
            return Err(NotifyError::Config("poll_interval must be greater than zero".to_string()));
        }
        Ok(config)
    }
}

type Snapshot = BTreeMap<PathBuf, EntryStat>;

#[derive(Debug)]
struct RootState {
    snapshot: Snapshot,
    recursive: bool,
    readable: bool,
}

#[derive(Debug)]
struct PollState {
    subs: Subscriptions,
    roots: BTreeMap<PathBuf, RootState>,
    fs: Arc<dyn FileSystem>,
}

impl PollState {
    fn new(fs: Arc<dyn FileSystem>) -> Self {
        Self {
            subs: Subscriptions::new(),
            roots: BTreeMap::new(),
            fs,
        }
    }

    /// Snapshot the current state of every root and diff against the last.
    fn scan(&mut self) -> Vec<RawChange> {
        let mut changes = Vec::new();

        for (root, state) in self.roots.iter_mut() {
            match take_snapshot(self.fs.as_ref(), root, state.recursive) {
                Ok(next) => {
                    changes.extend(diff(&state.snapshot, &next));
                    state.snapshot = next;
                    if !state.readable {
                        info!(?root, "polled root readable again");
                    }
                    state.readable = true;
                }
                Err(err) => {
                    // The last snapshot is kept; receivers learn their view is stale.
                    if state.readable {
                        warn!(?root, error = %format!("{err:#}"), "polled root unreadable");
                        changes.push(RawChange::overflow(Some(root.clone())));
                    }
                    state.readable = false;
                }
            }
        }

        changes
    }
}

/// Walk `root` to depth 1, or fully when `recursive`.
///
/// Entries that vanish between listing and stat are skipped; they will show
/// up as deletions on the next tick if they were known before.
fn take_snapshot(fs: &dyn FileSystem, root: &Path, recursive: bool) -> anyhow::Result<Snapshot> {
    let mut snapshot = Snapshot::new();
    let mut stack = vec![root.to_path_buf()];
    let mut first = true;

    while let Some(dir) = stack.pop() {
        let children = match fs.read_dir(&dir) {
            Ok(children) => children,
            Err(err) if first => return Err(err),
            Err(err) => {
                debug!(?dir, error = %err, "skipping unreadable subdirectory");
                continue;
            }
        };
        first = false;

        for path in children {
            let Ok(stat) = fs.stat(&path) else {
                continue;
            };
            if recursive && stat.is_dir {
                stack.push(path.clone());
            }
            snapshot.insert(path, stat);
        }
    }

    Ok(snapshot)
}

fn diff(prev: &Snapshot, next: &Snapshot) -> Vec<RawChange> {
    let mut deleted = Vec::new();
    let mut created = Vec::new();
    let mut modified = Vec::new();

    for (path, old) in prev.iter() {
        match next.get(path) {
            None => deleted.push(path),
            Some(new) if new.is_dir != old.is_dir => {
                deleted.push(path);
                created.push(path);
            }
            // Directory timestamps move with their children; those changes
            // are reported on the children themselves.
            Some(new) if !new.is_dir && (new.len != old.len || new.modified != old.modified) => {
                modified.push(path)
            }
            Some(_) => {}
        }
    }
    for path in next.keys() {
        if !prev.contains_key(path) {
            created.push(path);
        }
    }
    created.sort();

    let mut changes = Vec::with_capacity(deleted.len() + created.len() + modified.len());
    for (paths, action) in [
        (deleted, Action::Deleted),
        (created, Action::Created),
        (modified, Action::Modified),
    ] {
        changes.extend(paths.into_iter().map(|p| RawChange::change(p.clone(), action)));
    }
    changes
}

fn depth(root: &Path, path: &Path) -> usize {
    path.strip_prefix(root)
        .map(|rel| rel.components().count())
        .unwrap_or(0)
}

pub struct PollBackend {
    state: Rc<RefCell<PollState>>,
    event_loop: EventLoop,
    source: Option<SourceId>,
    config: PollConfig,
}

impl std::fmt::Debug for PollBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollBackend")
            .field("interval", &self.config.interval)
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

impl PollBackend {
    pub fn initialize(config: &PollConfig, init: BackendInit<'_>) -> Result<Self> {
        let config = config.with_options(init.options)?;
        let state = Rc::new(RefCell::new(PollState::new(Arc::clone(&config.fs))));

        let source = init.event_loop.add_source(
            "poll",
            poll_loop(Rc::downgrade(&state), init.dispatcher, config.interval),
        );

        info!(interval = ?config.interval, "polling backend initialised");

        Ok(Self {
            state,
            event_loop: init.event_loop.clone(),
            source: Some(source),
            config,
        })
    }
}

impl NotifyBackend for PollBackend {
    fn watch(&mut self, path: &Path, _mask: ChangeMask, recursive: bool) -> Result<PathBuf> {
        if self.source.is_none() {
            return Err(NotifyError::NotSupported("polling backend is shut down".to_string()));
        }

        let mut state = self.state.borrow_mut();
        let root = resolve_root(state.fs.as_ref(), path)?;

        if !state.subs.contains(&root) {
            if let Some(max) = self.config.max_roots {
                if state.subs.len() >= max {
                    return Err(NotifyError::ResourceExhausted(format!(
                        "polling limit of {max} roots reached"
                    )));
                }
            }
        }

        match state.subs.add(&root, recursive) {
            SubscriptionChange::Added { recursive } => {
                match take_snapshot(state.fs.as_ref(), &root, recursive) {
                    Ok(snapshot) => {
                        state.roots.insert(
                            root.clone(),
                            RootState {
                                snapshot,
                                recursive,
                                readable: true,
                            },
                        );
                        debug!(?root, recursive, "polled root added");
                    }
                    Err(err) => {
                        state.subs.remove(&root, recursive);
                        return Err(NotifyError::path_unavailable(&root, format!("{err:#}")));
                    }
                }
            }
            SubscriptionChange::ModeChanged { .. } => {
                // Deepen the snapshot without touching the top level, so
                // changes already pending there are still reported.
                let deep = match take_snapshot(state.fs.as_ref(), &root, true) {
                    Ok(deep) => deep,
                    Err(err) => {
                        // Without a nested baseline every existing entry
                        // would later surface as created.
                        state.subs.remove(&root, true);
                        return Err(NotifyError::path_unavailable(&root, format!("{err:#}")));
                    }
                };
                if let Some(root_state) = state.roots.get_mut(&root) {
                    root_state.recursive = true;
                    for (path, stat) in deep {
                        if depth(&root, &path) > 1 {
                            root_state.snapshot.insert(path, stat);
                        }
                    }
                }
                debug!(?root, "polled root now recursive");
            }
            SubscriptionChange::Removed | SubscriptionChange::Unchanged => {}
        }

        Ok(root)
    }

    fn unwatch(&mut self, root: &Path, recursive: bool) {
        let mut state = self.state.borrow_mut();
        match state.subs.remove(root, recursive) {
            SubscriptionChange::Removed => {
                state.roots.remove(root);
                debug!(?root, "polled root removed");
            }
            SubscriptionChange::ModeChanged { .. } => {
                if let Some(root_state) = state.roots.get_mut(root) {
                    root_state.recursive = false;
                    root_state.snapshot.retain(|path, _| depth(root, path) <= 1);
                }
            }
            SubscriptionChange::Added { .. } | SubscriptionChange::Unchanged => {}
        }
    }

    fn native_resources(&self) -> usize {
        self.state.borrow().subs.len() + usize::from(self.source.is_some())
    }

    fn shutdown(&mut self) {
        {
            let mut state = self.state.borrow_mut();
            state.subs.clear();
            state.roots.clear();
        }
        if let Some(source) = self.source.take() {
            self.event_loop.remove_source(source);
        }
        info!("polling backend shut down");
    }
}

async fn poll_loop(state: Weak<RefCell<PollState>>, dispatcher: Weak<Dispatcher>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; baselines are taken at watch time.
    ticker.tick().await;

    loop {
        ticker.tick().await;

        let Some(state) = state.upgrade() else {
            break;
        };
        let batch = state.borrow_mut().scan();
        drop(state);

        if batch.is_empty() {
            continue;
        }
        let Some(dispatcher) = dispatcher.upgrade() else {
            break;
        };
        dispatcher.dispatch_batch(batch);
    }
    debug!("poll loop finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::mock::MockFileSystem;

    fn stat(len: u64, secs: u64) -> EntryStat {
        EntryStat {
            is_dir: false,
            len,
            modified: std::time::SystemTime::UNIX_EPOCH.checked_add(Duration::from_secs(secs)),
        }
    }

    #[test]
    fn diff_orders_deletes_creates_then_modifications() {
        let mut prev = Snapshot::new();
        prev.insert(PathBuf::from("/d/a"), stat(1, 1));
        prev.insert(PathBuf::from("/d/b"), stat(1, 1));
        let mut next = Snapshot::new();
        next.insert(PathBuf::from("/d/b"), stat(2, 2));
        next.insert(PathBuf::from("/d/c"), stat(1, 1));

        assert_eq!(
            diff(&prev, &next),
            vec![
                RawChange::change("/d/a", Action::Deleted),
                RawChange::change("/d/c", Action::Created),
                RawChange::change("/d/b", Action::Modified),
            ]
        );
    }

    #[test]
    fn snapshot_depth_follows_recursion() {
        let fs = MockFileSystem::new();
        fs.write_file("/d/a", b"a");
        fs.write_file("/d/sub/b", b"b");

        let flat = take_snapshot(&fs, Path::new("/d"), false).unwrap();
        assert_eq!(flat.len(), 2);
        let deep = take_snapshot(&fs, Path::new("/d"), true).unwrap();
        assert_eq!(deep.len(), 3);
        assert!(deep.contains_key(Path::new("/d/sub/b")));
    }

    #[test]
    fn unreadable_root_overflows_once() {
        let fs = Arc::new(MockFileSystem::new());
        fs.add_dir("/d");
        let mut state = PollState::new(fs.clone());
        state.roots.insert(
            PathBuf::from("/d"),
            RootState {
                snapshot: Snapshot::new(),
                recursive: false,
                readable: true,
            },
        );

        fs.set_unreadable("/d", true);
        assert_eq!(state.scan(), vec![RawChange::overflow(Some(PathBuf::from("/d")))]);
        assert!(state.scan().is_empty());

        fs.set_unreadable("/d", false);
        fs.write_file("/d/new", b"x");
        assert_eq!(state.scan(), vec![RawChange::change("/d/new", Action::Created)]);
    }

    #[test]
    fn zero_interval_is_rejected() {
        let mut options = BackendOptions::new();
        options.insert("poll_interval".into(), "0ms".into());
        assert!(PollConfig::default().with_options(&options).is_err());

        options.insert("poll_interval".into(), "100ms".into());
        let config = PollConfig::default().with_options(&options).unwrap();
        assert_eq!(config.interval, Duration::from_millis(100));
    }
}
