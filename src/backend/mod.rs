// src/backend/mod.rs

//! Pluggable change-detection backends.
//!
//! A context talks to a [`NotifyBackend`] instead of any OS facility. This
//! makes it easy to swap in the stub backend in tests while keeping the
//! kernel-queue and polling implementations for production.
//!
//! - [`native`] subscribes through the `notify` crate (inotify, FSEvents,
//!   ReadDirectoryChangesW) and forwards its event stream onto the loop.
//! - [`poll`] snapshots watched roots on a loop timer and diffs them.
//! - [`stub`] has no OS resources; tests inject raw records through a
//!   [`StubController`](stub::StubController).
//!
//! Backends feed raw records to the context's
//! [`Dispatcher`](crate::watch::Dispatcher) from a source registered on the
//! shared [`EventLoop`](crate::event_loop::EventLoop).

pub mod native;
pub mod poll;
pub mod stub;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::rc::Weak;

use crate::errors::{NotifyError, Result};
use crate::event_loop::EventLoop;
use crate::fs::{is_not_found, FileSystem};
use crate::types::ChangeMask;
use crate::watch::Dispatcher;

pub use native::NativeConfig;
pub use poll::PollConfig;
pub use stub::StubController;

/// Backend-specific tuning, passed through opaquely from the owning scope.
pub type BackendOptions = BTreeMap<String, String>;

/// Everything a backend needs to initialise for one context.
#[derive(Debug)]
pub struct BackendInit<'a> {
    pub event_loop: &'a EventLoop,
    pub dispatcher: Weak<Dispatcher>,
    pub options: &'a BackendOptions,
}

/// Per-context backend instance.
///
/// The instance owns all native resources of the context (watch
/// descriptors, loop sources) and releases them exactly once, on `unwatch`
/// of the last entry needing them or on `shutdown`.
pub trait NotifyBackend {
    /// Establish or extend a native subscription covering `path`.
    ///
    /// Returns the resolved root that events will be reported against.
    fn watch(&mut self, path: &Path, mask: ChangeMask, recursive: bool) -> Result<PathBuf>;

    /// Drop one entry's claim on `root`; the native subscription is torn
    /// down once no entry needs it.
    fn unwatch(&mut self, root: &Path, recursive: bool);

    /// Native subscriptions plus loop sources currently held.
    fn native_resources(&self) -> usize;

    /// Free all native state and deregister loop sources. Idempotent.
    fn shutdown(&mut self);
}

/// How a claim changed the native subscription of a root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionChange {
    /// First claim on the root; subscribe with this mode.
    Added { recursive: bool },
    /// Existing subscription must switch mode.
    ModeChanged { recursive: bool },
    /// Last claim released; unsubscribe.
    Removed,
    Unchanged,
}

#[derive(Debug, Default, Clone, Copy)]
struct RootClaims {
    flat: usize,
    recursive: usize,
}

impl RootClaims {
    fn total(&self) -> usize {
        self.flat + self.recursive
    }
}

/// Reference counts of entries per native root.
///
/// One native subscription serves every entry on the same root; it is
/// recursive while at least one of those entries is.
#[derive(Debug, Default)]
pub struct Subscriptions {
    roots: BTreeMap<PathBuf, RootClaims>,
}

impl Subscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.roots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    pub fn contains(&self, root: &Path) -> bool {
        self.roots.contains_key(root)
    }

    pub fn add(&mut self, root: &Path, recursive: bool) -> SubscriptionChange {
        let claims = self.roots.entry(root.to_path_buf()).or_default();
        let was_new = claims.total() == 0;
        let was_recursive = claims.recursive > 0;

        if recursive {
            claims.recursive += 1;
        } else {
            claims.flat += 1;
        }

        if was_new {
            SubscriptionChange::Added { recursive }
        } else if recursive && !was_recursive {
            SubscriptionChange::ModeChanged { recursive: true }
        } else {
            SubscriptionChange::Unchanged
        }
    }

    pub fn remove(&mut self, root: &Path, recursive: bool) -> SubscriptionChange {
        let Some(claims) = self.roots.get_mut(root) else {
            return SubscriptionChange::Unchanged;
        };

        if recursive {
            claims.recursive = claims.recursive.saturating_sub(1);
        } else {
            claims.flat = claims.flat.saturating_sub(1);
        }

        if claims.total() == 0 {
            self.roots.remove(root);
            SubscriptionChange::Removed
        } else if recursive && claims.recursive == 0 {
            SubscriptionChange::ModeChanged { recursive: false }
        } else {
            SubscriptionChange::Unchanged
        }
    }

    /// Forget every root, returning them.
    pub fn clear(&mut self) -> Vec<PathBuf> {
        std::mem::take(&mut self.roots).into_keys().collect()
    }
}

/// Resolve a watch path to a canonical directory root.
pub fn resolve_root(fs: &dyn FileSystem, path: &Path) -> Result<PathBuf> {
    let root = fs.canonicalize(path).map_err(|err| {
        if is_not_found(&err) {
            NotifyError::path_unavailable(path, "no such directory")
        } else {
            NotifyError::path_unavailable(path, format!("{err:#}"))
        }
    })?;

    let stat = fs
        .stat(&root)
        .map_err(|err| NotifyError::path_unavailable(path, format!("{err:#}")))?;
    if !stat.is_dir {
        return Err(NotifyError::NotSupported(format!(
            "{} is not a directory",
            root.display()
        )));
    }

    Ok(root)
}

/// Parse an optional numeric backend option.
pub(crate) fn usize_option(options: &BackendOptions, key: &str) -> Result<Option<usize>> {
    match options.get(key) {
        None => Ok(None),
        Some(raw) => raw.trim().parse::<usize>().map(Some).map_err(|e| {
            NotifyError::Config(format!("invalid value for option '{key}': {raw} ({e})"))
        }),
    }
}
