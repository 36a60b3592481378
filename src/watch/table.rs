// src/watch/table.rs

//! Pure watch-table state.
//!
//! The table owns every active watch entry of one context and decides, for a
//! raw change record, which entries receive which normalized event. It holds
//! no channels or Tokio types and performs no IO, so routing is unit tested
//! directly.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use std::rc::Rc;

use crate::types::{Action, ChangeMask, NotifyEvent};
use crate::watch::path_utils::{overlaps, scoped_relative};

/// Callback invoked on the event loop for every event routed to an entry.
///
/// Per-watch private data is whatever the closure captures.
pub type Callback = Rc<dyn Fn(&NotifyEvent)>;

/// Opaque reference to one watch entry of one context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatchHandle {
    context: u64,
    id: u64,
}

impl fmt::Display for WatchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.context, self.id)
    }
}

/// An active subscription to changes under `root`.
#[derive(Clone)]
pub struct WatchEntry {
    /// Root as resolved by the backend (canonical for filesystem backends).
    pub root: PathBuf,
    pub mask: ChangeMask,
    pub recursive: bool,
    pub callback: Callback,
}

impl fmt::Debug for WatchEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchEntry")
            .field("root", &self.root)
            .field("mask", &self.mask)
            .field("recursive", &self.recursive)
            .finish_non_exhaustive()
    }
}

/// One record read from a native change source, before routing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawChange {
    Change { path: PathBuf, action: Action },
    /// The source dropped records. `area` narrows the loss to the roots that
    /// overlap it; `None` means every root fed by the source.
    Overflow { area: Option<PathBuf> },
}

impl RawChange {
    pub fn change(path: impl Into<PathBuf>, action: Action) -> Self {
        RawChange::Change {
            path: path.into(),
            action,
        }
    }

    pub fn overflow(area: Option<PathBuf>) -> Self {
        RawChange::Overflow { area }
    }
}

/// A routed event, not yet sequenced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub handle: WatchHandle,
    pub event: NotifyEvent,
}

/// Active entries of a single context, keyed by handle id.
///
/// Entries are kept in creation order so that routing of a single record is
/// deterministic across entries.
#[derive(Debug)]
pub struct WatchTable {
    context: u64,
    next_id: u64,
    entries: BTreeMap<u64, WatchEntry>,
}

impl WatchTable {
    pub fn new(context: u64) -> Self {
        Self {
            context,
            next_id: 1,
            entries: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert a new entry and return its handle. Ids are never reused, so a
    /// released handle can never resolve again.
    pub fn insert(&mut self, entry: WatchEntry) -> WatchHandle {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.insert(id, entry);
        WatchHandle {
            context: self.context,
            id,
        }
    }

    pub fn remove(&mut self, handle: WatchHandle) -> Option<WatchEntry> {
        if handle.context != self.context {
            return None;
        }
        self.entries.remove(&handle.id)
    }

    pub fn contains(&self, handle: WatchHandle) -> bool {
        handle.context == self.context && self.entries.contains_key(&handle.id)
    }

    pub fn get(&self, handle: WatchHandle) -> Option<&WatchEntry> {
        if handle.context != self.context {
            return None;
        }
        self.entries.get(&handle.id)
    }

    /// Remove every entry, in creation order.
    pub fn drain(&mut self) -> Vec<(WatchHandle, WatchEntry)> {
        let context = self.context;
        std::mem::take(&mut self.entries)
            .into_iter()
            .map(|(id, entry)| (WatchHandle { context, id }, entry))
            .collect()
    }

    /// Distinct roots with at least one active entry.
    pub fn roots(&self) -> BTreeSet<PathBuf> {
        self.entries.values().map(|e| e.root.clone()).collect()
    }

    /// Replace every `Overflow` record by one record per affected root, and
    /// drop repeated overflows of a root within the batch.
    ///
    /// However many records a source lost, each root sees a single overflow
    /// per batch, placed where the first loss was reported.
    pub fn collapse_overflows(&self, batch: Vec<RawChange>) -> Vec<RawChange> {
        let roots = self.roots();
        let mut seen: BTreeSet<PathBuf> = BTreeSet::new();
        let mut out = Vec::with_capacity(batch.len());

        for record in batch {
            match record {
                RawChange::Overflow { area } => {
                    for root in roots.iter() {
                        let affected = match &area {
                            Some(area) => overlaps(area, root),
                            None => true,
                        };
                        if affected && seen.insert(root.clone()) {
                            out.push(RawChange::Overflow {
                                area: Some(root.clone()),
                            });
                        }
                    }
                }
                change => out.push(change),
            }
        }

        out
    }

    /// Decide which entries receive `record`, in creation order.
    ///
    /// - A change reaches entries whose filter admits its action and whose
    ///   scope contains its path.
    /// - An overflow reaches every entry rooted at the root it names (every
    ///   entry when it names none), regardless of filter. Run batches through
    ///   [`collapse_overflows`](Self::collapse_overflows) first.
    pub fn route(&self, record: &RawChange) -> Vec<Delivery> {
        let context = self.context;
        let mut out = Vec::new();

        for (&id, entry) in self.entries.iter() {
            let event = match record {
                RawChange::Change { path, action } => {
                    if *action == Action::Overflow || !entry.mask.admits(*action) {
                        continue;
                    }
                    let Some(rel) = scoped_relative(&entry.root, path, entry.recursive) else {
                        continue;
                    };
                    NotifyEvent {
                        path: rel,
                        action: *action,
                        sequence: 0,
                        root: entry.root.clone(),
                    }
                }
                RawChange::Overflow { area } => {
                    // Collapsed overflows name exactly one root.
                    if area.as_ref().is_some_and(|root| *root != entry.root) {
                        continue;
                    }
                    NotifyEvent {
                        path: String::new(),
                        action: Action::Overflow,
                        sequence: 0,
                        root: entry.root.clone(),
                    }
                }
            };

            out.push(Delivery {
                handle: WatchHandle { context, id },
                event,
            });
        }

        out
    }
}
