// src/watch/dispatch.rs

//! Event dispatcher.
//!
//! Backend sources hand raw batches to [`Dispatcher::dispatch_batch`] from a
//! task running on the context's [`EventLoop`](crate::event_loop::EventLoop).
//! Callbacks therefore always run on the loop's single execution context, and
//! the table borrow is released before each callback so that a callback may
//! watch, release or destroy through its context.

use std::cell::{Cell, RefCell};
use std::fmt;

use tracing::{debug, warn};

use crate::types::Action;
use crate::watch::table::{RawChange, WatchEntry, WatchHandle, WatchTable};

/// Shared between a context and the sources its backend registered.
pub struct Dispatcher {
    table: RefCell<WatchTable>,
    sequence: Cell<u64>,
    delivered: Cell<u64>,
    overflows: Cell<u64>,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("sequence", &self.sequence.get())
            .field("delivered", &self.delivered.get())
            .field("overflows", &self.overflows.get())
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    pub fn new(context: u64) -> Self {
        Self {
            table: RefCell::new(WatchTable::new(context)),
            sequence: Cell::new(0),
            delivered: Cell::new(0),
            overflows: Cell::new(0),
        }
    }

    pub fn insert(&self, entry: WatchEntry) -> WatchHandle {
        self.table.borrow_mut().insert(entry)
    }

    pub fn remove(&self, handle: WatchHandle) -> Option<WatchEntry> {
        self.table.borrow_mut().remove(handle)
    }

    pub fn drain(&self) -> Vec<(WatchHandle, WatchEntry)> {
        self.table.borrow_mut().drain()
    }

    pub fn active_watches(&self) -> usize {
        self.table.borrow().len()
    }

    pub fn is_active(&self, handle: WatchHandle) -> bool {
        self.table.borrow().contains(handle)
    }

    /// Events delivered so far, overflows included.
    pub fn delivered(&self) -> u64 {
        self.delivered.get()
    }

    pub fn overflows(&self) -> u64 {
        self.overflows.get()
    }

    /// Route one batch of raw records and invoke callbacks in record order.
    ///
    /// Liveness is re-checked right before each callback: an entry released
    /// by an earlier callback of the same batch receives nothing further.
    /// Returns the number of callbacks invoked.
    pub fn dispatch_batch(&self, batch: Vec<RawChange>) -> usize {
        if batch.is_empty() {
            return 0;
        }

        let records = self.table.borrow().collapse_overflows(batch);
        let mut invoked = 0;

        for record in records {
            let deliveries = self.table.borrow().route(&record);
            if deliveries.is_empty() {
                debug!(?record, "raw change matched no watch entry");
                continue;
            }

            for delivery in deliveries {
                let callback = match self.table.borrow().get(delivery.handle) {
                    Some(entry) => entry.callback.clone(),
                    None => {
                        debug!(handle = %delivery.handle, "entry released mid-batch; skipping");
                        continue;
                    }
                };

                let mut event = delivery.event;
                event.sequence = self.next_sequence();
                if event.action == Action::Overflow {
                    warn!(
                        handle = %delivery.handle,
                        root = ?event.root,
                        "change source overflowed; receiver must rescan"
                    );
                    self.overflows.set(self.overflows.get() + 1);
                } else {
                    debug!(
                        handle = %delivery.handle,
                        action = %event.action,
                        path = %event.path,
                        sequence = event.sequence,
                        "dispatching change"
                    );
                }

                callback(&event);
                self.delivered.set(self.delivered.get() + 1);
                invoked += 1;
            }
        }

        invoked
    }

    fn next_sequence(&self) -> u64 {
        let next = self.sequence.get() + 1;
        self.sequence.set(next);
        next
    }
}
