// src/event_loop.rs

//! Shared single-threaded event loop.
//!
//! The hosting process owns one [`EventLoop`] and hands clones of it to every
//! notify context. Backends register their change sources (a native event
//! stream, a poll timer) as local tasks on it; the loop never spawns threads
//! of its own, and every source, callback, watch and release runs on the
//! thread driving [`EventLoop::run_until`].

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::rc::Rc;

use tokio::task::{JoinHandle, LocalSet};
use tracing::debug;

/// Identifier of a source registered on an [`EventLoop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceId(u64);

struct Source {
    name: String,
    task: JoinHandle<()>,
}

struct LoopInner {
    local: LocalSet,
    sources: RefCell<HashMap<SourceId, Source>>,
    next_id: Cell<u64>,
}

/// Cheap-to-clone handle to the shared loop.
#[derive(Clone)]
pub struct EventLoop {
    inner: Rc<LoopInner>,
}

impl fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sources = self.inner.sources.borrow();
        let names: Vec<&str> = sources.values().map(|s| s.name.as_str()).collect();
        f.debug_struct("EventLoop")
            .field("sources", &names)
            .finish_non_exhaustive()
    }
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLoop {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(LoopInner {
                local: LocalSet::new(),
                sources: RefCell::new(HashMap::new()),
                next_id: Cell::new(1),
            }),
        }
    }

    /// Register a change source. The future is polled only while the loop
    /// is being driven, and is dropped when the source is removed.
    pub fn add_source<F>(&self, name: impl Into<String>, source: F) -> SourceId
    where
        F: Future<Output = ()> + 'static,
    {
        let id = SourceId(self.inner.next_id.get());
        self.inner.next_id.set(id.0 + 1);

        let name = name.into();
        debug!(source = %name, ?id, "registering event loop source");
        let task = self.inner.local.spawn_local(source);
        self.inner.sources.borrow_mut().insert(id, Source { name, task });
        id
    }

    /// Deregister a source. Returns false if it was unknown.
    ///
    /// The source is aborted before it can be polled again; a source that is
    /// currently dispatching finishes its current callback only.
    pub fn remove_source(&self, id: SourceId) -> bool {
        let removed = self.inner.sources.borrow_mut().remove(&id);
        match removed {
            Some(source) => {
                debug!(source = %source.name, ?id, "removing event loop source");
                source.task.abort();
                true
            }
            None => false,
        }
    }

    /// Number of registered sources that are still running.
    pub fn source_count(&self) -> usize {
        let mut sources = self.inner.sources.borrow_mut();
        sources.retain(|_, s| !s.task.is_finished());
        sources.len()
    }

    /// Drive the loop until `future` completes.
    pub async fn run_until<F>(&self, future: F) -> F::Output
    where
        F: Future,
    {
        self.inner.local.run_until(future).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn sources_run_only_until_removed() {
        let ev = EventLoop::new();
        let ticks = Rc::new(Cell::new(0u32));

        let id = {
            let ticks = Rc::clone(&ticks);
            ev.add_source("ticker", async move {
                loop {
                    ticks.set(ticks.get() + 1);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            })
        };
        assert_eq!(ev.source_count(), 1);

        ev.run_until(async {
            tokio::time::sleep(Duration::from_millis(30)).await;
        })
        .await;
        assert!(ticks.get() > 0);

        assert!(ev.remove_source(id));
        assert!(!ev.remove_source(id));
        let frozen = ticks.get();
        ev.run_until(async {
            tokio::time::sleep(Duration::from_millis(30)).await;
        })
        .await;
        assert_eq!(ticks.get(), frozen);
        assert_eq!(ev.source_count(), 0);
    }
}
