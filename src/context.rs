// src/context.rs

//! Notify contexts.
//!
//! A [`NotifyContext`] binds one backend instance to the shared event loop
//! for the lifetime of an owning scope (a share, a connection). It owns the
//! backend instance and every watch entry created through it; it only
//! borrows the loop.

use std::fmt;
use std::path::Path;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::backend::{BackendInit, BackendOptions, NotifyBackend};
use crate::errors::{NotifyError, Result};
use crate::event_loop::EventLoop;
use crate::registry::{Backend, BackendRegistry};
use crate::types::{ChangeMask, NotifyEvent};
use crate::watch::{Dispatcher, WatchEntry, WatchHandle};

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Notification settings of the scope that owns a context.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ScopeConfig {
    /// Backend to try first; without one, registration order decides.
    #[serde(default)]
    pub backend: Option<String>,

    /// Passed unchanged to the backend's initialisation.
    #[serde(default)]
    pub options: BackendOptions,
}

impl ScopeConfig {
    pub fn with_backend(name: impl Into<String>) -> Self {
        Self {
            backend: Some(name.into()),
            options: BackendOptions::new(),
        }
    }

    pub fn option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }
}

/// Point-in-time counters of a context.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContextStats {
    pub active_watches: usize,
    pub events_delivered: u64,
    pub overflows_delivered: u64,
    /// Native subscriptions and loop sources held by the backend instance.
    pub native_resources: usize,
}

pub struct NotifyContext {
    id: u64,
    backend_name: String,
    event_loop: EventLoop,
    backend: Option<Box<dyn NotifyBackend>>,
    dispatcher: Rc<Dispatcher>,
}

impl fmt::Debug for NotifyContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotifyContext")
            .field("id", &self.id)
            .field("backend", &self.backend_name)
            .field("destroyed", &self.backend.is_none())
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}

impl NotifyContext {
    /// Select and initialise a backend for a new scope.
    ///
    /// The scope's explicit backend is tried first. If it is unknown or
    /// fails to initialise, the remaining registered backends are tried in
    /// registration order; `NoBackendAvailable` lists every name tried.
    pub fn create(
        registry: &BackendRegistry,
        scope: &ScopeConfig,
        event_loop: &EventLoop,
    ) -> Result<Self> {
        let id = NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed);
        let dispatcher = Rc::new(Dispatcher::new(id));
        let mut tried = Vec::new();

        let mut candidates: Vec<&Backend> = Vec::with_capacity(registry.len());
        if let Some(name) = scope.backend.as_deref() {
            match registry.lookup(name) {
                Ok(backend) => candidates.push(backend),
                Err(err) => {
                    warn!(context = id, error = %err, "requested notify backend is not registered");
                    tried.push(name.to_string());
                }
            }
        }
        candidates.extend(
            registry
                .backends()
                .filter(|b| Some(b.name()) != scope.backend.as_deref()),
        );

        for backend in candidates {
            let init = BackendInit {
                event_loop,
                dispatcher: Rc::downgrade(&dispatcher),
                options: &scope.options,
            };
            match backend.kind().initialize(init) {
                Ok(instance) => {
                    info!(
                        context = id,
                        backend = backend.name(),
                        kind = backend.kind().label(),
                        "notify context created"
                    );
                    return Ok(Self {
                        id,
                        backend_name: backend.name().to_string(),
                        event_loop: event_loop.clone(),
                        backend: Some(instance),
                        dispatcher,
                    });
                }
                Err(err) => {
                    warn!(
                        context = id,
                        backend = backend.name(),
                        error = %err,
                        "notify backend failed to initialise; trying next"
                    );
                    tried.push(backend.name().to_string());
                }
            }
        }

        Err(NotifyError::NoBackendAvailable { tried })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn backend_name(&self) -> &str {
        &self.backend_name
    }

    pub fn event_loop(&self) -> &EventLoop {
        &self.event_loop
    }

    pub fn is_destroyed(&self) -> bool {
        self.backend.is_none()
    }

    /// Whether `handle` refers to a live entry of this context.
    pub fn is_active(&self, handle: WatchHandle) -> bool {
        self.dispatcher.is_active(handle)
    }

    /// Subscribe `callback` to changes under `path`.
    ///
    /// The callback runs on the event loop, once per matching change, until
    /// the handle is released or the context destroyed. Per-watch private
    /// data is whatever the closure captures.
    ///
    /// Failures (`NotSupported`, `ResourceExhausted`, `PathUnavailable`)
    /// create no entry and mean "no notifications for this path"; see
    /// [`NotifyError::is_degraded`].
    pub fn watch<F>(
        &mut self,
        path: impl AsRef<Path>,
        mask: ChangeMask,
        recursive: bool,
        callback: F,
    ) -> Result<WatchHandle>
    where
        F: Fn(&NotifyEvent) + 'static,
    {
        let path = path.as_ref();
        let Some(backend) = self.backend.as_mut() else {
            return Err(NotifyError::NotSupported(format!(
                "notify context {} is destroyed",
                self.id
            )));
        };
        if mask.is_empty() {
            return Err(NotifyError::NotSupported("empty change filter".to_string()));
        }

        let root = match backend.watch(path, mask, recursive) {
            Ok(root) => root,
            Err(err) => {
                warn!(context = self.id, ?path, error = %err, "watch request failed");
                return Err(err);
            }
        };

        let handle = self.dispatcher.insert(WatchEntry {
            root,
            mask,
            recursive,
            callback: Rc::new(callback),
        });
        debug!(context = self.id, %handle, ?path, ?mask, recursive, "watch active");
        Ok(handle)
    }

    /// Release one entry. Once this returns, its callback never runs again.
    pub fn release(&mut self, handle: WatchHandle) -> Result<()> {
        let Some(entry) = self.dispatcher.remove(handle) else {
            return Err(NotifyError::InvalidHandle(handle));
        };
        if let Some(backend) = self.backend.as_mut() {
            backend.unwatch(&entry.root, entry.recursive);
        }
        debug!(context = self.id, %handle, root = ?entry.root, "watch released");
        Ok(())
    }

    /// Release every outstanding entry and shut the backend down.
    /// Destroying twice is a no-op.
    pub fn destroy(&mut self) {
        let Some(mut backend) = self.backend.take() else {
            return;
        };

        let entries = self.dispatcher.drain();
        for (_, entry) in entries.iter() {
            backend.unwatch(&entry.root, entry.recursive);
        }
        backend.shutdown();

        info!(
            context = self.id,
            backend = %self.backend_name,
            released = entries.len(),
            "notify context destroyed"
        );
    }

    pub fn stats(&self) -> ContextStats {
        ContextStats {
            active_watches: self.dispatcher.active_watches(),
            events_delivered: self.dispatcher.delivered(),
            overflows_delivered: self.dispatcher.overflows(),
            native_resources: self
                .backend
                .as_ref()
                .map_or(0, |backend| backend.native_resources()),
        }
    }
}

impl Drop for NotifyContext {
    fn drop(&mut self) {
        self.destroy();
    }
}
