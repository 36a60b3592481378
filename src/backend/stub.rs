// src/backend/stub.rs

//! Backend with no OS resources, driven entirely by a [`StubController`].
//!
//! Tests register a stub under any name, inject raw change records through
//! the controller and observe the dispatch path end to end: overflow
//! collapse, release cutoff and teardown accounting behave exactly as with
//! the native backend. Paths are taken as given; nothing touches the disk.

use std::path::{Path, PathBuf};
use std::rc::Weak;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::backend::{BackendInit, NotifyBackend, SubscriptionChange, Subscriptions};
use crate::errors::{NotifyError, Result};
use crate::event_loop::{EventLoop, SourceId};
use crate::types::{Action, ChangeMask};
use crate::watch::{Dispatcher, RawChange};

#[derive(Debug)]
struct StubSink {
    instance: u64,
    tx: mpsc::UnboundedSender<RawChange>,
    resources: usize,
}

#[derive(Debug, Default)]
struct StubShared {
    fail_init: bool,
    reject_recursive: bool,
    max_watches: Option<usize>,
    next_instance: u64,
    sinks: Vec<StubSink>,
}

/// Test handle shared by every instance a stub backend creates.
///
/// Clones share state, so a controller kept by the test observes contexts
/// created through the registry.
#[derive(Debug, Clone, Default)]
pub struct StubController {
    shared: Arc<Mutex<StubShared>>,
}

impl StubController {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StubShared> {
        self.shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make subsequent initialisations fail, as if the facility were missing.
    pub fn set_fail_init(&self, fail: bool) {
        self.lock().fail_init = fail;
    }

    /// Refuse recursive watches with `NotSupported`.
    pub fn set_reject_recursive(&self, reject: bool) {
        self.lock().reject_recursive = reject;
    }

    /// Cap distinct roots per instance; further roots fail with
    /// `ResourceExhausted`.
    pub fn set_max_watches(&self, max: Option<usize>) {
        self.lock().max_watches = max;
    }

    /// Queue a change for every live instance. Returns how many received it.
    pub fn inject(&self, path: impl Into<PathBuf>, action: Action) -> usize {
        self.send(RawChange::change(path, action))
    }

    /// Queue an overflow for every live instance.
    pub fn overflow(&self, area: Option<PathBuf>) -> usize {
        self.send(RawChange::overflow(area))
    }

    fn send(&self, record: RawChange) -> usize {
        let mut shared = self.lock();
        shared.sinks.retain(|sink| !sink.tx.is_closed());
        shared
            .sinks
            .iter()
            .filter(|sink| sink.tx.send(record.clone()).is_ok())
            .count()
    }

    /// Live (not shut down) instances.
    pub fn instances(&self) -> usize {
        self.lock().sinks.len()
    }

    /// Subscriptions plus loop sources held across all live instances.
    pub fn native_resources(&self) -> usize {
        self.lock().sinks.iter().map(|sink| sink.resources).sum()
    }

    fn register(&self, tx: mpsc::UnboundedSender<RawChange>) -> Result<u64> {
        let mut shared = self.lock();
        if shared.fail_init {
            return Err(NotifyError::NotSupported(
                "stub backend configured to fail initialisation".to_string(),
            ));
        }
        shared.next_instance += 1;
        let instance = shared.next_instance;
        shared.sinks.push(StubSink {
            instance,
            tx,
            resources: 1,
        });
        Ok(instance)
    }

    fn set_resources(&self, instance: u64, resources: usize) {
        if let Some(sink) = self.lock().sinks.iter_mut().find(|s| s.instance == instance) {
            sink.resources = resources;
        }
    }

    fn deregister(&self, instance: u64) {
        self.lock().sinks.retain(|sink| sink.instance != instance);
    }
}

#[derive(Debug)]
pub struct StubBackend {
    controller: StubController,
    instance: u64,
    subs: Subscriptions,
    event_loop: EventLoop,
    source: Option<SourceId>,
}

impl StubBackend {
    pub fn initialize(controller: &StubController, init: BackendInit<'_>) -> Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let instance = controller.register(tx)?;
        let source = init
            .event_loop
            .add_source("stub", drain_injected(rx, init.dispatcher));

        info!(instance, "stub backend initialised");

        Ok(Self {
            controller: controller.clone(),
            instance,
            subs: Subscriptions::new(),
            event_loop: init.event_loop.clone(),
            source: Some(source),
        })
    }

    fn publish_resources(&self) {
        self.controller
            .set_resources(self.instance, self.native_resources());
    }
}

impl NotifyBackend for StubBackend {
    fn watch(&mut self, path: &Path, _mask: ChangeMask, recursive: bool) -> Result<PathBuf> {
        if self.source.is_none() {
            return Err(NotifyError::NotSupported("stub backend is shut down".to_string()));
        }

        let (reject_recursive, max_watches) = {
            let shared = self.controller.lock();
            (shared.reject_recursive, shared.max_watches)
        };
        if recursive && reject_recursive {
            return Err(NotifyError::NotSupported(
                "stub backend rejects recursive watches".to_string(),
            ));
        }

        let root = path.to_path_buf();
        if let Some(max) = max_watches {
            if !self.subs.contains(&root) && self.subs.len() >= max {
                return Err(NotifyError::ResourceExhausted(format!(
                    "stub watch limit of {max} roots reached"
                )));
            }
        }

        if let SubscriptionChange::Added { .. } = self.subs.add(&root, recursive) {
            debug!(?root, recursive, "stub subscription added");
        }
        self.publish_resources();
        Ok(root)
    }

    fn unwatch(&mut self, root: &Path, recursive: bool) {
        if let SubscriptionChange::Removed = self.subs.remove(root, recursive) {
            debug!(?root, "stub subscription removed");
        }
        self.publish_resources();
    }

    fn native_resources(&self) -> usize {
        self.subs.len() + usize::from(self.source.is_some())
    }

    fn shutdown(&mut self) {
        self.subs.clear();
        if let Some(source) = self.source.take() {
            self.event_loop.remove_source(source);
        }
        self.controller.deregister(self.instance);
        info!(instance = self.instance, "stub backend shut down");
    }
}

async fn drain_injected(mut rx: mpsc::UnboundedReceiver<RawChange>, dispatcher: Weak<Dispatcher>) {
    while let Some(first) = rx.recv().await {
        let mut batch = vec![first];
        while let Ok(next) = rx.try_recv() {
            batch.push(next);
        }

        let Some(dispatcher) = dispatcher.upgrade() else {
            break;
        };
        dispatcher.dispatch_batch(batch);
    }
    debug!("stub change stream closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendOptions;
    use std::rc::Rc;

    #[tokio::test]
    async fn accounting_follows_subscriptions() {
        let controller = StubController::new();
        let event_loop = EventLoop::new();
        let dispatcher = Rc::new(Dispatcher::new(1));
        let options = BackendOptions::new();

        let mut backend = StubBackend::initialize(
            &controller,
            BackendInit {
                event_loop: &event_loop,
                dispatcher: Rc::downgrade(&dispatcher),
                options: &options,
            },
        )
        .unwrap();
        assert_eq!(controller.instances(), 1);
        assert_eq!(controller.native_resources(), 1);

        let root = backend.watch(Path::new("/d"), ChangeMask::ALL, false).unwrap();
        backend.watch(Path::new("/d"), ChangeMask::ALL, true).unwrap();
        assert_eq!(controller.native_resources(), 2);

        backend.unwatch(&root, false);
        backend.unwatch(&root, true);
        assert_eq!(controller.native_resources(), 1);

        backend.shutdown();
        backend.shutdown();
        assert_eq!(controller.instances(), 0);
        assert_eq!(controller.native_resources(), 0);
        assert_eq!(event_loop.source_count(), 0);
    }

    #[tokio::test]
    async fn failure_switches_are_honoured() {
        let controller = StubController::new();
        let event_loop = EventLoop::new();
        let dispatcher = Rc::new(Dispatcher::new(1));
        let options = BackendOptions::new();
        let init = || BackendInit {
            event_loop: &event_loop,
            dispatcher: Rc::downgrade(&dispatcher),
            options: &options,
        };

        controller.set_fail_init(true);
        assert!(matches!(
            StubBackend::initialize(&controller, init()),
            Err(NotifyError::NotSupported(_))
        ));
        controller.set_fail_init(false);

        let mut backend = StubBackend::initialize(&controller, init()).unwrap();
        controller.set_reject_recursive(true);
        assert!(matches!(
            backend.watch(Path::new("/d"), ChangeMask::ALL, true),
            Err(NotifyError::NotSupported(_))
        ));

        controller.set_max_watches(Some(1));
        backend.watch(Path::new("/a"), ChangeMask::ALL, false).unwrap();
        backend.watch(Path::new("/a"), ChangeMask::ALL, false).unwrap();
        assert!(matches!(
            backend.watch(Path::new("/b"), ChangeMask::ALL, false),
            Err(NotifyError::ResourceExhausted(_))
        ));
        backend.shutdown();
    }
}
