// src/registry.rs

//! Backend registry.
//!
//! Backends are registered by name during startup, before any context is
//! created. A fully populated registry is then either kept locally (tests) or
//! moved into process-wide storage with [`BackendRegistry::install_global`],
//! after which it is read-only and shared without locking.

use std::sync::OnceLock;
use std::time::Duration;

use tracing::debug;

use crate::backend::native::NativeBackend;
use crate::backend::poll::PollBackend;
use crate::backend::stub::StubBackend;
use crate::backend::{BackendInit, NativeConfig, NotifyBackend, PollConfig, StubController};
use crate::errors::{NotifyError, Result};

static GLOBAL: OnceLock<BackendRegistry> = OnceLock::new();

/// The fixed set of change-detection strategies a backend can use.
#[derive(Debug, Clone)]
pub enum BackendKind {
    Native(NativeConfig),
    Polling(PollConfig),
    Stub(StubController),
}

impl BackendKind {
    /// Create the per-context instance. Fails when the facility is missing
    /// on this host or the scope options are invalid.
    pub fn initialize(&self, init: BackendInit<'_>) -> Result<Box<dyn NotifyBackend>> {
        Ok(match self {
            BackendKind::Native(config) => Box::new(NativeBackend::initialize(config, init)?),
            BackendKind::Polling(config) => Box::new(PollBackend::initialize(config, init)?),
            BackendKind::Stub(controller) => Box::new(StubBackend::initialize(controller, init)?),
        })
    }

    pub fn label(&self) -> &'static str {
        match self {
            BackendKind::Native(_) => "native",
            BackendKind::Polling(_) => "polling",
            BackendKind::Stub(_) => "stub",
        }
    }
}

/// A named backend. Immutable once registered.
#[derive(Debug, Clone)]
pub struct Backend {
    name: String,
    kind: BackendKind,
}

impl Backend {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &BackendKind {
        &self.kind
    }
}

/// Named backends in registration order.
#[derive(Debug, Default)]
pub struct BackendRegistry {
    backends: Vec<Backend>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// `"inotify"` (native kernel queue) followed by `"poll"` (1s polling).
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.backends.push(Backend {
            name: "inotify".to_string(),
            kind: BackendKind::Native(NativeConfig::default()),
        });
        registry.backends.push(Backend {
            name: "poll".to_string(),
            kind: BackendKind::Polling(PollConfig::new(Duration::from_secs(1))),
        });
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, kind: BackendKind) -> Result<()> {
        let name = name.into();
        if self.backends.iter().any(|b| b.name == name) {
            return Err(NotifyError::DuplicateBackend(name));
        }
        debug!(backend = %name, kind = kind.label(), "registering notify backend");
        self.backends.push(Backend { name, kind });
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Result<&Backend> {
        self.backends
            .iter()
            .find(|b| b.name == name)
            .ok_or_else(|| NotifyError::BackendNotFound(name.to_string()))
    }

    /// Registered names in registration order. The iterator is lazy and can
    /// be cloned to restart it.
    pub fn names(&self) -> impl Iterator<Item = &str> + Clone + '_ {
        self.backends.iter().map(|b| b.name.as_str())
    }

    pub fn backends(&self) -> impl Iterator<Item = &Backend> + Clone + '_ {
        self.backends.iter()
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// Move this registry into process-wide storage. Only the first call
    /// succeeds; contexts created afterwards read it without locking.
    pub fn install_global(self) -> Result<&'static BackendRegistry> {
        let mut slot = Some(self);
        let installed = GLOBAL.get_or_init(|| slot.take().unwrap_or_default());
        if slot.is_some() {
            return Err(NotifyError::Config(
                "global backend registry already installed".to_string(),
            ));
        }
        Ok(installed)
    }

    /// The process-wide registry, if one was installed.
    pub fn global() -> Option<&'static BackendRegistry> {
        GLOBAL.get()
    }
}
