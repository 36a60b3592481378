// src/errors.rs

//! Crate-wide error taxonomy.
//!
//! Backends translate native (`notify`, `std::io`) failures into these
//! variants at their boundary; OS-specific codes never reach the caller.

use std::path::PathBuf;

use thiserror::Error;

use crate::watch::WatchHandle;

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("backend already registered: {0}")]
    DuplicateBackend(String),

    #[error("backend not found: {0}")]
    BackendNotFound(String),

    #[error("no notify backend available (tried: {})", tried.join(", "))]
    NoBackendAvailable { tried: Vec<String> },

    #[error("watch not supported: {0}")]
    NotSupported(String),

    #[error("watch resources exhausted: {0}")]
    ResourceExhausted(String),

    #[error("path unavailable for watching {path:?}: {reason}")]
    PathUnavailable { path: PathBuf, reason: String },

    #[error("invalid watch handle: {0}")]
    InvalidHandle(WatchHandle),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl NotifyError {
    /// True for failures that only mean "notifications are unavailable here".
    ///
    /// Callers keep serving without push notifications for the affected path
    /// or scope instead of propagating these.
    pub fn is_degraded(&self) -> bool {
        matches!(
            self,
            NotifyError::NotSupported(_)
                | NotifyError::ResourceExhausted(_)
                | NotifyError::PathUnavailable { .. }
                | NotifyError::NoBackendAvailable { .. }
        )
    }

    pub(crate) fn path_unavailable(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        NotifyError::PathUnavailable {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, NotifyError>;
