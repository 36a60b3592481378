// src/config/mod.rs

//! Share configuration for sharenotify.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a config file from disk (`loader.rs`).
//! - Validate shares and backend options (`validate.rs`).
//! - Parse `<digits><unit>` duration strings (`duration.rs`).

pub mod duration;
pub mod loader;
pub mod model;
pub mod validate;

pub use duration::parse_duration;
pub use loader::{load_and_validate, load_from_path};
pub use model::{ConfigFile, NotifySection, RawConfigFile, ShareConfig};
