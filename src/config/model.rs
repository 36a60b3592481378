// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Deserializer};

use crate::backend::BackendOptions;
use crate::context::ScopeConfig;
use crate::types::ChangeMask;

/// Top-level configuration as read from a TOML file.
///
/// ```toml
/// [notify]
/// backend = "poll"
///
/// [notify.options]
/// poll_interval = "500ms"
///
/// [share.public]
/// path = "/export/public"
/// recursive = true
/// filter = ["created", "deleted"]
/// ```
///
/// Deserialized as-is; [`ConfigFile`] is the validated form.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawConfigFile {
    /// Defaults for every share, from `[notify]`.
    #[serde(default)]
    pub notify: NotifySection,

    /// All shares from `[share.<name>]`.
    #[serde(default)]
    pub share: BTreeMap<String, ShareConfig>,
}

/// `[notify]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotifySection {
    /// Backend tried first for shares that do not name their own.
    #[serde(default)]
    pub backend: Option<String>,

    /// Backend options shared by every share; per-share options win.
    #[serde(default, deserialize_with = "deserialize_options")]
    pub options: BackendOptions,
}

/// `[share.<name>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ShareConfig {
    /// Directory exported by the share; its root is watched.
    pub path: PathBuf,

    #[serde(default)]
    pub backend: Option<String>,

    #[serde(default)]
    pub recursive: bool,

    /// Change kinds to report. Defaults to all of them.
    #[serde(default = "default_filter")]
    pub filter: ChangeMask,

    #[serde(default, deserialize_with = "deserialize_options")]
    pub options: BackendOptions,
}

fn default_filter() -> ChangeMask {
    ChangeMask::ALL
}

impl ShareConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            backend: None,
            recursive: false,
            filter: ChangeMask::ALL,
            options: BackendOptions::new(),
        }
    }
}

/// Backend options are opaque strings; TOML scalars are accepted and
/// stringified so `max_watches = 64` works as well as `"64"`.
fn deserialize_options<'de, D>(deserializer: D) -> Result<BackendOptions, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = BTreeMap::<String, toml::Value>::deserialize(deserializer)?;
    raw.into_iter()
        .map(|(key, value)| match value {
            toml::Value::String(s) => Ok((key, s)),
            toml::Value::Integer(_) | toml::Value::Float(_) | toml::Value::Boolean(_) => {
                Ok((key, value.to_string()))
            }
            other => Err(serde::de::Error::custom(format!(
                "option '{key}' must be a string, number or boolean (got {})",
                other.type_str()
            ))),
        })
        .collect()
}

/// Validated configuration. Obtain one with `ConfigFile::try_from(raw)` or
/// [`load_and_validate`](crate::config::load_and_validate).
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub notify: NotifySection,
    pub share: BTreeMap<String, ShareConfig>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(notify: NotifySection, share: BTreeMap<String, ShareConfig>) -> Self {
        Self { notify, share }
    }

    /// Scope configuration for one share: its own backend and options on
    /// top of the `[notify]` defaults.
    pub fn scope_for(&self, share: &ShareConfig) -> ScopeConfig {
        let mut options = self.notify.options.clone();
        options.extend(share.options.iter().map(|(k, v)| (k.clone(), v.clone())));
        ScopeConfig {
            backend: share.backend.clone().or_else(|| self.notify.backend.clone()),
            options,
        }
    }
}
