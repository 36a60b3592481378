#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::PathBuf;

use sharenotify::config::{ConfigFile, NotifySection, RawConfigFile, ShareConfig};
use sharenotify::ChangeMask;

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile {
                notify: NotifySection::default(),
                share: BTreeMap::new(),
            },
        }
    }

    pub fn with_share(mut self, name: &str, share: ShareConfig) -> Self {
        self.config.share.insert(name.to_string(), share);
        self
    }

    pub fn with_default_backend(mut self, backend: &str) -> Self {
        self.config.notify.backend = Some(backend.to_string());
        self
    }

    pub fn with_default_option(mut self, key: &str, value: &str) -> Self {
        self.config
            .notify
            .options
            .insert(key.to_string(), value.to_string());
        self
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `ShareConfig`.
pub struct ShareConfigBuilder {
    share: ShareConfig,
}

impl ShareConfigBuilder {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            share: ShareConfig::new(path),
        }
    }

    pub fn backend(mut self, name: &str) -> Self {
        self.share.backend = Some(name.to_string());
        self
    }

    pub fn recursive(mut self, val: bool) -> Self {
        self.share.recursive = val;
        self
    }

    pub fn filter(mut self, mask: ChangeMask) -> Self {
        self.share.filter = mask;
        self
    }

    pub fn option(mut self, key: &str, value: &str) -> Self {
        self.share.options.insert(key.to_string(), value.to_string());
        self
    }

    pub fn build(self) -> ShareConfig {
        self.share
    }
}
