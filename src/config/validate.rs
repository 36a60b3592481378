// src/config/validate.rs

use crate::config::duration::parse_duration;
use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::{NotifyError, Result};
use crate::backend::BackendOptions;

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = NotifyError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw.notify, raw.share))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    ensure_has_shares(cfg)?;
    validate_options("[notify].options", &cfg.notify.options)?;
    validate_shares(cfg)?;
    Ok(())
}

fn ensure_has_shares(cfg: &RawConfigFile) -> Result<()> {
    if cfg.share.is_empty() {
        return Err(NotifyError::Config(
            "config must contain at least one [share.<name>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_shares(cfg: &RawConfigFile) -> Result<()> {
    for (name, share) in cfg.share.iter() {
        if share.path.as_os_str().is_empty() {
            return Err(NotifyError::Config(format!(
                "share '{name}' has an empty `path`"
            )));
        }
        if share.filter.is_empty() {
            return Err(NotifyError::Config(format!(
                "share '{name}' has an empty `filter`; omit it to report all changes"
            )));
        }
        if let Some(backend) = share.backend.as_deref() {
            if backend.trim().is_empty() {
                return Err(NotifyError::Config(format!(
                    "share '{name}' has an empty `backend` name"
                )));
            }
        }
        validate_options(&format!("[share.{name}].options"), &share.options)?;
    }
    Ok(())
}

/// Interval options are checked up front so a typo fails at startup instead
/// of silently skipping a backend at context creation.
fn validate_options(section: &str, options: &BackendOptions) -> Result<()> {
    for (key, value) in options.iter().filter(|(k, _)| k.ends_with("_interval")) {
        parse_duration(value).map_err(|e| {
            NotifyError::Config(format!("{section}: invalid `{key}`: {e}"))
        })?;
    }
    Ok(())
}
