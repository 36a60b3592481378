// src/fs/mod.rs

use std::fmt::Debug;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result};

pub mod mock;

/// Metadata the polling backend compares between snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryStat {
    pub is_dir: bool,
    pub len: u64,
    pub modified: Option<SystemTime>,
}

/// Abstract filesystem interface.
pub trait FileSystem: Send + Sync + Debug {
    fn canonicalize(&self, path: &Path) -> Result<PathBuf>;

    /// Metadata for `path`, without following a final symlink.
    fn stat(&self, path: &Path) -> Result<EntryStat>;

    /// Return a list of entries in a directory.
    /// Returns full paths.
    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>>;
}

/// Implementation that uses `std::fs`.
#[derive(Debug, Clone, Default)]
pub struct RealFileSystem;

impl FileSystem for RealFileSystem {
    fn canonicalize(&self, path: &Path) -> Result<PathBuf> {
        fs::canonicalize(path).with_context(|| format!("canonicalizing {:?}", path))
    }

    fn stat(&self, path: &Path) -> Result<EntryStat> {
        let meta = fs::symlink_metadata(path).with_context(|| format!("reading metadata of {:?}", path))?;
        Ok(EntryStat {
            is_dir: meta.is_dir(),
            len: meta.len(),
            modified: meta.modified().ok(),
        })
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(path).with_context(|| format!("reading dir {:?}", path))? {
            let entry = entry?;
            entries.push(entry.path());
        }
        Ok(entries)
    }
}

/// Whether a filesystem error means the path does not exist, as opposed to
/// being unreadable.
pub fn is_not_found(err: &anyhow::Error) -> bool {
    err.chain()
        .filter_map(|cause| cause.downcast_ref::<std::io::Error>())
        .any(|io| io.kind() == std::io::ErrorKind::NotFound)
}
