// src/fs/mock.rs

//! In-memory filesystem for driving the polling backend in tests.
//!
//! Every mutation bumps a logical clock that stands in for the modification
//! time, so a rewrite with identical length is still observed as a change.

use super::{EntryStat, FileSystem};
use anyhow::{anyhow, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime};

#[derive(Debug, Clone)]
enum MockEntry {
    File { len: u64, stamp: u64 },
    Dir { stamp: u64 },
}

#[derive(Debug, Default)]
struct MockState {
    entries: BTreeMap<PathBuf, MockEntry>,
    clock: u64,
    unreadable: Vec<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct MockFileSystem {
    state: Arc<Mutex<MockState>>,
}

impl MockFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Create a directory and any missing parents.
    pub fn add_dir(&self, path: impl AsRef<Path>) {
        let mut state = self.lock();
        Self::ensure_dir(&mut state, path.as_ref());
    }

    /// Create or overwrite a file, creating parents as needed.
    pub fn write_file(&self, path: impl AsRef<Path>, contents: impl AsRef<[u8]>) {
        let path = path.as_ref();
        let mut state = self.lock();
        if let Some(parent) = path.parent() {
            Self::ensure_dir(&mut state, parent);
        }
        state.clock += 1;
        let stamp = state.clock;
        state.entries.insert(
            path.to_path_buf(),
            MockEntry::File {
                len: contents.as_ref().len() as u64,
                stamp,
            },
        );
    }

    /// Remove a file or a directory together with everything below it.
    pub fn remove(&self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        let mut state = self.lock();
        state.entries.retain(|p, _| !p.starts_with(path));
    }

    /// Make listing `path` fail as if read permission was denied. Its
    /// metadata stays visible, as for a real directory without the read bit.
    pub fn set_unreadable(&self, path: impl AsRef<Path>, unreadable: bool) {
        let path = path.as_ref().to_path_buf();
        let mut state = self.lock();
        state.unreadable.retain(|p| *p != path);
        if unreadable {
            state.unreadable.push(path);
        }
    }

    fn ensure_dir(state: &mut MockState, path: &Path) {
        let mut current = PathBuf::new();
        for component in path.components() {
            current.push(component);
            if !state.entries.contains_key(&current) {
                state.clock += 1;
                let stamp = state.clock;
                state.entries.insert(current.clone(), MockEntry::Dir { stamp });
            }
        }
    }

    fn check_readable(state: &MockState, path: &Path) -> Result<()> {
        if state.unreadable.iter().any(|p| p == path) {
            return Err(anyhow!("permission denied: {:?}", path));
        }
        Ok(())
    }
}

fn not_found(context: String) -> anyhow::Error {
    anyhow::Error::new(std::io::Error::from(std::io::ErrorKind::NotFound)).context(context)
}

fn stamp_time(stamp: u64) -> Option<SystemTime> {
    SystemTime::UNIX_EPOCH.checked_add(Duration::from_secs(stamp))
}

impl FileSystem for MockFileSystem {
    fn canonicalize(&self, path: &Path) -> Result<PathBuf> {
        let state = self.lock();
        if state.entries.contains_key(path) {
            Ok(path.to_path_buf())
        } else {
            Err(not_found(format!("canonicalizing {:?}", path)))
        }
    }

    fn stat(&self, path: &Path) -> Result<EntryStat> {
        let state = self.lock();
        match state.entries.get(path) {
            Some(MockEntry::File { len, stamp }) => Ok(EntryStat {
                is_dir: false,
                len: *len,
                modified: stamp_time(*stamp),
            }),
            Some(MockEntry::Dir { stamp }) => Ok(EntryStat {
                is_dir: true,
                len: 0,
                modified: stamp_time(*stamp),
            }),
            None => Err(not_found(format!("reading metadata of {:?}", path))),
        }
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let state = self.lock();
        Self::check_readable(&state, path)?;
        match state.entries.get(path) {
            Some(MockEntry::Dir { .. }) => Ok(state
                .entries
                .keys()
                .filter(|p| p.parent() == Some(path))
                .cloned()
                .collect()),
            Some(MockEntry::File { .. }) => Err(anyhow!("Not a directory: {:?}", path)),
            None => Err(not_found(format!("reading dir {:?}", path))),
        }
    }
}
