// src/types.rs

//! Normalized event model shared by every backend.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use bitflags::bitflags;
use serde::Deserialize;

/// What happened to a path under a watched root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Action {
    Created,
    Deleted,
    Modified,
    RenamedFrom,
    RenamedTo,
    /// The change source dropped records; the receiver's view of the root is
    /// stale and must be rebuilt by re-enumerating it.
    Overflow,
}

impl Action {
    /// The filter bit that selects this action, or `None` for `Overflow`,
    /// which is delivered regardless of the filter.
    pub fn mask(self) -> Option<ChangeMask> {
        match self {
            Action::Created => Some(ChangeMask::CREATED),
            Action::Deleted => Some(ChangeMask::DELETED),
            Action::Modified => Some(ChangeMask::MODIFIED),
            Action::RenamedFrom => Some(ChangeMask::RENAMED_FROM),
            Action::RenamedTo => Some(ChangeMask::RENAMED_TO),
            Action::Overflow => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Action::Created => "created",
            Action::Deleted => "deleted",
            Action::Modified => "modified",
            Action::RenamedFrom => "renamed-from",
            Action::RenamedTo => "renamed-to",
            Action::Overflow => "overflow",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

bitflags! {
    /// Set of actions a watch entry is interested in.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ChangeMask: u8 {
        const CREATED = 1 << 0;
        const DELETED = 1 << 1;
        const MODIFIED = 1 << 2;
        const RENAMED_FROM = 1 << 3;
        const RENAMED_TO = 1 << 4;

        const RENAMED = Self::RENAMED_FROM.bits() | Self::RENAMED_TO.bits();
        const ALL = Self::CREATED.bits()
            | Self::DELETED.bits()
            | Self::MODIFIED.bits()
            | Self::RENAMED.bits();
    }
}

impl ChangeMask {
    /// Whether an event with `action` passes this filter.
    ///
    /// Overflow always passes: it concerns the whole root, not a kind of change.
    pub fn admits(self, action: Action) -> bool {
        match action.mask() {
            Some(bit) => self.contains(bit),
            None => true,
        }
    }

    /// Parse a list of filter names (`"created"`, `"renamed"`, `"all"`, ...)
    /// into a mask.
    pub fn from_names<I, S>(names: I) -> Result<Self, String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut mask = ChangeMask::empty();
        for name in names {
            mask |= name.as_ref().parse::<ChangeMask>()?;
        }
        Ok(mask)
    }
}

impl FromStr for ChangeMask {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "created" | "create" => Ok(ChangeMask::CREATED),
            "deleted" | "delete" | "removed" => Ok(ChangeMask::DELETED),
            "modified" | "modify" => Ok(ChangeMask::MODIFIED),
            "renamed-from" | "renamed_from" => Ok(ChangeMask::RENAMED_FROM),
            "renamed-to" | "renamed_to" => Ok(ChangeMask::RENAMED_TO),
            "renamed" | "rename" => Ok(ChangeMask::RENAMED),
            "all" => Ok(ChangeMask::ALL),
            other => Err(format!(
                "invalid change filter: {other} (expected created, deleted, modified, renamed, renamed-from, renamed-to or all)"
            )),
        }
    }
}

impl<'de> Deserialize<'de> for ChangeMask {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let names = Vec::<String>::deserialize(deserializer)?;
        ChangeMask::from_names(&names).map_err(serde::de::Error::custom)
    }
}

/// A change delivered to a watch callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifyEvent {
    /// Path relative to the watched root, with forward slashes. Empty for
    /// `Overflow`, which concerns the whole root.
    pub path: String,
    pub action: Action,
    /// Per-context delivery counter; strictly increasing.
    pub sequence: u64,
    /// The resolved root of the watch this event was routed through.
    pub root: PathBuf,
}

impl fmt::Display for NotifyEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.action == Action::Overflow {
            write!(f, "#{} {} {}", self.sequence, self.action, self.root.display())
        } else {
            write!(
                f,
                "#{} {} {}/{}",
                self.sequence,
                self.action,
                self.root.display(),
                self.path
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overflow_passes_every_filter() {
        assert!(ChangeMask::CREATED.admits(Action::Overflow));
        assert!(ChangeMask::empty().admits(Action::Overflow));
    }

    #[test]
    fn filter_excludes_other_actions() {
        let mask = ChangeMask::CREATED | ChangeMask::DELETED;
        assert!(mask.admits(Action::Created));
        assert!(mask.admits(Action::Deleted));
        assert!(!mask.admits(Action::Modified));
        assert!(!mask.admits(Action::RenamedTo));
    }

    #[test]
    fn parse_filter_names() {
        let mask = ChangeMask::from_names(["created", "Renamed"]).unwrap();
        assert_eq!(mask, ChangeMask::CREATED | ChangeMask::RENAMED);
        assert_eq!("all".parse::<ChangeMask>().unwrap(), ChangeMask::ALL);
        assert!("moved".parse::<ChangeMask>().is_err());
    }
}
