// src/watch/path_utils.rs

//! Utility functions for relating event paths to watched roots.

use std::path::Path;

/// Convert a path into a string relative to `root`, with forward slashes.
///
/// Purely lexical. Backends resolve roots to canonical paths before
/// subscribing and report records under those same roots, so no filesystem
/// lookup is needed while routing.
///
/// Returns `None` if `path` is not `root` or below it.
pub fn relative_str(root: &Path, path: &Path) -> Option<String> {
    path.strip_prefix(root).ok().map(to_slash)
}

/// Relative path of `path` under `root` if it lies within the watch scope.
///
/// The root itself is never in scope: only entries below it are reported.
/// A non-recursive scope covers direct children only.
pub fn scoped_relative(root: &Path, path: &Path, recursive: bool) -> Option<String> {
    let rel = relative_str(root, path)?;
    if rel.is_empty() {
        return None;
    }
    if !recursive && rel.contains('/') {
        return None;
    }
    Some(rel)
}

/// True if `a` and `b` are the same path or one contains the other.
pub fn overlaps(a: &Path, b: &Path) -> bool {
    a.starts_with(b) || b.starts_with(a)
}

fn to_slash(rel: &Path) -> String {
    rel.to_string_lossy().replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_child_is_in_flat_scope() {
        let rel = scoped_relative(Path::new("/export/public"), Path::new("/export/public/a.txt"), false);
        assert_eq!(rel.as_deref(), Some("a.txt"));
    }

    #[test]
    fn nested_child_requires_recursive_scope() {
        let root = Path::new("/export/public");
        let nested = Path::new("/export/public/sub/b.txt");
        assert_eq!(scoped_relative(root, nested, false), None);
        assert_eq!(scoped_relative(root, nested, true).as_deref(), Some("sub/b.txt"));
    }

    #[test]
    fn root_and_siblings_are_out_of_scope() {
        let root = Path::new("/export/public");
        assert_eq!(scoped_relative(root, root, true), None);
        assert_eq!(scoped_relative(root, Path::new("/export/publicity/x"), true), None);
    }

    #[test]
    fn relation_is_lexical() {
        let root = Path::new("/export/public");
        assert_eq!(relative_str(root, Path::new("/export/public/a/b")).as_deref(), Some("a/b"));
        assert_eq!(relative_str(root, root).as_deref(), Some(""));
        // A different spelling of the same directory is not resolved.
        assert_eq!(relative_str(root, Path::new("/export/x/../public/a")), None);
        assert_eq!(relative_str(root, Path::new("/elsewhere/a")), None);
    }

    #[test]
    fn overlap_is_symmetric() {
        assert!(overlaps(Path::new("/a/b"), Path::new("/a")));
        assert!(overlaps(Path::new("/a"), Path::new("/a/b")));
        assert!(!overlaps(Path::new("/a/b"), Path::new("/a/c")));
    }
}
