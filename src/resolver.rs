//! Sandboxed recursive file lookup inside a fixed set of root directories.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

/// Outcome of a lookup. Never cached across requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved {
    Found(PathBuf),
    NotFound,
}

/// The set of directories the server is permitted to search.
///
/// Populated once at startup and immutable afterwards, so concurrent
/// sessions can resolve against it without locking.
#[derive(Debug, Default)]
pub struct RootSet {
    roots: HashSet<PathBuf>,
}

impl RootSet {
    /// Canonicalizes and deduplicates the given directories. Entries that
    /// do not exist or are not directories are ignored.
    pub fn load<I>(dirs: I) -> Self
    where
        I: IntoIterator<Item = PathBuf>,
    {
        let mut roots = HashSet::new();
        for dir in dirs {
            match dir.canonicalize() {
                Ok(path) if path.is_dir() => {
                    roots.insert(path);
                }
                Ok(path) => {
                    debug!(path = %path.display(), "ignoring non-directory entry");
                }
                Err(e) => {
                    debug!(path = %dir.display(), error = %e, "ignoring inaccessible entry");
                }
            }
        }
        Self { roots }
    }

    pub fn len(&self) -> usize {
        self.roots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Finds the first directory in any root's subtree that contains
    /// `filename` and returns the full path to the file there.
    ///
    /// Roots are visited in set order; when several subtrees contain a
    /// same-named file, the first match in traversal order wins and the
    /// choice is not stable across runs. Performs synchronous filesystem
    /// I/O; call via `spawn_blocking` from async contexts.
    pub fn resolve(&self, filename: &str) -> Resolved {
        for root in &self.roots {
            if let Some(path) = find_in_dir(root, root, filename) {
                return Resolved::Found(path);
            }
        }
        Resolved::NotFound
    }
}

/// Depth-first search of `dir` for `filename`, short-circuiting on the
/// first containing directory. Candidates that canonicalize outside `root`
/// are rejected, so a request carrying `..` segments cannot step out of
/// the root set. Unreadable directories are treated as empty.
fn find_in_dir(root: &Path, dir: &Path, filename: &str) -> Option<PathBuf> {
    let candidate = dir.join(filename);
    if let Ok(path) = candidate.canonicalize() {
        if path.starts_with(root) {
            return Some(path);
        }
    }

    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return None,
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            if let Some(found) = find_in_dir(root, &path, filename) {
                return Some(found);
            }
        }
    }
    None
}
