//! Repository path resolution.

use std::path::{Path, PathBuf};

use tracing::debug;

/// Canonical key for a repository path: canonicalized when it exists, as given otherwise.
pub fn normalize(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Walk upward from `start` to the nearest directory containing a `.git` entry.
///
/// `.git` may be a directory or a file (worktrees, submodules). A path that does not
/// exist has no root.
pub fn discover_root(start: &Path) -> Option<PathBuf> {
    let start = normalize(start);
    if !start.exists() {
        return None;
    }
    let mut current = if start.is_dir() {
        start.as_path()
    } else {
        start.parent()?
    };
    loop {
        if current.join(".git").exists() {
            debug!(root = %current.display(), "found repository root");
            return Some(current.to_path_buf());
        }
        current = current.parent()?;
    }
}
