//! Canonical entities produced by the output parsers and held by the store.
//!
//! These types are the stable contract between the parsers, the store, and
//! whatever delivery layer sits on top. They carry no I/O handles.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Classification of a changed path, as reported by the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeStatus {
    Added,
    Modified,
    Deleted,
    Renamed,
    Untracked,
}

impl ChangeStatus {
    /// Marker code used for untracked entries.
    pub const UNTRACKED_MARKER: &'static str = "??";

    /// Map an exact status code (`A`, `M`, `D`, `R`, `??`).
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "A" => Some(Self::Added),
            "M" => Some(Self::Modified),
            "D" => Some(Self::Deleted),
            "R" => Some(Self::Renamed),
            Self::UNTRACKED_MARKER => Some(Self::Untracked),
            _ => None,
        }
    }

    /// Map a loosely formatted code from a structured payload (`R100`, ` M`, `T`).
    ///
    /// The first significant letter decides; anything unrecognized is a modification.
    pub fn from_payload_code(code: &str) -> Self {
        let code = code.trim();
        if code == Self::UNTRACKED_MARKER {
            return Self::Untracked;
        }
        match code.chars().next() {
            Some('A') => Self::Added,
            Some('D') => Self::Deleted,
            Some('R') => Self::Renamed,
            Some('?') => Self::Untracked,
            _ => Self::Modified,
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Self::Added => "A",
            Self::Modified => "M",
            Self::Deleted => "D",
            Self::Renamed => "R",
            Self::Untracked => Self::UNTRACKED_MARKER,
        }
    }
}

/// A single changed path within one of the staged/unstaged/untracked lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    pub status: ChangeStatus,
    pub path: String,
}

impl FileChange {
    pub fn new(status: ChangeStatus, path: impl Into<String>) -> Self {
        Self {
            status,
            path: path.into(),
        }
    }
}

/// The three change lists parsed from a status report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusLists {
    pub staged: Vec<FileChange>,
    pub unstaged: Vec<FileChange>,
    pub untracked: Vec<FileChange>,
}

impl StatusLists {
    pub fn is_empty(&self) -> bool {
        self.staged.is_empty() && self.unstaged.is_empty() && self.untracked.is_empty()
    }

    /// True if `path` already appears in any of the three lists.
    pub fn contains_path(&self, path: &str) -> bool {
        self.staged
            .iter()
            .chain(&self.unstaged)
            .chain(&self.untracked)
            .any(|change| change.path == path)
    }
}

/// One commit in a history listing (newest first).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub hash: String,
    pub short_hash: String,
    pub author: String,
    pub email: String,
    pub date: String,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffLineKind {
    Added,
    Removed,
    Context,
    Info,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffLine {
    pub kind: DiffLineKind,
    /// Line text without its leading marker character (`+`, `-`, space, or the info byte).
    pub content: String,
}

/// A contiguous region of a diff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffHunk {
    /// Raw `@@ ... @@` marker line.
    pub header: String,
    pub old_start: u32,
    pub old_count: u32,
    pub new_start: u32,
    pub new_count: u32,
    pub lines: Vec<DiffLine>,
}

/// Last known state of one working directory.
///
/// Replaced wholesale on every successful status fetch; never merged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepositoryState {
    pub path: PathBuf,
    pub branch: String,
    pub remote_name: String,
    pub staged: Vec<FileChange>,
    pub unstaged: Vec<FileChange>,
    pub untracked: Vec<FileChange>,
    /// Derived: any of the three lists is non-empty.
    pub has_changes: bool,
}

impl RepositoryState {
    pub fn new(path: PathBuf, branch: String, remote_name: String, lists: StatusLists) -> Self {
        let has_changes = !lists.is_empty();
        Self {
            path,
            branch,
            remote_name,
            staged: lists.staged,
            unstaged: lists.unstaged,
            untracked: lists.untracked,
            has_changes,
        }
    }

    /// Every change across the three lists, staged first.
    pub fn all_changes(&self) -> impl Iterator<Item = &FileChange> {
        self.staged
            .iter()
            .chain(&self.unstaged)
            .chain(&self.untracked)
    }
}

/// Node in the repository file tree returned by the `file-tree` operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileTreeNode {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: FileTreeKind,
    pub path: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub children: Option<Vec<FileTreeNode>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileTreeKind {
    File,
    Folder,
}

/// Commit message suggestion from the generation service (or the local fallback).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitMessage {
    pub message: String,
    pub model: Option<String>,
    pub warning: Option<String>,
}

/// Change notification emitted by a watcher process.
///
/// Only `path`, `event` and `timestamp` are guaranteed; other fields are optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchNotification {
    pub path: String,
    pub event: String,
    pub timestamp: serde_json::Value,
    #[serde(default)]
    pub git_status: Option<String>,
}

/// One line from a watcher's stdout, classified.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum WatchRecord {
    Change(WatchNotification),
    /// Watcher-reported status or error object (`{"status": ...}` / `{"error": ...}`).
    Diagnostic { message: String },
    Unparsed { line: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_codes_use_first_letter() {
        assert_eq!(ChangeStatus::from_payload_code("R100"), ChangeStatus::Renamed);
        assert_eq!(ChangeStatus::from_payload_code(" D"), ChangeStatus::Deleted);
        assert_eq!(ChangeStatus::from_payload_code("??"), ChangeStatus::Untracked);
        assert_eq!(ChangeStatus::from_payload_code("T"), ChangeStatus::Modified);
    }

    #[test]
    fn has_changes_is_derived_from_lists() {
        let clean = RepositoryState::new(
            PathBuf::from("/repo"),
            "main".to_string(),
            String::new(),
            StatusLists::default(),
        );
        assert!(!clean.has_changes);

        let dirty = RepositoryState::new(
            PathBuf::from("/repo"),
            "main".to_string(),
            String::new(),
            StatusLists {
                untracked: vec![FileChange::new(ChangeStatus::Untracked, "new.txt")],
                ..StatusLists::default()
            },
        );
        assert!(dirty.has_changes);
    }
}
