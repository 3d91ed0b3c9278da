//! Error types surfaced by the command channel, watcher supervisor and store.

use std::path::PathBuf;

use thiserror::Error;

/// Failure of a single executor invocation.
///
/// A successful exit with unstructured output is not an error; it is
/// [`CommandResult::Raw`](crate::io::channel::CommandResult::Raw).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    /// The executable could not be started (missing, not executable).
    #[error("{message}")]
    Spawn { message: String },
    /// The executor ran and reported failure. Display is the executor's message.
    #[error("{message}")]
    NonZeroExit { code: Option<i32>, message: String },
    #[error("process timed out after {secs}s")]
    Timeout { secs: u64 },
    /// Exit 0, but stdout ran past the configured limit; the kept prefix is unusable.
    #[error("executor output exceeded {kept} bytes ({dropped} more dropped)")]
    OutputTruncated { kept: usize, dropped: usize },
    /// Reading pipes or waiting on the child failed.
    #[error("process i/o failed: {message}")]
    Io { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WatchError {
    #[error("failed to start watcher for {}: {message}", path.display())]
    Spawn { path: PathBuf, message: String },
}

/// A structured payload that did not have the expected shape.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unexpected {what} payload: {message}")]
pub struct PayloadError {
    pub what: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Raised before any command is attempted.
    #[error("not a version-controlled working directory: {}", .0.display())]
    InvalidRepositoryPath(PathBuf),
    #[error(transparent)]
    Command(#[from] CommandError),
    /// Executor exited 0 but its payload reported `success: false`.
    #[error("{message}")]
    Rejected { message: String },
    #[error(transparent)]
    Payload(#[from] PayloadError),
    #[error(transparent)]
    Watch(#[from] WatchError),
    #[error("operation queue closed before replying")]
    QueueClosed,
}
