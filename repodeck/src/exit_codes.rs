//! Stable exit codes for the repodeck CLI.

/// Command succeeded.
pub const OK: i32 = 0;
/// Command failed: executor failure, rejected operation, bad config, or other errors.
pub const FAILURE: i32 = 1;
/// The given path is not inside a version-controlled working directory.
pub const INVALID_REPOSITORY: i32 = 2;
