//! Orchestration core for a version-control front end.
//!
//! The actual version-control work happens in external executor processes;
//! this crate spawns and supervises them, interprets their output, and keeps
//! a per-repository state cache consistent after every mutation.
//!
//! - **[`core`]**: Pure parsing and payload decoding. No I/O.
//! - **[`io`]**: Processes, watcher supervision, per-key queues, config.
//! - **[`store`]**: The repository state store callers talk to.

pub mod core;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod store;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
