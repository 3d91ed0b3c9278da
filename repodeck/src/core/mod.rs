//! Pure parsing and decoding shared by the orchestration layer.
//!
//! Core modules must be free of I/O side effects. They turn executor text and
//! payloads into canonical entities and never fail on empty input.

pub mod commit_message;
pub mod diff;
pub mod log;
pub mod payload;
pub mod status;
pub mod types;
