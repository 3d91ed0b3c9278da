//! Side-effecting layer: executor processes, watcher processes, queues, config.

pub mod channel;
pub mod config;
pub mod process;
pub mod queue;
pub mod repo;
pub mod watcher;
