//! Watcher supervisor: at most one long-lived watcher process per repository.
//!
//! Each watcher's stdout is read line by line; every non-empty line is
//! classified into a [`WatchRecord`] and broadcast to the subscribers of that
//! path. Starting a watch for a path that is already watched terminates the
//! old process first, so its subscribers see their stream end.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::core::types::{WatchNotification, WatchRecord};
use crate::error::WatchError;
use crate::io::config::Config;
use crate::io::repo;

type HandleTable = Mutex<HashMap<PathBuf, WatcherHandle>>;

struct WatcherHandle {
    generation: u64,
    pid: Option<u32>,
    sender: broadcast::Sender<WatchRecord>,
    kill: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl WatcherHandle {
    /// Kill the process (no-op if it already exited) and wait for the reader to stop.
    async fn terminate(self) {
        let _ = self.kill.send(());
        let _ = self.task.await;
    }
}

/// Stream of records from one watcher process.
///
/// Ends (`recv` returns `None`) when the process exits or is stopped/replaced.
pub struct WatchSubscription {
    repo_path: PathBuf,
    rx: broadcast::Receiver<WatchRecord>,
}

impl WatchSubscription {
    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    /// Independent subscription that starts at the newest record.
    pub fn resubscribe(&self) -> Self {
        Self {
            repo_path: self.repo_path.clone(),
            rx: self.rx.resubscribe(),
        }
    }

    pub async fn recv(&mut self) -> Option<WatchRecord> {
        loop {
            match self.rx.recv().await {
                Ok(record) => return Some(record),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, repo = %self.repo_path.display(), "watch subscriber lagged, records dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Owned registry of watcher processes keyed by repository path.
pub struct WatcherSupervisor {
    program: Vec<String>,
    capacity: usize,
    handles: Arc<HandleTable>,
    next_generation: AtomicU64,
}

impl WatcherSupervisor {
    /// `program` is the watcher executable and leading arguments; the repository path
    /// is appended per watch.
    pub fn new(program: Vec<String>, capacity: usize) -> Self {
        Self {
            program,
            capacity: capacity.max(1),
            handles: Arc::new(Mutex::new(HashMap::new())),
            next_generation: AtomicU64::new(0),
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(cfg.watcher.command.clone(), cfg.watch_channel_capacity)
    }

    /// Start (or restart) the watcher for `repo_path` and subscribe to it.
    #[instrument(skip_all, fields(repo = %repo_path.display()))]
    pub async fn start_watch(&self, repo_path: &Path) -> Result<WatchSubscription, WatchError> {
        let key = repo::normalize(repo_path);

        let previous = self.handles.lock().remove(&key);
        if let Some(previous) = previous {
            info!(pid = ?previous.pid, "watcher replaced");
            previous.terminate().await;
        }

        let spawn_error = |message: String| WatchError::Spawn {
            path: key.clone(),
            message,
        };
        let Some((exe, prefix)) = self.program.split_first() else {
            return Err(spawn_error("watcher command is empty".to_string()));
        };
        let mut child = Command::new(exe)
            .args(prefix)
            .arg(&key)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| spawn_error(e.to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| spawn_error("stdout was not piped".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| spawn_error("stderr was not piped".to_string()))?;

        let pid = child.id();
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let (sender, rx) = broadcast::channel(self.capacity);
        let (kill, kill_rx) = oneshot::channel();

        tokio::spawn(log_stderr(key.clone(), stderr));

        // Hold the table lock until the handle is registered so a process that exits
        // immediately cannot try to unregister itself first.
        let displaced = {
            let mut handles = self.handles.lock();
            let task = tokio::spawn(supervise(Supervised {
                key: key.clone(),
                generation,
                child,
                stdout,
                sender: sender.clone(),
                kill_rx,
                handles: Arc::downgrade(&self.handles),
            }));
            handles.insert(
                key.clone(),
                WatcherHandle {
                    generation,
                    pid,
                    sender,
                    kill,
                    task,
                },
            )
        };
        if let Some(displaced) = displaced {
            info!(pid = ?displaced.pid, "watcher replaced by concurrent start");
            displaced.terminate().await;
        }

        info!(pid = ?pid, "watcher started");
        Ok(WatchSubscription { repo_path: key, rx })
    }

    /// Additional subscription to a running watcher.
    pub fn subscribe(&self, repo_path: &Path) -> Option<WatchSubscription> {
        let key = repo::normalize(repo_path);
        let rx = self.handles.lock().get(&key)?.sender.subscribe();
        Some(WatchSubscription { repo_path: key, rx })
    }

    /// Stop the watcher for `repo_path`. Returns false if none was running.
    pub async fn stop_watch(&self, repo_path: &Path) -> bool {
        let key = repo::normalize(repo_path);
        let handle = self.handles.lock().remove(&key);
        match handle {
            Some(handle) => {
                info!(repo = %key.display(), pid = ?handle.pid, "stopping watcher");
                handle.terminate().await;
                true
            }
            None => false,
        }
    }

    /// Terminate every tracked watcher.
    pub async fn stop_all(&self) {
        let drained: Vec<(PathBuf, WatcherHandle)> = self.handles.lock().drain().collect();
        for (key, handle) in drained {
            debug!(repo = %key.display(), pid = ?handle.pid, "stopping watcher");
            handle.terminate().await;
        }
    }

    pub fn is_watching(&self, repo_path: &Path) -> bool {
        self.handles
            .lock()
            .contains_key(&repo::normalize(repo_path))
    }

    pub fn watched_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.handles.lock().keys().cloned().collect();
        paths.sort();
        paths
    }

    /// OS process id of the live watcher for `repo_path`.
    pub fn pid(&self, repo_path: &Path) -> Option<u32> {
        self.handles
            .lock()
            .get(&repo::normalize(repo_path))
            .and_then(|handle| handle.pid)
    }
}

struct Supervised {
    key: PathBuf,
    generation: u64,
    child: Child,
    stdout: ChildStdout,
    sender: broadcast::Sender<WatchRecord>,
    kill_rx: oneshot::Receiver<()>,
    handles: Weak<HandleTable>,
}

async fn supervise(watched: Supervised) {
    let Supervised {
        key,
        generation,
        mut child,
        stdout,
        sender,
        mut kill_rx,
        handles,
    } = watched;
    let mut lines = BufReader::new(stdout).lines();
    let mut stdout_open = true;

    let status = loop {
        tokio::select! {
            // Explicit stop, replacement, or the supervisor itself was dropped.
            _ = &mut kill_rx => {
                if let Err(e) = child.kill().await {
                    debug!(repo = %key.display(), err = %e, "watcher already exited");
                }
                debug!(repo = %key.display(), "watcher terminated");
                return;
            }
            line = lines.next_line(), if stdout_open => match line {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    let _ = sender.send(classify_line(&line));
                }
                Ok(None) => stdout_open = false,
                Err(e) => {
                    warn!(repo = %key.display(), err = %e, "failed reading watcher output");
                    stdout_open = false;
                }
            },
            status = child.wait(), if !stdout_open => break status,
        }
    };

    match status {
        Ok(status) => info!(repo = %key.display(), code = ?status.code(), "watcher exited"),
        Err(e) => warn!(repo = %key.display(), err = %e, "failed waiting for watcher"),
    }

    // Only unregister if the table still points at this process.
    if let Some(handles) = handles.upgrade() {
        let mut handles = handles.lock();
        if handles
            .get(&key)
            .is_some_and(|handle| handle.generation == generation)
        {
            handles.remove(&key);
        }
    }
}

async fn log_stderr(key: PathBuf, stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if !line.trim().is_empty() {
            warn!(repo = %key.display(), line = %line, "watcher stderr");
        }
    }
}

/// Classify one watcher stdout line.
pub fn classify_line(line: &str) -> WatchRecord {
    let unparsed = || WatchRecord::Unparsed {
        line: line.to_string(),
    };
    let Ok(value) = serde_json::from_str::<Value>(line.trim()) else {
        return unparsed();
    };
    if !value.is_object() {
        return unparsed();
    }
    if let Ok(notification) = serde_json::from_value::<WatchNotification>(value.clone()) {
        return WatchRecord::Change(notification);
    }
    if let Some(error) = value.get("error").and_then(Value::as_str) {
        return WatchRecord::Diagnostic {
            message: error.to_string(),
        };
    }
    if let Some(status) = value.get("status").and_then(Value::as_str) {
        return WatchRecord::Diagnostic {
            message: status.to_string(),
        };
    }
    unparsed()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_change_records() {
        let record = classify_line(
            r#"{"path": "src/a.rs", "event": "modified", "git_status": "M", "timestamp": 1700000000.5, "is_directory": false}"#,
        );
        let WatchRecord::Change(notification) = record else {
            panic!("expected change");
        };
        assert_eq!(notification.path, "src/a.rs");
        assert_eq!(notification.event, "modified");
        assert_eq!(notification.git_status.as_deref(), Some("M"));
    }

    #[test]
    fn minimum_fields_are_enough() {
        let record = classify_line(r#"{"path": "a", "event": "created", "timestamp": "2024-01-01T00:00:00Z"}"#);
        assert!(matches!(record, WatchRecord::Change(n) if n.git_status.is_none()));
    }

    #[test]
    fn classifies_diagnostics() {
        assert_eq!(
            classify_line(r#"{"error": "Initial scan failed", "path": "x"}"#),
            WatchRecord::Diagnostic {
                message: "Initial scan failed".to_string()
            }
        );
        assert_eq!(
            classify_line(r#"{"status": "watching", "path": "/repo"}"#),
            WatchRecord::Diagnostic {
                message: "watching".to_string()
            }
        );
    }

    #[test]
    fn other_lines_are_unparsed() {
        assert_eq!(
            classify_line("plain text"),
            WatchRecord::Unparsed {
                line: "plain text".to_string()
            }
        );
        assert!(matches!(classify_line("[1, 2]"), WatchRecord::Unparsed { .. }));
        assert!(matches!(
            classify_line(r#"{"path": "a", "event": "created"}"#),
            WatchRecord::Unparsed { .. }
        ));
    }

    #[tokio::test]
    async fn empty_program_is_spawn_error() {
        let supervisor = WatcherSupervisor::new(Vec::new(), 8);
        let err = supervisor
            .start_watch(Path::new("/repo"))
            .await
            .err()
            .expect("spawn error");
        assert!(matches!(err, WatchError::Spawn { .. }));
        assert!(!supervisor.is_watching(Path::new("/repo")));
    }

    #[tokio::test]
    async fn stop_without_handle_is_safe() {
        let supervisor = WatcherSupervisor::new(vec!["true".to_string()], 8);
        assert!(!supervisor.stop_watch(Path::new("/nowhere")).await);
        supervisor.stop_all().await;
        assert!(supervisor.watched_paths().is_empty());
    }
}
