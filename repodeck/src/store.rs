//! Repository State Store.
//!
//! Holds the last-known status and history per repository and routes every
//! operation for a repository through that repository's serial queue. A
//! mutation completes only after the follow-up status refresh (and history
//! refresh for commit/pull) has been applied, so a snapshot read right after
//! awaiting a mutation reflects it.
//!
//! Repositories are keyed by their discovered root directory.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::core::commit_message::fallback_message;
use crate::core::diff::parse_diff;
use crate::core::log::parse_log;
use crate::core::payload::{self, OperationOutcome};
use crate::core::status::{parse_branch, parse_status};
use crate::core::types::{
    Commit, CommitMessage, DiffHunk, FileChange, FileTreeNode, RepositoryState, WatchRecord,
};
use crate::error::{PayloadError, StoreError};
use crate::io::channel::{CommandChannel, CommandRequest, CommandResult, ExecutorChannel};
use crate::io::config::Config;
use crate::io::queue::SerialQueues;
use crate::io::repo;
use crate::io::watcher::{WatchSubscription, WatcherSupervisor};

pub const DEFAULT_REMOTE: &str = "origin";
pub const DEFAULT_BRANCH: &str = "main";
const FALLBACK_MODEL: &str = "fallback";
const EVENT_CAPACITY: usize = 64;

/// A state-changing operation on one repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    Stage { file: String },
    Unstage { file: String },
    StageAll,
    UnstageAll,
    AddUntracked { file: String },
    AddAllUntracked,
    Commit { message: String, files: Vec<String> },
    Push { remote: String, branch: String },
    Pull { remote: String, branch: String },
    Init,
}

impl Mutation {
    /// Executor operation name.
    pub fn operation(&self) -> &'static str {
        match self {
            Self::Stage { .. } => "stage",
            Self::Unstage { .. } => "unstage",
            Self::StageAll => "stage-all",
            Self::UnstageAll => "unstage-all",
            Self::AddUntracked { .. } => "add-untracked",
            Self::AddAllUntracked => "add-all-untracked",
            Self::Commit { .. } => "commit",
            Self::Push { .. } => "push",
            Self::Pull { .. } => "pull",
            Self::Init => "init",
        }
    }

    fn params(&self) -> Vec<String> {
        match self {
            Self::Stage { file } | Self::Unstage { file } | Self::AddUntracked { file } => {
                vec![file.clone()]
            }
            Self::Commit { message, files } => {
                let mut params = Vec::with_capacity(files.len() + 1);
                params.push(message.clone());
                params.extend(files.iter().cloned());
                params
            }
            Self::Push { remote, branch } | Self::Pull { remote, branch } => {
                vec![remote.clone(), branch.clone()]
            }
            Self::StageAll | Self::UnstageAll | Self::AddAllUntracked | Self::Init => Vec::new(),
        }
    }

    fn refreshes_history(&self) -> bool {
        matches!(self, Self::Commit { .. } | Self::Pull { .. })
    }
}

/// Published after each successful refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StoreEvent {
    StatusUpdated { state: RepositoryState },
    HistoryUpdated { path: PathBuf, commits: Vec<Commit> },
}

#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Commit message generator; `None` means always use the fallback message.
    pub generator: Option<ExecutorChannel>,
    pub history_limit: u32,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            generator: None,
            history_limit: 50,
        }
    }
}

impl StoreOptions {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            generator: ExecutorChannel::generator_from_config(cfg),
            history_limit: cfg.history_limit,
        }
    }
}

/// Future for an operation that was placed on a repository queue.
///
/// The operation is enqueued when the store method is called, not when this
/// future is first polled. Dropping it does not cancel the operation.
#[must_use = "the operation is queued regardless; await to observe its result"]
pub struct Queued<T> {
    state: QueuedState<T>,
}

enum QueuedState<T> {
    Rejected(Option<StoreError>),
    Pending(oneshot::Receiver<Result<T, StoreError>>),
}

impl<T> Queued<T> {
    fn rejected(err: StoreError) -> Self {
        Self {
            state: QueuedState::Rejected(Some(err)),
        }
    }

    fn pending(rx: oneshot::Receiver<Result<T, StoreError>>) -> Self {
        Self {
            state: QueuedState::Pending(rx),
        }
    }
}

impl<T> Future for Queued<T> {
    type Output = Result<T, StoreError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.state {
            QueuedState::Rejected(err) => {
                Poll::Ready(Err(err.take().unwrap_or(StoreError::QueueClosed)))
            }
            QueuedState::Pending(rx) => Pin::new(rx)
                .poll(cx)
                .map(|reply| reply.unwrap_or(Err(StoreError::QueueClosed))),
        }
    }
}

enum Reply {
    Json(Value),
    Text(String),
}

struct Inner<C> {
    channel: C,
    generator: Option<ExecutorChannel>,
    history_limit: u32,
    queues: SerialQueues<PathBuf>,
    states: Mutex<HashMap<PathBuf, RepositoryState>>,
    histories: Mutex<HashMap<PathBuf, Vec<Commit>>>,
    events: broadcast::Sender<StoreEvent>,
}

/// The stateful front of the orchestration core.
pub struct RepoStore<C = ExecutorChannel> {
    inner: Arc<Inner<C>>,
    watchers: WatcherSupervisor,
    followers: Mutex<HashMap<PathBuf, JoinHandle<()>>>,
}

impl RepoStore<ExecutorChannel> {
    pub fn from_config(cfg: &Config) -> Self {
        Self::new(
            ExecutorChannel::executor_from_config(cfg),
            WatcherSupervisor::from_config(cfg),
            StoreOptions::from_config(cfg),
        )
    }
}

impl<C: CommandChannel> RepoStore<C> {
    pub fn new(channel: C, watchers: WatcherSupervisor, options: StoreOptions) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                channel,
                generator: options.generator,
                history_limit: options.history_limit.max(1),
                queues: SerialQueues::new(),
                states: Mutex::new(HashMap::new()),
                histories: Mutex::new(HashMap::new()),
                events,
            }),
            watchers,
            followers: Mutex::new(HashMap::new()),
        }
    }

    /// Repository root for `path`, or `InvalidRepositoryPath`.
    pub fn resolve(&self, path: &Path) -> Result<PathBuf, StoreError> {
        repo::discover_root(path).ok_or_else(|| StoreError::InvalidRepositoryPath(path.to_path_buf()))
    }

    /// Queue `mutation` on `path`'s repository.
    ///
    /// Completes after the operation and its refreshes. A refresh failure after a
    /// successful operation is reported in [`OperationOutcome::refresh_error`]
    /// and drops the stale cache entry rather than failing the call.
    pub fn apply(&self, path: &Path, mutation: Mutation) -> Queued<OperationOutcome> {
        let key = if matches!(mutation, Mutation::Init) {
            repo::normalize(path)
        } else {
            match self.resolve(path) {
                Ok(key) => key,
                Err(err) => return Queued::rejected(err),
            }
        };
        self.submit(key, move |inner, key| async move { inner.apply(&key, mutation).await })
    }

    pub fn stage(&self, path: &Path, file: &str) -> Queued<OperationOutcome> {
        self.apply(path, Mutation::Stage { file: file.to_string() })
    }

    pub fn unstage(&self, path: &Path, file: &str) -> Queued<OperationOutcome> {
        self.apply(path, Mutation::Unstage { file: file.to_string() })
    }

    pub fn stage_all(&self, path: &Path) -> Queued<OperationOutcome> {
        self.apply(path, Mutation::StageAll)
    }

    pub fn unstage_all(&self, path: &Path) -> Queued<OperationOutcome> {
        self.apply(path, Mutation::UnstageAll)
    }

    pub fn add_untracked(&self, path: &Path, file: &str) -> Queued<OperationOutcome> {
        self.apply(path, Mutation::AddUntracked { file: file.to_string() })
    }

    pub fn add_all_untracked(&self, path: &Path) -> Queued<OperationOutcome> {
        self.apply(path, Mutation::AddAllUntracked)
    }

    pub fn commit(&self, path: &Path, message: &str, files: &[String]) -> Queued<OperationOutcome> {
        self.apply(
            path,
            Mutation::Commit {
                message: message.to_string(),
                files: files.to_vec(),
            },
        )
    }

    pub fn push(&self, path: &Path, remote: &str, branch: &str) -> Queued<OperationOutcome> {
        self.apply(
            path,
            Mutation::Push {
                remote: remote.to_string(),
                branch: branch.to_string(),
            },
        )
    }

    pub fn pull(&self, path: &Path, remote: &str, branch: &str) -> Queued<OperationOutcome> {
        self.apply(
            path,
            Mutation::Pull {
                remote: remote.to_string(),
                branch: branch.to_string(),
            },
        )
    }

    pub fn init(&self, path: &Path) -> Queued<OperationOutcome> {
        self.apply(path, Mutation::Init)
    }

    pub fn refresh_status(&self, path: &Path) -> Queued<RepositoryState> {
        self.submit_resolved(path, |inner, key| async move { inner.fetch_status(&key).await })
    }

    pub fn refresh_history(&self, path: &Path) -> Queued<Vec<Commit>> {
        self.submit_resolved(path, |inner, key| async move { inner.fetch_history(&key).await })
    }

    /// Hunks of the working-tree diff for `file`. Not cached.
    pub fn diff(&self, path: &Path, file: &str) -> Queued<Vec<DiffHunk>> {
        let file = file.to_string();
        self.submit_resolved(path, move |inner, key| async move {
            let text = match inner.run("diff", &key, vec![file]).await? {
                Reply::Json(value) => payload::decode_diff_text(&value)?,
                Reply::Text(text) => text,
            };
            Ok(parse_diff(&text))
        })
    }

    pub fn file_tree(&self, path: &Path) -> Queued<FileTreeNode> {
        self.submit_resolved(path, |inner, key| async move {
            match inner.run("file-tree", &key, Vec::new()).await? {
                Reply::Json(value) => Ok(payload::decode_file_tree(&value)?),
                Reply::Text(_) => Err(PayloadError {
                    what: "file-tree",
                    message: "expected a JSON object".to_string(),
                }
                .into()),
            }
        })
    }

    /// Last published state for `path`'s repository, without touching the queue.
    pub fn snapshot(&self, path: &Path) -> Option<RepositoryState> {
        self.inner.states.lock().get(&self.cache_key(path)).cloned()
    }

    pub fn history(&self, path: &Path) -> Option<Vec<Commit>> {
        self.inner.histories.lock().get(&self.cache_key(path)).cloned()
    }

    /// Drop cached state and the idle queue for `path`'s repository.
    pub fn forget(&self, path: &Path) {
        let key = self.cache_key(path);
        self.inner.states.lock().remove(&key);
        self.inner.histories.lock().remove(&key);
        self.inner.queues.remove(&key);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.inner.events.subscribe()
    }

    /// Suggest a commit message for `changes`, falling back to a local summary
    /// when the generator is missing or fails.
    #[instrument(skip_all, fields(repo = %path.display(), changes = changes.len()))]
    pub async fn generate_commit_message(
        &self,
        path: &Path,
        changes: &[FileChange],
    ) -> Result<CommitMessage, StoreError> {
        let root = self.resolve(path)?;
        let fallback = |warning: Option<String>| CommitMessage {
            message: fallback_message(changes),
            model: Some(FALLBACK_MODEL.to_string()),
            warning,
        };
        let Some(generator) = &self.inner.generator else {
            return Ok(fallback(None));
        };

        let wire: Vec<WireChange<'_>> = changes
            .iter()
            .map(|change| WireChange {
                status: change.status.code(),
                file: &change.path,
            })
            .collect();
        let changes_json = serde_json::to_string(&wire).map_err(|err| PayloadError {
            what: "changes",
            message: err.to_string(),
        })?;

        let suggestion = match generator
            .invoke(vec![root.into_os_string(), changes_json.into()])
            .await
        {
            CommandResult::Parsed(value) => match payload::rejection(&value) {
                Some(message) => fallback(Some(format!("Using fallback message: {message}"))),
                None => payload::decode_commit_message(&value).unwrap_or_else(|| {
                    fallback(Some("Using fallback message: generator returned no message".to_string()))
                }),
            },
            CommandResult::Raw(text) if !text.trim().is_empty() => CommitMessage {
                message: text.trim().to_string(),
                model: None,
                warning: None,
            },
            CommandResult::Raw(_) => {
                fallback(Some("Using fallback message: generator returned no message".to_string()))
            }
            CommandResult::Failed(err) => {
                warn!(err = %err, "commit message generator failed");
                fallback(Some(format!("Using fallback message: {err}")))
            }
        };
        Ok(suggestion)
    }

    /// Start watching `path`'s repository.
    ///
    /// Change records queue a status refresh; a burst of records arriving while
    /// a refresh is still pending results in a single refresh. The returned
    /// subscription yields the raw records.
    pub async fn watch(&self, path: &Path) -> Result<WatchSubscription, StoreError> {
        let key = self.resolve(path)?;
        let records = self.watchers.start_watch(&key).await?;
        let caller = records.resubscribe();

        let follower = tokio::spawn(follow(Arc::clone(&self.inner), key.clone(), records));
        if let Some(previous) = self.followers.lock().insert(key, follower) {
            previous.abort();
        }
        Ok(caller)
    }

    /// Stop watching. Returns false if nothing was being watched.
    pub async fn unwatch(&self, path: &Path) -> bool {
        let key = self.cache_key(path);
        if let Some(follower) = self.followers.lock().remove(&key) {
            follower.abort();
        }
        self.watchers.stop_watch(&key).await
    }

    pub fn watchers(&self) -> &WatcherSupervisor {
        &self.watchers
    }

    /// Terminate every watcher process. Queued operations still run to completion.
    pub async fn shutdown(&self) {
        let followers: Vec<JoinHandle<()>> =
            self.followers.lock().drain().map(|(_, handle)| handle).collect();
        for follower in followers {
            follower.abort();
        }
        self.watchers.stop_all().await;
        info!("store shut down");
    }

    fn cache_key(&self, path: &Path) -> PathBuf {
        repo::discover_root(path).unwrap_or_else(|| repo::normalize(path))
    }

    fn submit_resolved<T, F, Fut>(&self, path: &Path, job: F) -> Queued<T>
    where
        F: FnOnce(Arc<Inner<C>>, PathBuf) -> Fut,
        Fut: Future<Output = Result<T, StoreError>> + Send + 'static,
        T: Send + 'static,
    {
        match self.resolve(path) {
            Ok(key) => self.submit(key, job),
            Err(err) => Queued::rejected(err),
        }
    }

    fn submit<T, F, Fut>(&self, key: PathBuf, job: F) -> Queued<T>
    where
        F: FnOnce(Arc<Inner<C>>, PathBuf) -> Fut,
        Fut: Future<Output = Result<T, StoreError>> + Send + 'static,
        T: Send + 'static,
    {
        let job = job(Arc::clone(&self.inner), key.clone());
        Queued::pending(self.inner.queues.submit(key, job))
    }
}

#[derive(Serialize)]
struct WireChange<'a> {
    status: &'static str,
    file: &'a str,
}

impl<C: CommandChannel> Inner<C> {
    async fn run(&self, operation: &str, path: &Path, params: Vec<String>) -> Result<Reply, StoreError> {
        let request = CommandRequest::new(operation, path, params);
        match self.channel.execute(&request).await {
            CommandResult::Parsed(value) => match payload::rejection(&value) {
                Some(message) => Err(StoreError::Rejected { message }),
                None => Ok(Reply::Json(value)),
            },
            CommandResult::Raw(text) => Ok(Reply::Text(text)),
            CommandResult::Failed(err) => Err(err.into()),
        }
    }

    #[instrument(skip_all, fields(repo = %path.display(), operation = mutation.operation()))]
    async fn apply(&self, path: &Path, mutation: Mutation) -> Result<OperationOutcome, StoreError> {
        let mut outcome = match self.run(mutation.operation(), path, mutation.params()).await? {
            Reply::Json(value) => payload::decode_outcome(&value),
            Reply::Text(text) => payload::outcome_from_text(&text),
        };

        if let Err(err) = self.fetch_status(path).await {
            warn!(err = %err, "status refresh after mutation failed");
            self.states.lock().remove(path);
            outcome.refresh_error = Some(err.to_string());
            return Ok(outcome);
        }
        if mutation.refreshes_history()
            && let Err(err) = self.fetch_history(path).await
        {
            warn!(err = %err, "history refresh after mutation failed");
            self.histories.lock().remove(path);
            outcome.refresh_error = Some(err.to_string());
        }
        Ok(outcome)
    }

    async fn fetch_status(&self, path: &Path) -> Result<RepositoryState, StoreError> {
        let state = match self.run("status", path, Vec::new()).await? {
            Reply::Json(value) => {
                let decoded = payload::decode_status(&value)?;
                RepositoryState::new(
                    path.to_path_buf(),
                    decoded.branch,
                    decoded.remote_name,
                    decoded.lists,
                )
            }
            Reply::Text(text) => RepositoryState::new(
                path.to_path_buf(),
                parse_branch(&text).unwrap_or_default(),
                String::new(),
                parse_status(&text),
            ),
        };
        debug!(
            repo = %path.display(),
            staged = state.staged.len(),
            unstaged = state.unstaged.len(),
            untracked = state.untracked.len(),
            "status refreshed"
        );
        self.states.lock().insert(path.to_path_buf(), state.clone());
        let _ = self.events.send(StoreEvent::StatusUpdated {
            state: state.clone(),
        });
        Ok(state)
    }

    async fn fetch_history(&self, path: &Path) -> Result<Vec<Commit>, StoreError> {
        let limit = vec![self.history_limit.to_string()];
        let commits = match self.run("log", path, limit).await? {
            Reply::Json(value) => payload::decode_log(&value)?,
            Reply::Text(text) => parse_log(&text),
        };
        debug!(repo = %path.display(), commits = commits.len(), "history refreshed");
        self.histories
            .lock()
            .insert(path.to_path_buf(), commits.clone());
        let _ = self.events.send(StoreEvent::HistoryUpdated {
            path: path.to_path_buf(),
            commits: commits.clone(),
        });
        Ok(commits)
    }
}

async fn follow<C: CommandChannel>(inner: Arc<Inner<C>>, key: PathBuf, mut records: WatchSubscription) {
    let pending = Arc::new(AtomicBool::new(false));
    while let Some(record) = records.recv().await {
        match record {
            WatchRecord::Change(change) => {
                if pending.swap(true, Ordering::AcqRel) {
                    continue;
                }
                debug!(repo = %key.display(), path = %change.path, event = %change.event, "change detected, refreshing");
                let flag = Arc::clone(&pending);
                let job_inner = Arc::clone(&inner);
                let job_key = key.clone();
                // Fire and forget; the result lands in the cache and the event stream.
                drop(inner.queues.submit(key.clone(), async move {
                    flag.store(false, Ordering::Release);
                    if let Err(err) = job_inner.fetch_status(&job_key).await {
                        warn!(repo = %job_key.display(), err = %err, "watch-triggered refresh failed");
                    }
                }));
            }
            WatchRecord::Diagnostic { message } => {
                debug!(repo = %key.display(), message = %message, "watcher diagnostic");
            }
            WatchRecord::Unparsed { line } => {
                debug!(repo = %key.display(), line = %line, "unrecognized watcher output");
            }
        }
    }
    debug!(repo = %key.display(), "watch stream ended");
}
