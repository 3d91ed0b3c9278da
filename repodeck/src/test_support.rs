//! Test-only helpers: a scripted command channel and throwaway repositories.

use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tempfile::TempDir;

use crate::io::channel::{CommandChannel, CommandRequest, CommandResult};

/// Channel that replays scripted results per operation without spawning anything.
///
/// Results for one operation are consumed in push order; an operation with no
/// scripted result left returns `Raw("")`. Every call is recorded, and the
/// journal records `start:<op>:<params>` / `end:<op>:<params>` around each one
/// so tests can check that calls never interleave.
#[derive(Clone, Default)]
pub struct ScriptedChannel {
    script: Arc<Mutex<Script>>,
}

#[derive(Default)]
struct Script {
    replies: HashMap<String, VecDeque<(CommandResult, Duration)>>,
    calls: Vec<CommandRequest>,
    journal: Vec<String>,
}

impl ScriptedChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, operation: &str, result: CommandResult) {
        self.push_delayed(operation, result, Duration::ZERO);
    }

    /// Script a result that is returned only after `delay`.
    pub fn push_delayed(&self, operation: &str, result: CommandResult, delay: Duration) {
        self.script
            .lock()
            .replies
            .entry(operation.to_string())
            .or_default()
            .push_back((result, delay));
    }

    pub fn calls(&self) -> Vec<CommandRequest> {
        self.script.lock().calls.clone()
    }

    pub fn operations(&self) -> Vec<String> {
        self.script
            .lock()
            .calls
            .iter()
            .map(|call| call.operation.clone())
            .collect()
    }

    pub fn journal(&self) -> Vec<String> {
        self.script.lock().journal.clone()
    }
}

impl CommandChannel for ScriptedChannel {
    async fn execute(&self, request: &CommandRequest) -> CommandResult {
        let tag = format!("{}:{}", request.operation, request.params.join(","));
        let (result, delay) = {
            let mut script = self.script.lock();
            script.calls.push(request.clone());
            script.journal.push(format!("start:{tag}"));
            script
                .replies
                .get_mut(&request.operation)
                .and_then(VecDeque::pop_front)
                .unwrap_or((CommandResult::Raw(String::new()), Duration::ZERO))
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.script.lock().journal.push(format!("end:{tag}"));
        result
    }
}

/// Temporary directory with an empty `.git` directory, removed on drop.
pub struct TestRepo {
    dir: TempDir,
}

impl TestRepo {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("create temp repo");
        fs::create_dir(dir.path().join(".git")).expect("create .git");
        Self { dir }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write `contents` to `relative`, creating parent directories.
    pub fn write(&self, relative: &str, contents: &str) {
        let path = self.dir.path().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent dirs");
        }
        fs::write(path, contents).expect("write file");
    }
}

impl Default for TestRepo {
    fn default() -> Self {
        Self::new()
    }
}
