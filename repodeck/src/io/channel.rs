//! Command channel: one executor invocation in, one [`CommandResult`] out.
//!
//! The [`CommandChannel`] trait decouples the store from the actual executor
//! process. Tests use a scripted channel that returns predetermined results
//! without spawning anything.

use std::ffi::OsString;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::Value;
use tokio::process::Command;
use tracing::{debug, instrument, warn};

use crate::error::CommandError;
use crate::io::config::Config;
use crate::io::process::{CommandOutput, run_command_with_timeout};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_OUTPUT_LIMIT_BYTES: usize = 1_000_000;

/// Parameters for one executor invocation: `[operation, repo_path, ...params]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRequest {
    pub operation: String,
    pub repo_path: PathBuf,
    pub params: Vec<String>,
}

impl CommandRequest {
    pub fn new(operation: impl Into<String>, repo_path: &Path, params: Vec<String>) -> Self {
        Self {
            operation: operation.into(),
            repo_path: repo_path.to_path_buf(),
            params,
        }
    }

    fn argv(&self) -> Vec<OsString> {
        let mut argv = Vec::with_capacity(self.params.len() + 2);
        argv.push(OsString::from(&self.operation));
        argv.push(self.repo_path.clone().into_os_string());
        argv.extend(self.params.iter().map(OsString::from));
        argv
    }
}

/// Result of one invocation. Exactly one variant; never data and error together.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandResult {
    /// Exit 0 and stdout was JSON.
    Parsed(Value),
    /// Exit 0 and stdout was not JSON; the text verbatim.
    Raw(String),
    Failed(CommandError),
}

/// Abstraction over executor backends.
pub trait CommandChannel: Send + Sync + 'static {
    /// Run one invocation to completion. Never cancelled mid-flight by the caller.
    fn execute(&self, request: &CommandRequest) -> impl Future<Output = CommandResult> + Send;
}

/// Channel that spawns an external executor process per invocation.
#[derive(Debug, Clone)]
pub struct ExecutorChannel {
    /// Program and leading arguments, e.g. `["python3", "git_operations.py"]`.
    program: Vec<String>,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl ExecutorChannel {
    /// `program` must be non-empty; its first element is the executable.
    pub fn new(program: Vec<String>) -> Self {
        Self {
            program,
            timeout: DEFAULT_TIMEOUT,
            output_limit_bytes: DEFAULT_OUTPUT_LIMIT_BYTES,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_output_limit(mut self, bytes: usize) -> Self {
        self.output_limit_bytes = bytes;
        self
    }

    pub fn executor_from_config(cfg: &Config) -> Self {
        Self::new(cfg.executor.command.clone())
            .with_timeout(Duration::from_secs(cfg.command_timeout_secs))
            .with_output_limit(cfg.output_limit_bytes)
    }

    /// Channel for the message generator, if one is configured.
    pub fn generator_from_config(cfg: &Config) -> Option<Self> {
        let command = cfg.generator.command.clone()?;
        Some(
            Self::new(command)
                .with_timeout(Duration::from_secs(cfg.command_timeout_secs))
                .with_output_limit(cfg.output_limit_bytes),
        )
    }

    /// Run the configured program with `args` appended and interpret the output.
    #[instrument(skip_all, fields(program = ?self.program.first()))]
    pub async fn invoke(&self, args: Vec<OsString>) -> CommandResult {
        let Some((exe, prefix)) = self.program.split_first() else {
            return CommandResult::Failed(CommandError::Spawn {
                message: "executor command is empty".to_string(),
            });
        };
        let mut cmd = Command::new(exe);
        cmd.args(prefix).args(args);

        match run_command_with_timeout(cmd, self.timeout, self.output_limit_bytes).await {
            Ok(output) => interpret_output(&output),
            Err(err) => {
                warn!(err = %err, "executor invocation failed");
                CommandResult::Failed(err)
            }
        }
    }
}

impl CommandChannel for ExecutorChannel {
    async fn execute(&self, request: &CommandRequest) -> CommandResult {
        debug!(
            operation = %request.operation,
            repo = %request.repo_path.display(),
            params = request.params.len(),
            "executing"
        );
        self.invoke(request.argv()).await
    }
}

/// Classify a finished process into a [`CommandResult`].
///
/// Truncated stdout on a successful exit is a failure, never `Raw`.
pub fn interpret_output(output: &CommandOutput) -> CommandResult {
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stderr = stderr.trim();
        let message = if stderr.is_empty() {
            match output.status.code() {
                Some(code) => format!("process exited with code {code}"),
                None => "process exited with code unknown".to_string(),
            }
        } else {
            stderr.to_string()
        };
        return CommandResult::Failed(CommandError::NonZeroExit {
            code: output.status.code(),
            message,
        });
    }

    if output.stdout_truncated > 0 {
        warn!(
            kept = output.stdout.len(),
            dropped = output.stdout_truncated,
            "executor output truncated, discarding result"
        );
        return CommandResult::Failed(CommandError::OutputTruncated {
            kept: output.stdout.len(),
            dropped: output.stdout_truncated,
        });
    }

    match serde_json::from_slice::<Value>(&output.stdout) {
        Ok(value) => CommandResult::Parsed(value),
        Err(_) => CommandResult::Raw(String::from_utf8_lossy(&output.stdout).into_owned()),
    }
}
