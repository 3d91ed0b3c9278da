//! Helpers for running child processes with timeouts and bounded output.

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, error, instrument, warn};

use crate::error::CommandError;

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
}

/// Run a command with a timeout and capture stdout/stderr without risking pipe deadlocks.
///
/// Both pipes are drained concurrently while the child runs. `output_limit_bytes` bounds
/// what is kept in memory; bytes beyond it are read and discarded. On timeout the child is
/// killed and [`CommandError::Timeout`] is returned. The timeout bounds both the wait and
/// the draining of the pipes.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes = output_limit_bytes))]
pub async fn run_command_with_timeout(
    mut cmd: Command,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CommandOutput, CommandError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(CommandError::Spawn {
                message: e.to_string(),
            });
        }
    };

    let stdout = child.stdout.take().ok_or_else(|| CommandError::Io {
        message: "stdout was not piped".to_string(),
    })?;
    let stderr = child.stderr.take().ok_or_else(|| CommandError::Io {
        message: "stderr was not piped".to_string(),
    })?;

    let stdout_handle = tokio::spawn(read_stream_limited(stdout, output_limit_bytes));
    let stderr_handle = tokio::spawn(read_stream_limited(stderr, output_limit_bytes));
    let readers = [stdout_handle.abort_handle(), stderr_handle.abort_handle()];

    // The deadline covers draining too: a backgrounded grandchild can hold the pipes open.
    let collected = tokio::time::timeout(timeout, async {
        let status = child.wait().await.map_err(io_error)?;
        let stdout = join_output(stdout_handle).await?;
        let stderr = join_output(stderr_handle).await?;
        Ok::<_, CommandError>((status, stdout, stderr))
    })
    .await;

    let (status, (stdout, stdout_truncated), (stderr, stderr_truncated)) = match collected {
        Ok(result) => result?,
        Err(_) => {
            warn!(
                timeout_secs = timeout.as_secs(),
                "command timed out, killing"
            );
            if let Err(e) = child.kill().await {
                debug!(err = %e, "timed out command already exited");
            }
            for reader in &readers {
                reader.abort();
            }
            return Err(CommandError::Timeout {
                secs: timeout.as_secs(),
            });
        }
    };

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
    })
}

async fn join_output(
    handle: JoinHandle<std::io::Result<(Vec<u8>, usize)>>,
) -> Result<(Vec<u8>, usize), CommandError> {
    match handle.await {
        Ok(result) => result.map_err(io_error),
        Err(_) => Err(CommandError::Io {
            message: "output reader task failed".to_string(),
        }),
    }
}

async fn read_stream_limited<R: AsyncRead + Unpin>(
    mut reader: R,
    limit: usize,
) -> std::io::Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        let remaining = limit.saturating_sub(buf.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            buf.extend_from_slice(&chunk[..keep]);
            truncated += n.saturating_sub(keep);
        } else {
            truncated += n;
        }
    }

    Ok((buf, truncated))
}

fn io_error(err: std::io::Error) -> CommandError {
    CommandError::Io {
        message: err.to_string(),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[tokio::test]
    async fn captures_both_streams() {
        let out = run_command_with_timeout(
            sh("printf out; printf err >&2; exit 3"),
            Duration::from_secs(5),
            1024,
        )
        .await
        .expect("run");
        assert_eq!(out.status.code(), Some(3));
        assert_eq!(out.stdout, b"out");
        assert_eq!(out.stderr, b"err");
    }

    #[tokio::test]
    async fn truncates_beyond_limit() {
        let out = run_command_with_timeout(sh("printf 0123456789"), Duration::from_secs(5), 4)
            .await
            .expect("run");
        assert_eq!(out.stdout, b"0123");
        assert_eq!(out.stdout_truncated, 6);
    }

    #[tokio::test]
    async fn times_out_and_kills() {
        let err = run_command_with_timeout(sh("sleep 5"), Duration::from_millis(100), 1024)
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::Timeout { .. }));
    }

    #[tokio::test]
    async fn pipes_held_by_background_job_still_time_out() {
        let started = std::time::Instant::now();
        let err = run_command_with_timeout(
            sh("sleep 4 & printf ok"),
            Duration::from_millis(300),
            1024,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CommandError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn missing_program_is_spawn_failure() {
        let err = run_command_with_timeout(
            Command::new("/definitely/not/a/real/executable"),
            Duration::from_secs(1),
            1024,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CommandError::Spawn { .. }));
    }
}
