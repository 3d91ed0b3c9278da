//! Command channel against real processes.

#![cfg(unix)]

use std::path::Path;
use std::time::{Duration, Instant};

use repodeck::error::CommandError;
use repodeck::io::channel::{CommandChannel, CommandRequest, CommandResult, ExecutorChannel};
use serde_json::json;

fn inline(script: &str) -> ExecutorChannel {
    ExecutorChannel::new(vec![
        "sh".to_string(),
        "-c".to_string(),
        script.to_string(),
        "executor".to_string(),
    ])
}

fn status_request() -> CommandRequest {
    CommandRequest::new("status", Path::new("/repo"), Vec::new())
}

#[tokio::test]
async fn nonzero_exit_carries_stderr_message() {
    let channel = inline("echo 'fatal: not a git repository' >&2; exit 128");
    let result = channel.execute(&status_request()).await;
    assert_eq!(
        result,
        CommandResult::Failed(CommandError::NonZeroExit {
            code: Some(128),
            message: "fatal: not a git repository".to_string(),
        })
    );
}

#[tokio::test]
async fn plain_text_is_raw() {
    let channel = inline("printf 'Staged files successfully'");
    let result = channel.execute(&status_request()).await;
    assert_eq!(
        result,
        CommandResult::Raw("Staged files successfully".to_string())
    );
}

#[tokio::test]
async fn json_is_parsed() {
    let channel = inline(r#"printf '{"success": true, "diff": ""}'"#);
    let result = channel.execute(&status_request()).await;
    assert_eq!(
        result,
        CommandResult::Parsed(json!({"success": true, "diff": ""}))
    );
}

#[tokio::test]
async fn arguments_follow_operation_and_path() {
    let channel = inline(r#"printf '%s|' "$@""#);
    let request = CommandRequest::new(
        "commit",
        Path::new("/work/app"),
        vec!["fix: typo".to_string(), "a b.txt".to_string()],
    );
    let result = channel.execute(&request).await;
    assert_eq!(
        result,
        CommandResult::Raw("commit|/work/app|fix: typo|a b.txt|".to_string())
    );
}

#[tokio::test]
async fn slow_executor_times_out() {
    let channel = inline("sleep 5").with_timeout(Duration::from_millis(200));
    let result = channel.execute(&status_request()).await;
    assert!(matches!(
        result,
        CommandResult::Failed(CommandError::Timeout { .. })
    ));
}

#[tokio::test]
async fn missing_executable_is_spawn_failure() {
    let channel = ExecutorChannel::new(vec!["/nonexistent/repodeck-executor".to_string()]);
    let result = channel.execute(&status_request()).await;
    assert!(matches!(
        result,
        CommandResult::Failed(CommandError::Spawn { .. })
    ));
}

#[tokio::test]
async fn oversized_output_fails_instead_of_parsing_a_prefix() {
    let channel = inline(r#"printf '{"success": true, "diff": "@@ -1 +1 @@\n-a\n+b\n"}'"#)
        .with_output_limit(20);
    let result = channel.execute(&status_request()).await;
    assert!(matches!(
        result,
        CommandResult::Failed(CommandError::OutputTruncated { kept: 20, .. })
    ));
}

#[tokio::test]
async fn background_job_holding_stdout_does_not_outlive_timeout() {
    let channel = inline("sleep 4 & printf ok").with_timeout(Duration::from_millis(500));
    let started = Instant::now();
    let result = channel.execute(&status_request()).await;
    assert!(matches!(
        result,
        CommandResult::Failed(CommandError::Timeout { .. })
    ));
    assert!(started.elapsed() < Duration::from_secs(3));
}
