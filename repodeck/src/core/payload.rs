//! Typed decoding of structured executor payloads.
//!
//! The executor prints JSON objects such as
//! `{"success": true, "status": {"staged": [{"status": "M", "file": "a"}], ...}}`.
//! Fields are optional wherever the executor may omit them.

use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::core::types::{ChangeStatus, Commit, CommitMessage, FileChange, FileTreeNode, StatusLists};
use crate::error::PayloadError;

const SHORT_HASH_LEN: usize = 7;

/// Message carried by a payload with `"success": false`, if it is one.
pub fn rejection(value: &Value) -> Option<String> {
    if value.get("success").and_then(Value::as_bool) != Some(false) {
        return None;
    }
    let message = value
        .get("error")
        .and_then(Value::as_str)
        .filter(|msg| !msg.trim().is_empty())
        .unwrap_or("executor reported failure");
    Some(message.trim().to_string())
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct StatusPayload {
    staged: Vec<PayloadFile>,
    unstaged: Vec<PayloadFile>,
    untracked: Vec<PayloadFile>,
    branch: Option<String>,
    remote: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PayloadFile {
    #[serde(default)]
    status: String,
    #[serde(alias = "path")]
    file: String,
}

/// Status fields decoded from a structured payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedStatus {
    pub lists: StatusLists,
    pub branch: String,
    pub remote_name: String,
}

/// Decode a `status` payload. Accepts either the envelope or the bare status object.
pub fn decode_status(value: &Value) -> Result<DecodedStatus, PayloadError> {
    let inner = value.get("status").filter(|v| v.is_object()).unwrap_or(value);
    let payload: StatusPayload = decode("status", inner)?;

    let mut lists = StatusLists::default();
    for file in payload.staged {
        let change = FileChange::new(ChangeStatus::from_payload_code(&file.status), file.file);
        if !lists.contains_path(&change.path) {
            lists.staged.push(change);
        }
    }
    for file in payload.unstaged {
        let change = FileChange::new(ChangeStatus::from_payload_code(&file.status), file.file);
        if !lists.contains_path(&change.path) {
            lists.unstaged.push(change);
        }
    }
    for file in payload.untracked {
        let change = FileChange::new(ChangeStatus::Untracked, file.file.trim());
        if !lists.contains_path(&change.path) {
            lists.untracked.push(change);
        }
    }

    Ok(DecodedStatus {
        lists,
        branch: payload.branch.unwrap_or_default().trim().to_string(),
        remote_name: remote_name(payload.remote.as_deref().unwrap_or_default()),
    })
}

/// First remote name from `git remote -v` style text.
pub fn remote_name(remote: &str) -> String {
    remote
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_string()
}

#[derive(Debug, Deserialize)]
struct LogPayload {
    commits: Vec<PayloadCommit>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PayloadCommit {
    hash: String,
    short_hash: String,
    author: String,
    email: String,
    date: String,
    subject: String,
    body: String,
}

/// Decode a `log` payload (`{"commits": [...]}`), newest first.
pub fn decode_log(value: &Value) -> Result<Vec<Commit>, PayloadError> {
    let payload: LogPayload = decode("log", value)?;
    Ok(payload
        .commits
        .into_iter()
        .filter(|c| !c.hash.is_empty())
        .map(|c| {
            let short_hash = if c.short_hash.is_empty() {
                c.hash.chars().take(SHORT_HASH_LEN).collect()
            } else {
                c.short_hash
            };
            Commit {
                hash: c.hash,
                short_hash,
                author: c.author,
                email: c.email,
                date: c.date,
                subject: c.subject,
                body: c.body.trim_end().to_string(),
            }
        })
        .collect())
}

/// Extract the raw diff text from a `diff` payload.
pub fn decode_diff_text(value: &Value) -> Result<String, PayloadError> {
    match value.get("diff") {
        Some(Value::String(text)) => Ok(text.clone()),
        Some(Value::Null) => Ok(String::new()),
        _ => Err(PayloadError {
            what: "diff",
            message: "missing `diff` string".to_string(),
        }),
    }
}

/// Outcome of a mutating operation as reported by the executor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperationOutcome {
    /// Human-readable message (`output` field, or the raw text).
    #[serde(rename = "output")]
    pub message: Option<String>,
    pub commit_hash: Option<String>,
    /// Set when the operation succeeded but the follow-up refresh failed.
    #[serde(skip_deserializing)]
    pub refresh_error: Option<String>,
}

pub fn decode_outcome(value: &Value) -> OperationOutcome {
    let mut outcome: OperationOutcome = serde_json::from_value(value.clone()).unwrap_or_default();
    outcome.message = outcome
        .message
        .map(|msg| msg.trim().to_string())
        .filter(|msg| !msg.is_empty());
    outcome
}

pub fn outcome_from_text(text: &str) -> OperationOutcome {
    let trimmed = text.trim();
    OperationOutcome {
        message: (!trimmed.is_empty()).then(|| trimmed.to_string()),
        ..OperationOutcome::default()
    }
}

#[derive(Debug, Deserialize)]
struct FileTreePayload {
    tree: FileTreeNode,
}

pub fn decode_file_tree(value: &Value) -> Result<FileTreeNode, PayloadError> {
    let payload: FileTreePayload = decode("file-tree", value)?;
    Ok(payload.tree)
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CommitMessagePayload {
    message: Option<String>,
    model: Option<String>,
    warning: Option<String>,
}

/// Decode a generator reply. Returns `None` when no usable message is present.
pub fn decode_commit_message(value: &Value) -> Option<CommitMessage> {
    let payload: CommitMessagePayload = serde_json::from_value(value.clone()).ok()?;
    let message = payload.message?.trim().to_string();
    if message.is_empty() {
        return None;
    }
    Some(CommitMessage {
        message,
        model: payload.model,
        warning: payload.warning,
    })
}

fn decode<T: DeserializeOwned>(what: &'static str, value: &Value) -> Result<T, PayloadError> {
    serde_json::from_value(value.clone()).map_err(|err| PayloadError {
        what,
        message: err.to_string(),
    })
}
