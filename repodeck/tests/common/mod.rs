//! Shell-script executors and watchers shared by the integration tests.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Executor that journals `start:<op>`/`end:<op>` to `$repo/.journal` and
/// answers a handful of operations. `stage` is deliberately slow.
pub const EXECUTOR: &str = r#"#!/bin/sh
op="$1"
repo="$2"
shift 2
echo "start:$op" >> "$repo/.journal"
case "$op" in
  status)
    printf '%s\n' '{"success": true, "status": {"staged": [{"status": "A", "file": "new.txt"}], "unstaged": [{"status": "M", "file": "a.txt"}], "untracked": [{"status": "??", "file": "notes.md"}], "branch": "main", "remote": "origin\tgit@example.com:team/app.git (fetch)"}}'
    ;;
  log)
    printf 'commit 0123456789abcdef\nAuthor: Dev <dev@example.com>\nDate:   Mon Jan 1 10:00:00 2024 +0000\n\n    initial import\n'
    ;;
  stage)
    sleep 0.3
    echo "Staged $1"
    ;;
  unstage)
    echo "Unstaged $1"
    ;;
  commit)
    printf '{"success": true, "output": "1 file changed", "commit_hash": "0123456"}\n'
    ;;
  push)
    echo "fatal: could not read from remote repository" >&2
    echo "end:$op" >> "$repo/.journal"
    exit 128
    ;;
esac
echo "end:$op" >> "$repo/.journal"
"#;

pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, body).expect("write script");
    path
}

pub fn sh(script: &Path) -> Vec<String> {
    vec!["sh".to_string(), script.display().to_string()]
}

pub fn journal(repo: &Path) -> Vec<String> {
    fs::read_to_string(repo.join(".journal"))
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

pub const WAIT: Duration = Duration::from_secs(5);

pub fn process_alive(pid: u32) -> bool {
    Path::new(&format!("/proc/{pid}")).exists()
}
