//! Watcher supervisor against real shell watchers.

#![cfg(unix)]

mod common;

use repodeck::core::types::WatchRecord;
use repodeck::io::watcher::{WatchSubscription, WatcherSupervisor};
use repodeck::test_support::TestRepo;
use tokio::time::timeout;

use common::{WAIT, process_alive};

fn inline(script: &str) -> WatcherSupervisor {
    WatcherSupervisor::new(
        vec![
            "sh".to_string(),
            "-c".to_string(),
            script.to_string(),
            "watcher".to_string(),
        ],
        16,
    )
}

async fn next(sub: &mut WatchSubscription) -> Option<WatchRecord> {
    timeout(WAIT, sub.recv()).await.expect("watch record in time")
}

async fn drain(sub: &mut WatchSubscription) {
    while next(sub).await.is_some() {}
}

const CHANGE_THEN_IDLE: &str = r#"sleep 0.3
printf '%s\n' '{"path": "a.txt", "event": "modified", "git_status": "M", "timestamp": 1700000000.5}'
exec sleep 30"#;

#[tokio::test]
async fn records_fan_out_to_every_subscriber() {
    let repo = TestRepo::new();
    let supervisor = inline(CHANGE_THEN_IDLE);

    let mut first = supervisor.start_watch(repo.path()).await.expect("start");
    let mut second = supervisor.subscribe(repo.path()).expect("subscribe");

    for sub in [&mut first, &mut second] {
        let Some(WatchRecord::Change(change)) = next(sub).await else {
            panic!("expected change record");
        };
        assert_eq!(change.path, "a.txt");
        assert_eq!(change.event, "modified");
    }

    assert!(supervisor.stop_watch(repo.path()).await);
    assert_eq!(next(&mut first).await, None);
    assert!(!supervisor.is_watching(repo.path()));
}

#[tokio::test]
async fn second_start_replaces_the_first_process() {
    let repo = TestRepo::new();
    let supervisor = inline("exec sleep 30");

    let mut first = supervisor.start_watch(repo.path()).await.expect("first");
    let first_pid = supervisor.pid(repo.path()).expect("first pid");
    let _second = supervisor.start_watch(repo.path()).await.expect("second");
    let second_pid = supervisor.pid(repo.path()).expect("second pid");

    assert_ne!(first_pid, second_pid);
    assert_eq!(supervisor.watched_paths().len(), 1);
    drain(&mut first).await;
    if cfg!(target_os = "linux") {
        assert!(!process_alive(first_pid));
        assert!(process_alive(second_pid));
    }

    supervisor.stop_all().await;
    assert!(supervisor.watched_paths().is_empty());
    if cfg!(target_os = "linux") {
        assert!(!process_alive(second_pid));
    }
}

#[tokio::test]
async fn unexpected_exit_removes_handle() {
    let repo = TestRepo::new();
    let supervisor =
        inline(r#"printf '%s\n' '{"path": "b.txt", "event": "created", "timestamp": 1}'"#);

    let mut sub = supervisor.start_watch(repo.path()).await.expect("start");
    assert!(matches!(next(&mut sub).await, Some(WatchRecord::Change(_))));
    assert_eq!(next(&mut sub).await, None);
    assert!(!supervisor.is_watching(repo.path()));
}

#[tokio::test]
async fn stderr_output_does_not_stop_the_watch() {
    let repo = TestRepo::new();
    let supervisor = inline(
        r#"echo 'permission denied: .cache' >&2
echo 'not json'
printf '%s\n' '{"error": "Initial scan failed"}'
printf '%s\n' '{"path": "c.txt", "event": "deleted", "timestamp": "2024-01-01T00:00:00Z"}'
exec sleep 30"#,
    );

    let mut sub = supervisor.start_watch(repo.path()).await.expect("start");
    assert_eq!(
        next(&mut sub).await,
        Some(WatchRecord::Unparsed {
            line: "not json".to_string()
        })
    );
    assert_eq!(
        next(&mut sub).await,
        Some(WatchRecord::Diagnostic {
            message: "Initial scan failed".to_string()
        })
    );
    assert!(matches!(next(&mut sub).await, Some(WatchRecord::Change(_))));
    assert!(supervisor.is_watching(repo.path()));

    supervisor.stop_all().await;
}

#[tokio::test]
async fn missing_watcher_program_fails_to_start() {
    let repo = TestRepo::new();
    let supervisor = WatcherSupervisor::new(vec!["/nonexistent/watcher".to_string()], 4);
    assert!(supervisor.start_watch(repo.path()).await.is_err());
    assert!(!supervisor.is_watching(repo.path()));
}
