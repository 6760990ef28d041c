//! The real executor, driving `sh`.
#![cfg(unix)]

use mpm::{CommandRunner, Invocation, ProcessExecutor};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tempfile::TempDir;

fn shell(script: &str, env: &[(&str, &str)]) -> Invocation {
    Invocation {
        manager: "sh".to_string(),
        operation: None,
        argv: vec!["sh".to_string(), "-c".to_string(), script.to_string()],
        env: env
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    }
}

fn executor(dir: &TempDir) -> ProcessExecutor {
    let mut base = BTreeMap::new();
    base.insert(
        "PATH".to_string(),
        std::env::var("PATH").unwrap_or_else(|_| "/usr/bin:/bin".to_string()),
    );
    ProcessExecutor::new(base, dir.path()).with_timeout(Duration::from_secs(10))
}

#[tokio::test]
async fn test_timeout_kills_the_child() {
    let dir = TempDir::new().unwrap();
    let executor = executor(&dir).with_timeout(Duration::from_millis(200));
    let start = Instant::now();
    let err = executor.run(&shell("sleep 5", &[])).await.unwrap_err();
    assert!(err.is_timeout());
    assert!(start.elapsed() < Duration::from_secs(3));
}

#[tokio::test]
async fn test_non_zero_exit_is_returned_not_raised() {
    let dir = TempDir::new().unwrap();
    let output = executor(&dir)
        .run(&shell("echo partial; echo oops >&2; exit 3", &[]))
        .await
        .unwrap();
    assert_eq!(output.exit_code, Some(3));
    assert_eq!(output.stdout, "partial\n");
    assert_eq!(output.stderr_tail(1), "oops");
}

#[tokio::test]
async fn test_environment_is_explicit_and_scoped() {
    let dir = TempDir::new().unwrap();
    let executor = executor(&dir);
    let script = r#"echo "${MPM_TEST_VALUE:-unset} ${HOME:-nohome}""#;

    let scoped = executor
        .run(&shell(script, &[("MPM_TEST_VALUE", "pip-only")]))
        .await
        .unwrap();
    assert_eq!(scoped.stdout.trim(), "pip-only nohome");

    let sibling = executor.run(&shell(script, &[])).await.unwrap();
    assert_eq!(sibling.stdout.trim(), "unset nohome");
}

#[tokio::test]
async fn test_runs_in_the_working_directory() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("marker"), "").unwrap();
    let output = executor(&dir).run(&shell("ls", &[])).await.unwrap();
    assert!(output.stdout.contains("marker"));
}

#[tokio::test]
async fn test_escape_sequences_are_stripped() {
    let dir = TempDir::new().unwrap();
    let output = executor(&dir)
        .run(&shell(r"printf '\033[1;31mbroot\033[0m 1.40.0\n'", &[]))
        .await
        .unwrap();
    assert_eq!(output.stdout, "broot 1.40.0\n");
}

#[tokio::test]
async fn test_missing_program_is_a_spawn_error() {
    let dir = TempDir::new().unwrap();
    let invocation = Invocation {
        manager: "ghost".to_string(),
        operation: None,
        argv: vec!["/nonexistent/mpm-ghost-manager".to_string()],
        env: BTreeMap::new(),
    };
    let err = executor(&dir).run(&invocation).await.unwrap_err();
    assert!(!err.is_timeout());
    assert!(err.to_string().contains("mpm-ghost-manager"));
}
