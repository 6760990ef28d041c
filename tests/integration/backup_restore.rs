//! Backing up installed packages and restoring them on another machine.

use super::{cargo_listing, dispatcher, pip_listing, MockRunner, Reply};
use mpm::{BackupDocument, ErrorPolicy, Operation, Phase, Status, WriteMode};
use tempfile::TempDir;

fn listed_machine() -> MockRunner {
    MockRunner::new()
        .on("cargo", Operation::Installed, Reply::stdout(&cargo_listing(&[("broot", "1.40.0")])))
        .on(
            "pip",
            Operation::Installed,
            Reply::stdout(&pip_listing(&[("requests", "2.32.3"), ("rich", "13.7.1")])),
        )
}

#[tokio::test]
async fn test_backup_then_restore_elsewhere() {
    let out = TempDir::new().unwrap();
    let path = out.path().join("packages.toml");

    let (_dir, config, source) = dispatcher(listed_machine(), &["cargo", "pip"]);
    let (outcome, written) = source
        .backup(&config.policy(Operation::Backup), &path, WriteMode::Forbid, ErrorPolicy::Continue)
        .await
        .unwrap();
    assert!(outcome.is_success());
    let written = written.unwrap();
    assert_eq!(written.entry_count(), 3);
    assert_eq!(written.managers["pip"]["requests"], "2.32.3");

    let loaded = BackupDocument::load(&path).unwrap();
    assert_eq!(loaded.managers, written.managers);

    // Only pip exists on the target machine.
    let (_dir, config, target) = dispatcher(MockRunner::new(), &["pip"]);
    let outcome = target
        .restore(&config.policy(Operation::Install), &path, ErrorPolicy::Continue)
        .await
        .unwrap();

    assert!(outcome.is_success());
    let skipped: Vec<_> = outcome.warnings().filter(|w| w.phase == Phase::Detection).collect();
    assert_eq!(skipped.len(), 1);
    assert_eq!(skipped[0].manager, "cargo");

    let installs: Vec<String> = target
        .runner()
        .calls_for(Operation::Install)
        .into_iter()
        .map(|c| c.argv.last().cloned().unwrap())
        .collect();
    assert_eq!(installs, vec!["requests==2.32.3", "rich==13.7.1"]);
    assert_eq!(outcome.packages.len(), 2);
}

#[tokio::test]
async fn test_backup_refuses_to_overwrite_by_default() {
    let out = TempDir::new().unwrap();
    let path = out.path().join("packages.toml");
    std::fs::write(&path, "tool = \"mpm\"\n").unwrap();

    let (_dir, config, dispatcher) = dispatcher(listed_machine(), &["cargo", "pip"]);
    let err = dispatcher
        .backup(&config.policy(Operation::Backup), &path, WriteMode::Forbid, ErrorPolicy::Continue)
        .await
        .unwrap_err();
    assert_eq!(err.category(), "backup_exists");

    let (_, written) = dispatcher
        .backup(&config.policy(Operation::Backup), &path, WriteMode::Merge, ErrorPolicy::Continue)
        .await
        .unwrap();
    assert_eq!(written.unwrap().entry_count(), 3);
}

#[tokio::test]
async fn test_nothing_is_written_when_every_listing_fails() {
    let out = TempDir::new().unwrap();
    let path = out.path().join("packages.toml");
    let runner = MockRunner::new().on("pip", Operation::Installed, Reply::failure(1, "no python"));

    let (_dir, config, dispatcher) = dispatcher(runner, &["pip"]);
    let (outcome, written) = dispatcher
        .backup(&config.policy(Operation::Backup), &path, WriteMode::Forbid, ErrorPolicy::Continue)
        .await
        .unwrap();
    assert_eq!(outcome.status, Status::TotalFailure);
    assert!(written.is_none());
    assert!(!path.exists());
}

#[tokio::test]
async fn test_nothing_is_written_when_stopping_after_a_failure() {
    let out = TempDir::new().unwrap();
    let path = out.path().join("packages.toml");
    let runner = MockRunner::new()
        .on("cargo", Operation::Installed, Reply::stdout(&cargo_listing(&[("broot", "1.40.0")])))
        .on("pip", Operation::Installed, Reply::failure(1, "no python"));

    let (_dir, config, dispatcher) = dispatcher(runner, &["cargo", "pip"]);
    let (outcome, written) = dispatcher
        .backup(&config.policy(Operation::Backup), &path, WriteMode::Forbid, ErrorPolicy::Stop)
        .await
        .unwrap();
    assert_eq!(outcome.status, Status::TotalFailure);
    assert_eq!(outcome.packages.len(), 1);
    assert!(written.is_none());
    assert!(!path.exists());
}

#[tokio::test]
async fn test_restore_skips_every_section_when_no_manager_is_available() {
    let out = TempDir::new().unwrap();
    let path = out.path().join("packages.toml");
    std::fs::write(
        &path,
        "tool = \"mpm\"\n\n[pip]\nrequests = \"2.32.3\"\nrich = \"13.7.1\"\n",
    )
    .unwrap();

    let runner = MockRunner::new().on_probe("pip", Reply::failure(127, "pip3: not found"));
    let (_dir, config, target) = dispatcher(runner, &["pip"]);
    let outcome = target
        .restore(&config.policy(Operation::Install), &path, ErrorPolicy::Continue)
        .await
        .unwrap();

    assert!(outcome.is_success());
    assert!(outcome.packages.is_empty());
    let skipped: Vec<_> = outcome.warnings().filter(|w| w.phase == Phase::Detection).collect();
    assert_eq!(skipped.len(), 1);
    assert_eq!(skipped[0].manager, "pip");
    assert!(skipped[0].message.contains("2 package(s)"));
    assert!(target.runner().calls_for(Operation::Install).is_empty());
}
