//! Dispatcher behaviour across several scripted managers.

use super::{
    brew_listing, cargo_listing, config_for, dispatcher, dispatcher_with, pip_listing, MockRunner,
    Reply,
};
use mpm::{ErrorPolicy, MpmError, Operation, Phase, Request, SearchQuery, Specifier, Status};
use std::collections::BTreeMap;
use std::time::Duration;
use tempfile::TempDir;

fn three_managers_with_failing_pip() -> MockRunner {
    MockRunner::new()
        .on("cargo", Operation::Installed, Reply::stdout(&cargo_listing(&[("broot", "1.40.0")])))
        .on("pip", Operation::Installed, Reply::failure(2, "pip: broken interpreter"))
        .on("brew", Operation::Installed, Reply::stdout(&brew_listing(&[("git", "2.45.2")])))
}

fn specifiers(raw: &[&str]) -> Request {
    Request::Packages(raw.iter().map(|s| Specifier::parse(s).unwrap()).collect())
}

#[tokio::test]
async fn test_continue_keeps_results_of_healthy_managers() {
    let (_dir, config, dispatcher) =
        dispatcher(three_managers_with_failing_pip(), &["cargo", "pip", "brew"]);
    let outcome = dispatcher
        .run(&config.policy(Operation::Installed), &Request::All, ErrorPolicy::Continue)
        .await
        .unwrap();

    assert_eq!(outcome.status, Status::PartialFailure);
    assert_eq!(outcome.status.exit_code(), 2);
    assert_eq!(outcome.packages.len(), 2);
    assert_eq!(outcome.failed_managers(), vec!["pip"]);

    let fatal: Vec<_> = outcome.fatal_errors().collect();
    assert_eq!(fatal.len(), 1);
    assert_eq!(fatal[0].manager, "pip");
    assert_eq!(fatal[0].phase, Phase::Execution);
    assert!(fatal[0].message.contains("broken interpreter"));

    let order: Vec<&str> = outcome.reports.iter().map(|r| r.manager.as_str()).collect();
    assert_eq!(order, vec!["cargo", "pip", "brew"]);
}

#[tokio::test]
async fn test_stop_skips_managers_after_the_first_failure() {
    let (_dir, config, dispatcher) =
        dispatcher(three_managers_with_failing_pip(), &["cargo", "pip", "brew"]);
    let outcome = dispatcher
        .run(&config.policy(Operation::Installed), &Request::All, ErrorPolicy::Stop)
        .await
        .unwrap();

    assert_eq!(outcome.status, Status::TotalFailure);
    assert_eq!(outcome.packages.len(), 1);
    assert_eq!(outcome.packages.packages()[0].manager, "cargo");

    let brew = outcome.reports.iter().find(|r| r.manager == "brew").unwrap();
    assert!(brew.skipped);
    assert!(!brew.failed);
    assert!(outcome
        .warnings()
        .any(|w| w.manager == "brew" && w.message.contains("skipped")));

    let listed: Vec<String> = dispatcher
        .runner()
        .calls_for(Operation::Installed)
        .into_iter()
        .map(|c| c.manager)
        .collect();
    assert_eq!(listed, vec!["cargo", "pip"]);
}

#[tokio::test]
async fn test_only_failures_is_total_failure() {
    let runner = MockRunner::new().on("pip", Operation::Installed, Reply::SpawnFailure);
    let (_dir, config, dispatcher) = dispatcher(runner, &["pip"]);
    let outcome = dispatcher
        .run(&config.policy(Operation::Installed), &Request::All, ErrorPolicy::Stop)
        .await
        .unwrap();
    assert_eq!(outcome.status, Status::TotalFailure);
    assert_eq!(outcome.status.exit_code(), 1);
    assert!(outcome.packages.is_empty());
}

#[tokio::test]
async fn test_empty_listing_is_success() {
    let runner = MockRunner::new().on("pip", Operation::Installed, Reply::stdout("[]"));
    let (_dir, config, dispatcher) = dispatcher(runner, &["pip"]);
    let outcome = dispatcher
        .run(&config.policy(Operation::Installed), &Request::All, ErrorPolicy::Continue)
        .await
        .unwrap();
    assert!(outcome.is_success());
    assert!(outcome.packages.is_empty());
    assert!(outcome.errors.is_empty());
}

#[tokio::test]
async fn test_timeout_is_one_fatal_record() {
    let runner = MockRunner::new()
        .on("cargo", Operation::Installed, Reply::Timeout)
        .on_delayed(
            "pip",
            Operation::Installed,
            Reply::stdout(&pip_listing(&[("requests", "2.32.3")])),
            Duration::from_millis(20),
        );
    let (_dir, config, dispatcher) = dispatcher(runner, &["cargo", "pip"]);
    let outcome = dispatcher
        .run(&config.policy(Operation::Installed), &Request::All, ErrorPolicy::Continue)
        .await
        .unwrap();

    let fatal: Vec<_> = outcome.fatal_errors().collect();
    assert_eq!(fatal.len(), 1);
    assert_eq!(fatal[0].manager, "cargo");
    assert!(fatal[0].message.contains("timed out"));
    assert_eq!(outcome.packages.len(), 1);
    assert_eq!(outcome.status, Status::PartialFailure);
}

#[tokio::test]
async fn test_read_only_operations_run_in_parallel() {
    let listing = Reply::stdout("");
    let runner = MockRunner::new()
        .on_delayed("pacman", Operation::Installed, listing.clone(), Duration::from_millis(50))
        .on_delayed("yay", Operation::Installed, listing, Duration::from_millis(50));
    let (_dir, config, dispatcher) = dispatcher(runner, &["pacman", "yay"]);
    dispatcher
        .run(&config.policy(Operation::Installed), &Request::All, ErrorPolicy::Continue)
        .await
        .unwrap();
    assert_eq!(dispatcher.runner().peak_concurrency(), 2);
}

#[tokio::test]
async fn test_mutating_calls_of_one_family_are_serialized() {
    let done = Reply::stdout("");
    let runner = MockRunner::new()
        .on_delayed("pacman", Operation::Install, done.clone(), Duration::from_millis(50))
        .on_delayed("yay", Operation::Install, done, Duration::from_millis(50));
    let (_dir, config, dispatcher) = dispatcher(runner, &["pacman", "yay"]);
    let outcome = dispatcher
        .run(
            &config.policy(Operation::Install),
            &specifiers(&["pkg:pacman/ripgrep", "pkg:yay/paru-bin"]),
            ErrorPolicy::Continue,
        )
        .await
        .unwrap();
    assert!(outcome.is_success());
    assert_eq!(dispatcher.runner().calls_for(Operation::Install).len(), 2);
    assert_eq!(dispatcher.runner().peak_concurrency(), 1);
}

#[tokio::test]
async fn test_ambiguous_specifier_is_not_dispatched() {
    let (_dir, config, dispatcher) = dispatcher(MockRunner::new(), &["brew", "cargo"]);
    let outcome = dispatcher
        .run(&config.policy(Operation::Install), &specifiers(&["broot"]), ErrorPolicy::Continue)
        .await
        .unwrap();

    assert_eq!(outcome.unresolved.len(), 1);
    match &outcome.unresolved[0].error {
        MpmError::Ambiguous { managers, .. } => assert_eq!(managers, &vec!["brew", "cargo"]),
        other => panic!("expected an ambiguity, got {other}"),
    }
    assert!(dispatcher.runner().calls_for(Operation::Install).is_empty());
    assert_eq!(outcome.status, Status::TotalFailure);
}

#[tokio::test]
async fn test_manager_hint_resolves_exactly() {
    let (_dir, config, dispatcher) = dispatcher(MockRunner::new(), &["brew", "cargo"]);
    let outcome = dispatcher
        .run(
            &config.policy(Operation::Install),
            &specifiers(&["pkg:brew/broot"]),
            ErrorPolicy::Continue,
        )
        .await
        .unwrap();

    assert!(outcome.is_success());
    let installs = dispatcher.runner().calls_for(Operation::Install);
    assert_eq!(installs.len(), 1);
    assert_eq!(installs[0].manager, "brew");
    assert_eq!(installs[0].argv.last().map(String::as_str), Some("broot"));
}

#[tokio::test]
async fn test_upgrade_uses_installed_packages_to_break_ties() {
    let runner = MockRunner::new()
        .on("brew", Operation::Installed, Reply::stdout(&brew_listing(&[("broot", "1.36.1")])))
        .on("cargo", Operation::Installed, Reply::stdout(&cargo_listing(&[("bat", "0.24.0")])));
    let (_dir, config, dispatcher) = dispatcher(runner, &["brew", "cargo"]);
    let outcome = dispatcher
        .run(&config.policy(Operation::Upgrade), &specifiers(&["broot"]), ErrorPolicy::Continue)
        .await
        .unwrap();

    assert!(outcome.is_success());
    let upgrades = dispatcher.runner().calls_for(Operation::Upgrade);
    assert_eq!(upgrades.len(), 1);
    assert_eq!(upgrades[0].manager, "brew");
}

#[tokio::test]
async fn test_upgrade_all_without_bulk_form_upgrades_each_outdated_package() {
    let outdated = r#"[{"name": "requests", "version": "2.31.0", "latest_version": "2.32.3"},
                       {"name": "rich", "version": "13.0.0", "latest_version": "13.7.1"}]"#;
    let runner = MockRunner::new().on("pip", Operation::Outdated, Reply::stdout(outdated));
    let (_dir, config, dispatcher) = dispatcher(runner, &["pip"]);
    let outcome = dispatcher
        .run(&config.policy(Operation::UpgradeAll), &Request::All, ErrorPolicy::Continue)
        .await
        .unwrap();

    assert!(outcome.is_success());
    let upgraded: Vec<String> = dispatcher
        .runner()
        .calls_for(Operation::Upgrade)
        .into_iter()
        .map(|c| c.argv.last().cloned().unwrap())
        .collect();
    assert_eq!(upgraded, vec!["requests", "rich"]);
    assert!(outcome.warnings().any(|w| w.message.contains("one by one")));
    let reported: Vec<&str> = outcome.packages.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(reported, vec!["requests", "rich"]);
}

fn pip_with_failing_upgrades() -> MockRunner {
    let outdated = r#"[{"name": "requests", "version": "2.31.0", "latest_version": "2.32.3"},
                       {"name": "rich", "version": "13.0.0", "latest_version": "13.7.1"}]"#;
    MockRunner::new()
        .on("pip", Operation::Outdated, Reply::stdout(outdated))
        .on("pip", Operation::Upgrade, Reply::failure(1, "ERROR: no matching distribution"))
}

#[tokio::test]
async fn test_failed_iterative_upgrades_are_not_reported_as_upgraded() {
    let (_dir, config, dispatcher) = dispatcher(pip_with_failing_upgrades(), &["pip"]);
    let outcome = dispatcher
        .run(&config.policy(Operation::UpgradeAll), &Request::All, ErrorPolicy::Continue)
        .await
        .unwrap();

    assert!(outcome.packages.is_empty());
    assert_eq!(outcome.fatal_errors().count(), 2);
    assert_eq!(outcome.status, Status::TotalFailure);
    assert_eq!(dispatcher.runner().calls_for(Operation::Upgrade).len(), 2);
}

#[tokio::test]
async fn test_failed_iterative_upgrade_stops_the_rest() {
    let (_dir, config, dispatcher) = dispatcher(pip_with_failing_upgrades(), &["pip"]);
    let outcome = dispatcher
        .run(&config.policy(Operation::UpgradeAll), &Request::All, ErrorPolicy::Stop)
        .await
        .unwrap();

    assert!(outcome.packages.is_empty());
    assert_eq!(outcome.fatal_errors().count(), 1);
    assert_eq!(dispatcher.runner().calls_for(Operation::Upgrade).len(), 1);
}

#[tokio::test]
async fn test_search_is_refiltered() {
    let results = "broot = \"1.40.0\"    # A new file manager\n\
                   cargo-broot-helper = \"0.1.0\"    # helper\n";
    let runner = MockRunner::new().on("cargo", Operation::Search, Reply::stdout(results));
    let (_dir, config, dispatcher) = dispatcher(runner, &["cargo", "pip"]);
    let query = SearchQuery::new("broot").exact(true);
    let outcome = dispatcher
        .run(&config.policy(Operation::Search), &Request::Search(query), ErrorPolicy::Continue)
        .await
        .unwrap();

    let ids: Vec<&str> = outcome.packages.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(ids, vec!["broot"]);
    // pip has no search and is never asked
    assert!(dispatcher
        .runner()
        .calls_for(Operation::Search)
        .iter()
        .all(|c| c.manager == "cargo"));
}

#[tokio::test]
async fn test_manager_env_is_scoped_to_its_manager() {
    let dir = TempDir::new().unwrap();
    let mut config = config_for(&dir, &["pip", "cargo"]);
    config.manager_env.insert(
        "pip".to_string(),
        BTreeMap::from([("http_proxy".to_string(), "http://proxy.internal:3128".to_string())]),
    );
    let dispatcher = dispatcher_with(MockRunner::new(), &config, &dir);
    dispatcher
        .run(&config.policy(Operation::Installed), &Request::All, ErrorPolicy::Continue)
        .await
        .unwrap();

    let calls = dispatcher.runner().calls_for(Operation::Installed);
    let pip = calls.iter().find(|c| c.manager == "pip").unwrap();
    let cargo = calls.iter().find(|c| c.manager == "cargo").unwrap();
    assert_eq!(pip.env["http_proxy"], "http://proxy.internal:3128");
    assert_eq!(pip.env["PIP_DISABLE_PIP_VERSION_CHECK"], "1");
    assert!(!cargo.env.contains_key("http_proxy"));
}

#[tokio::test]
async fn test_old_manager_version_is_a_detection_warning() {
    let runner = MockRunner::new().on_probe("pip", Reply::stdout("pip 9.0.1 from /usr/lib"));
    let (_dir, config, dispatcher) = dispatcher(runner, &["pip", "cargo"]);
    let outcome = dispatcher
        .run(&config.policy(Operation::Installed), &Request::All, ErrorPolicy::Continue)
        .await
        .unwrap();

    let warning = outcome.warnings().find(|w| w.manager == "pip").unwrap();
    assert_eq!(warning.phase, Phase::Detection);
    assert!(warning.message.contains("older than"));
    assert!(outcome.is_success());
    assert!(dispatcher
        .runner()
        .calls_for(Operation::Installed)
        .iter()
        .all(|c| c.manager == "cargo"));
}

#[tokio::test]
async fn test_unknown_manager_is_rejected() {
    let (_dir, mut config, dispatcher) = dispatcher(MockRunner::new(), &["pip"]);
    config.include.push("zypper".to_string());
    let err = dispatcher
        .run(&config.policy(Operation::Installed), &Request::All, ErrorPolicy::Continue)
        .await
        .unwrap_err();
    assert_eq!(err.category(), "unknown_manager");
}
