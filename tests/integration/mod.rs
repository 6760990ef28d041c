//! Integration test modules for mpm
//!
//! These tests drive the dispatcher end to end. Package managers are replaced
//! by [`MockRunner`], which answers invocations from a script, so no real
//! package manager ever runs.

pub mod backup_restore;
pub mod dispatch;
pub mod process_execution;

use mpm::process::ExecError;
use mpm::{CommandOutput, CommandRunner, Dispatcher, Invocation, MpmConfig, Operation, Registry, OS};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tempfile::TempDir;

/// What a scripted call returns.
#[derive(Debug, Clone)]
pub enum Reply {
    Output(CommandOutput),
    Timeout,
    SpawnFailure,
}

impl Reply {
    pub fn stdout(text: &str) -> Self {
        Reply::Output(output(0, text, ""))
    }

    pub fn failure(code: i32, stderr: &str) -> Self {
        Reply::Output(output(code, "", stderr))
    }
}

pub fn output(code: i32, stdout: &str, stderr: &str) -> CommandOutput {
    CommandOutput {
        exit_code: Some(code),
        stdout: stdout.to_string(),
        stderr: stderr.to_string(),
        elapsed: Duration::from_millis(1),
    }
}

#[derive(Debug, Clone)]
struct Script {
    reply: Reply,
    delay: Duration,
}

/// Scripted [`CommandRunner`] keyed by manager id and operation.
///
/// Version probes answer with a recent version unless scripted otherwise;
/// unscripted operations succeed with empty output.
#[derive(Debug, Default)]
pub struct MockRunner {
    scripts: HashMap<(String, Option<Operation>), Script>,
    calls: Mutex<Vec<Invocation>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl MockRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(mut self, manager: &str, operation: Operation, reply: Reply) -> Self {
        self.scripts.insert(
            (manager.to_string(), Some(operation)),
            Script {
                reply,
                delay: Duration::ZERO,
            },
        );
        self
    }

    pub fn on_delayed(
        mut self,
        manager: &str,
        operation: Operation,
        reply: Reply,
        delay: Duration,
    ) -> Self {
        self.scripts
            .insert((manager.to_string(), Some(operation)), Script { reply, delay });
        self
    }

    pub fn on_probe(mut self, manager: &str, reply: Reply) -> Self {
        self.scripts.insert(
            (manager.to_string(), None),
            Script {
                reply,
                delay: Duration::ZERO,
            },
        );
        self
    }

    /// Every invocation run so far, probes included.
    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().unwrap().clone()
    }

    /// Most calls that were running at the same time.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Invocations of `operation`, in the order they ran.
    pub fn calls_for(&self, operation: Operation) -> Vec<Invocation> {
        self.calls()
            .into_iter()
            .filter(|c| c.operation == Some(operation))
            .collect()
    }
}

impl CommandRunner for MockRunner {
    async fn run(&self, invocation: &Invocation) -> Result<CommandOutput, ExecError> {
        self.calls.lock().unwrap().push(invocation.clone());
        let key = (invocation.manager.clone(), invocation.operation);
        let script = match self.scripts.get(&key) {
            Some(script) => script.clone(),
            None if invocation.operation.is_none() => Script {
                reply: Reply::stdout("version 1000.0.0\n"),
                delay: Duration::ZERO,
            },
            None => Script {
                reply: Reply::stdout(""),
                delay: Duration::ZERO,
            },
        };
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);
        if !script.delay.is_zero() {
            tokio::time::sleep(script.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        match script.reply {
            Reply::Output(output) => Ok(output),
            Reply::Timeout => Err(ExecError::Timeout {
                limit: Duration::from_secs(1),
            }),
            Reply::SpawnFailure => Err(ExecError::Spawn {
                program: invocation.argv[0].clone(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
            }),
        }
    }
}

/// A config selecting exactly `managers`, in that order, each pointed at a
/// placeholder executable inside `dir`.
pub fn config_for(dir: &TempDir, managers: &[&str]) -> MpmConfig {
    let mut config = MpmConfig::default();
    config.include = managers.iter().map(|m| m.to_string()).collect();
    for manager in managers {
        let path: PathBuf = dir.path().join(manager);
        std::fs::write(&path, "").unwrap();
        config.executable_overrides.insert(manager.to_string(), path);
    }
    config
}

/// A Linux dispatcher over the built-in registry, restricted to `managers`.
pub fn dispatcher(
    runner: MockRunner,
    managers: &[&str],
) -> (TempDir, MpmConfig, Dispatcher<MockRunner>) {
    let dir = TempDir::new().unwrap();
    let config = config_for(&dir, managers);
    let dispatcher = dispatcher_with(runner, &config, &dir);
    (dir, config, dispatcher)
}

pub fn dispatcher_with(
    runner: MockRunner,
    config: &MpmConfig,
    dir: &TempDir,
) -> Dispatcher<MockRunner> {
    Dispatcher::new(Registry::builtin().unwrap(), runner, config, None)
        .with_os(OS::Linux)
        .with_working_dir(dir.path())
}

/// `cargo install --list` output for the given packages.
pub fn cargo_listing(packages: &[(&str, &str)]) -> String {
    packages
        .iter()
        .map(|(id, version)| format!("{id} v{version}:\n    {id}\n"))
        .collect()
}

/// `pip list --format=json` output for the given packages.
pub fn pip_listing(packages: &[(&str, &str)]) -> String {
    let entries: Vec<String> = packages
        .iter()
        .map(|(name, version)| format!(r#"{{"name": "{name}", "version": "{version}"}}"#))
        .collect();
    format!("[{}]", entries.join(", "))
}

/// `brew info --json=v2 --installed` output for the given formulae.
pub fn brew_listing(packages: &[(&str, &str)]) -> String {
    let entries: Vec<String> = packages
        .iter()
        .map(|(name, version)| {
            format!(r#"{{"name": "{name}", "installed": [{{"version": "{version}"}}]}}"#)
        })
        .collect();
    format!(r#"{{"formulae": [{}], "casks": []}}"#, entries.join(", "))
}
