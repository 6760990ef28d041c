//! Running one operation across the selected managers.
//!
//! The [`Dispatcher`] owns everything an operation needs (the registry, a
//! [`CommandRunner`] and the settings from [`MpmConfig`]) and returns an
//! [`Outcome`]: the aggregated packages, every [`ErrorRecord`] attributed to
//! its manager, and an overall [`Status`].
//!
//! # Scheduling
//!
//! - With [`ErrorPolicy::Continue`] managers run concurrently, at most
//!   `concurrency` at a time. Results keep selection order.
//! - With [`ErrorPolicy::Stop`] managers run one after another and the first
//!   fatal record skips the rest. Results gathered so far are kept.
//! - Mutating calls hold the lock of the manager's family, so `pacman` and
//!   `yay` never write to their shared database at the same time.
//!
//! Cancellation is dropping the future: children are spawned with
//! `kill_on_drop`.
//!
//! # Examples
//!
//! ```rust,no_run
//! use mpm::{Dispatcher, ErrorPolicy, MpmConfig, Operation, ProcessExecutor, Registry, Request};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = MpmConfig::default();
//! let env: std::collections::BTreeMap<String, String> = std::env::vars().collect();
//! let runner = ProcessExecutor::new(env.clone(), ".").with_timeout(config.timeout());
//! let search_path = env.get("PATH").cloned();
//! let dispatcher = Dispatcher::new(Registry::builtin()?, runner, &config, search_path);
//!
//! let policy = config.policy(Operation::Outdated);
//! let outcome = dispatcher.run(&policy, &Request::All, ErrorPolicy::Continue).await?;
//! for package in outcome.packages.iter() {
//!     println!("{package}");
//! }
//! # Ok(())
//! # }
//! ```

use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use crate::aggregate::{PackageSet, SearchQuery};
use crate::backup::{BackupDocument, WriteMode};
use crate::command::{CommandBuilder, CommandPlan, Invocation, TemplateArgs};
use crate::configuration::MpmConfig;
use crate::data::{Operation, Package, OS};
use crate::definition::{exit_status, ManagerDefinition, OutputParser};
use crate::errors::{ErrorRecord, MpmError, Phase, Result};
use crate::managers::Registry;
use crate::process::CommandRunner;
use crate::selector::{SelectedManager, Selection, SelectionPolicy, Selector};
use crate::specifier::{Resolver, Specifier};

/// What to do when a manager fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ErrorPolicy {
    /// Report the failure and keep going with the other managers.
    #[default]
    Continue,
    /// Skip every manager that has not started yet.
    Stop,
}

impl ErrorPolicy {
    pub fn from_flag(stop_on_error: bool) -> Self {
        if stop_on_error {
            ErrorPolicy::Stop
        } else {
            ErrorPolicy::Continue
        }
    }
}

/// Overall result of an operation.
///
/// Any failure under [`ErrorPolicy::Stop`] is a total failure. Under
/// [`ErrorPolicy::Continue`] it is partial as long as one manager succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Success,
    PartialFailure,
    TotalFailure,
}

impl Status {
    /// Process exit code for this status.
    pub fn exit_code(&self) -> i32 {
        match self {
            Status::Success => 0,
            Status::TotalFailure => 1,
            Status::PartialFailure => 2,
        }
    }
}

/// The arguments of an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// No arguments: listings, sync, cleanup, upgrade of everything.
    All,
    Search(SearchQuery),
    /// Packages to install, upgrade or remove.
    Packages(Vec<Specifier>),
}

/// How one manager fared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManagerReport {
    pub manager: String,
    pub packages: usize,
    pub failed: bool,
    /// Never started because an earlier manager failed under
    /// [`ErrorPolicy::Stop`].
    pub skipped: bool,
    pub elapsed: Duration,
}

/// A specifier that no manager was run for.
#[derive(Debug)]
pub struct Unresolved {
    pub specifier: String,
    pub error: MpmError,
}

/// Everything an operation produced.
#[derive(Debug)]
pub struct Outcome {
    pub operation: Operation,
    pub packages: PackageSet,
    pub errors: Vec<ErrorRecord>,
    pub reports: Vec<ManagerReport>,
    pub unresolved: Vec<Unresolved>,
    pub status: Status,
}

impl Outcome {
    pub fn fatal_errors(&self) -> impl Iterator<Item = &ErrorRecord> {
        self.errors.iter().filter(|e| e.fatal)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &ErrorRecord> {
        self.errors.iter().filter(|e| !e.fatal)
    }

    pub fn failed_managers(&self) -> Vec<&str> {
        self.reports
            .iter()
            .filter(|r| r.failed)
            .map(|r| r.manager.as_str())
            .collect()
    }

    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }
}

/// What one manager's work is.
#[derive(Debug, Clone)]
enum Work {
    Single(TemplateArgs),
    UpgradeAll,
    Packages(Vec<Specifier>),
}

struct TaskResult {
    manager: String,
    packages: Vec<Package>,
    errors: Vec<ErrorRecord>,
    elapsed: Duration,
}

impl TaskResult {
    fn new(manager: &str) -> Self {
        TaskResult {
            manager: manager.to_string(),
            packages: Vec::new(),
            errors: Vec::new(),
            elapsed: Duration::ZERO,
        }
    }

    fn fatal_count(&self) -> usize {
        self.errors.iter().filter(|e| e.fatal).count()
    }

    fn failed(&self) -> bool {
        self.fatal_count() > 0
    }
}

/// Runs operations against the managers of one machine.
pub struct Dispatcher<R: CommandRunner> {
    registry: Registry,
    runner: R,
    concurrency: usize,
    search_path: Option<String>,
    os: OS,
    working_dir: PathBuf,
    overrides: BTreeMap<String, PathBuf>,
    manager_env: BTreeMap<String, BTreeMap<String, String>>,
    sudo: Vec<String>,
    family_locks: HashMap<String, Arc<Mutex<()>>>,
}

impl<R: CommandRunner> Dispatcher<R> {
    /// `search_path` is the `PATH` of the environment children run with.
    pub fn new(
        registry: Registry,
        runner: R,
        config: &MpmConfig,
        search_path: Option<String>,
    ) -> Self {
        let family_locks = registry
            .iter()
            .map(|def| (def.family().to_string(), Arc::new(Mutex::new(()))))
            .collect();
        Dispatcher {
            registry,
            runner,
            concurrency: config.concurrency.max(1),
            search_path,
            os: OS::current(),
            working_dir: PathBuf::from("."),
            overrides: config.executable_overrides.clone(),
            manager_env: config.manager_env.clone(),
            sudo: vec!["sudo".to_string()],
            family_locks,
        }
    }

    pub fn with_os(mut self, os: OS) -> Self {
        self.os = os;
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }

    /// Replaces the privilege elevation prefix.
    pub fn with_sudo(mut self, sudo: Vec<String>) -> Self {
        self.sudo = sudo;
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    fn selector(&self) -> Selector<'_, R> {
        Selector::new(&self.registry, &self.runner, self.search_path.clone())
            .with_os(self.os)
            .with_working_dir(self.working_dir.clone())
            .with_overrides(self.overrides.clone())
            .with_manager_env(self.manager_env.clone())
    }

    /// The managers usable for `policy`.
    pub async fn select(&self, policy: &SelectionPolicy) -> Result<Selection> {
        self.selector().select(policy).await
    }

    /// Like [`Dispatcher::select`], but an empty result is not an error.
    pub async fn survey(&self, policy: &SelectionPolicy) -> Result<Selection> {
        self.selector().survey(policy).await
    }

    /// Selects managers for `policy` and runs its operation on them.
    pub async fn run(
        &self,
        policy: &SelectionPolicy,
        request: &Request,
        error_policy: ErrorPolicy,
    ) -> Result<Outcome> {
        check_request(policy.operation, request)?;
        let selection = self.select(policy).await?;
        self.run_on(&selection, policy.operation, request, error_policy)
            .await
    }

    /// Runs `operation` on an existing selection.
    pub async fn run_on(
        &self,
        selection: &Selection,
        operation: Operation,
        request: &Request,
        error_policy: ErrorPolicy,
    ) -> Result<Outcome> {
        check_request(operation, request)?;
        info!("Running {} on {:?}", operation, selection.ids());

        let mut unresolved = Vec::new();
        let tasks: Vec<(&SelectedManager, Work)> = match request {
            Request::Packages(specifiers) => {
                let (groups, failed) = self.resolve_all(selection, operation, specifiers).await;
                unresolved = failed;
                groups
                    .into_iter()
                    .map(|(manager, specs)| (manager, Work::Packages(specs)))
                    .collect()
            }
            Request::Search(query) => selection
                .capable_of(operation)
                .into_iter()
                .map(|m| (m, Work::Single(TemplateArgs::query(&query.query))))
                .collect(),
            Request::All if operation == Operation::UpgradeAll => selection
                .capable_of(operation)
                .into_iter()
                .map(|m| (m, Work::UpgradeAll))
                .collect(),
            Request::All => selection
                .capable_of(operation)
                .into_iter()
                .map(|m| (m, Work::Single(TemplateArgs::none())))
                .collect(),
        };

        let mut results: Vec<TaskResult> = Vec::with_capacity(tasks.len());
        let mut skipped = Vec::new();
        match error_policy {
            ErrorPolicy::Continue => {
                results = stream::iter(tasks)
                    .map(|(manager, work)| self.run_task(manager, operation, work, error_policy))
                    .buffered(self.concurrency)
                    .collect()
                    .await;
            }
            ErrorPolicy::Stop => {
                let mut remaining = tasks.into_iter();
                for (manager, work) in remaining.by_ref() {
                    let result = self.run_task(manager, operation, work, error_policy).await;
                    let failed = result.failed();
                    results.push(result);
                    if failed {
                        warn!("{} failed, skipping the remaining managers", manager.id());
                        break;
                    }
                }
                skipped = remaining.map(|(m, _)| m.id().to_string()).collect();
            }
        }

        let mut outcome = assemble(operation, results, &skipped, unresolved, error_policy);
        let mut errors = selection.unavailable.clone();
        errors.append(&mut outcome.errors);
        outcome.errors = errors;
        if let Request::Search(query) = request {
            outcome.packages = outcome.packages.refilter(query);
        }
        Ok(outcome)
    }

    /// Lists installed packages and writes them to `path`.
    ///
    /// Nothing is written when no manager produced a listing, or when
    /// stopping on an error left the listing incomplete.
    pub async fn backup(
        &self,
        policy: &SelectionPolicy,
        path: &Path,
        mode: WriteMode,
        error_policy: ErrorPolicy,
    ) -> Result<(Outcome, Option<BackupDocument>)> {
        let policy = policy.for_operation(Operation::Backup);
        let outcome = self.run(&policy, &Request::All, error_policy).await?;
        if outcome.status == Status::TotalFailure {
            if outcome.reports.iter().any(|r| !r.failed && !r.skipped) {
                warn!("Stopped after a failed listing, not writing {}", path.display());
            } else {
                warn!("No manager produced a listing, not writing {}", path.display());
            }
            return Ok((outcome, None));
        }
        let written = BackupDocument::from_packages(&outcome.packages).write(path, mode)?;
        info!(
            "Backed up {} packages from {} managers to {}",
            written.entry_count(),
            written.managers.len(),
            path.display()
        );
        Ok((outcome, Some(written)))
    }

    /// Installs every entry of the backup at `path` with its recorded
    /// manager. Sections of managers unavailable here are skipped with one
    /// warning each.
    pub async fn restore(
        &self,
        policy: &SelectionPolicy,
        path: &Path,
        error_policy: ErrorPolicy,
    ) -> Result<Outcome> {
        let document = BackupDocument::load(path)?;
        let policy = policy.for_operation(Operation::Install);
        // Missing managers only cost their sections.
        let selection = self.survey(&policy).await?;
        let plan = document.plan_restore(&selection);
        info!(
            "Restoring {} packages, skipping {} manager sections",
            plan.specifiers.len(),
            plan.skipped.len()
        );

        let mut outcome = if plan.specifiers.is_empty() {
            assemble(Operation::Install, Vec::new(), &[], Vec::new(), error_policy)
        } else {
            self.run_on(
                &selection,
                Operation::Install,
                &Request::Packages(plan.specifiers),
                error_policy,
            )
            .await?
        };
        outcome.errors.extend(plan.skipped);
        Ok(outcome)
    }

    async fn resolve_all<'s>(
        &self,
        selection: &'s Selection,
        operation: Operation,
        specifiers: &[Specifier],
    ) -> (Vec<(&'s SelectedManager, Vec<Specifier>)>, Vec<Unresolved>) {
        let mut index: Option<PackageSet> = None;
        let mut assigned: Vec<(String, Specifier)> = Vec::new();
        let mut unresolved = Vec::new();

        for specifier in specifiers {
            let mut resolved = Resolver::new(selection).resolve(specifier, operation);
            // Installed packages settle which manager owns an ambiguous name.
            if matches!(resolved, Err(MpmError::Ambiguous { .. }))
                && matches!(operation, Operation::Upgrade | Operation::Remove)
            {
                if index.is_none() {
                    index = Some(self.installed_index(selection).await);
                }
                if let Some(index) = &index {
                    resolved = Resolver::new(selection)
                        .with_index(index)
                        .resolve(specifier, operation);
                }
            }
            match resolved {
                Ok(manager) => assigned.push((manager.id().to_string(), specifier.clone())),
                Err(error) => {
                    warn!("{}", error);
                    unresolved.push(Unresolved {
                        specifier: specifier.raw.clone(),
                        error,
                    });
                }
            }
        }

        let groups = selection
            .available
            .iter()
            .filter_map(|manager| {
                let specs: Vec<Specifier> = assigned
                    .iter()
                    .filter(|(id, _)| id == manager.id())
                    .map(|(_, spec)| spec.clone())
                    .collect();
                (!specs.is_empty()).then_some((manager, specs))
            })
            .collect();
        (groups, unresolved)
    }

    /// Installed listing of every selected manager that has one. Failures
    /// only narrow the index.
    async fn installed_index(&self, selection: &Selection) -> PackageSet {
        let listings: Vec<TaskResult> = stream::iter(selection.capable_of(Operation::Installed))
            .map(|m| {
                self.run_task(
                    m,
                    Operation::Installed,
                    Work::Single(TemplateArgs::none()),
                    ErrorPolicy::Continue,
                )
            })
            .buffered(self.concurrency)
            .collect()
            .await;
        let mut index = PackageSet::default();
        for listing in listings {
            if listing.failed() {
                debug!("Installed listing of {} failed, not used for resolution", listing.manager);
            }
            index.extend(listing.packages);
        }
        index
    }

    fn builder_for<'d>(&self, manager: &'d SelectedManager) -> CommandBuilder<'d> {
        let mut builder = CommandBuilder::new(&manager.definition, manager.executable.clone())
            .with_sudo(self.sudo.clone());
        if let Some(env) = self.manager_env.get(manager.id()) {
            builder = builder.with_env(env.clone());
        }
        builder
    }

    async fn family_guard(&self, definition: &ManagerDefinition) -> Option<OwnedMutexGuard<()>> {
        let lock = self.family_locks.get(definition.family())?.clone();
        debug!("{} waiting for the {} family lock", definition.id, definition.family());
        Some(lock.lock_owned().await)
    }

    async fn run_task(
        &self,
        manager: &SelectedManager,
        operation: Operation,
        work: Work,
        error_policy: ErrorPolicy,
    ) -> TaskResult {
        let start = Instant::now();
        let definition = &manager.definition;
        let _guard = if operation.is_mutating() {
            self.family_guard(definition).await
        } else {
            None
        };
        let builder = self.builder_for(manager);
        let mut result = TaskResult::new(&definition.id);

        match work {
            Work::Single(args) => {
                self.run_single(&builder, operation.command(), &args, &mut result)
                    .await;
            }
            Work::UpgradeAll => {
                self.run_upgrade_all(&builder, definition, error_policy, &mut result)
                    .await;
            }
            Work::Packages(specifiers) => {
                for specifier in specifiers {
                    let args = TemplateArgs::package(&specifier.id, specifier.version.clone());
                    let before = result.fatal_count();
                    self.run_single(&builder, operation, &args, &mut result).await;
                    if result.fatal_count() == before {
                        let mut package = Package::new(&definition.id, &specifier.id);
                        package.installed_version = specifier.version.clone();
                        result.packages.push(package);
                    } else if error_policy == ErrorPolicy::Stop {
                        break;
                    }
                }
            }
        }

        result.elapsed = start.elapsed();
        debug!(
            "{} {} finished in {:?} with {} packages and {} errors",
            definition.id,
            operation,
            result.elapsed,
            result.packages.len(),
            result.errors.len()
        );
        result
    }

    async fn run_single(
        &self,
        builder: &CommandBuilder<'_>,
        operation: Operation,
        args: &TemplateArgs,
        result: &mut TaskResult,
    ) {
        match builder.build(operation, args) {
            Ok(built) => {
                result.errors.extend(built.warnings);
                let parser = builder_parser(builder, &built.value);
                self.execute(&built.value, parser, result).await;
            }
            Err(e) => {
                result
                    .errors
                    .push(ErrorRecord::fatal(&result.manager, Phase::Execution, e.to_string()));
            }
        }
    }

    async fn run_upgrade_all(
        &self,
        builder: &CommandBuilder<'_>,
        definition: &ManagerDefinition,
        error_policy: ErrorPolicy,
        result: &mut TaskResult,
    ) {
        let outdated = if definition.supports(Operation::UpgradeAll) {
            Vec::new()
        } else {
            let mut listing = TaskResult::new(&definition.id);
            self.run_single(builder, Operation::Outdated, &TemplateArgs::none(), &mut listing)
                .await;
            result.errors.append(&mut listing.errors);
            if result.failed() {
                return;
            }
            if listing.packages.is_empty() {
                debug!("{}: nothing to upgrade", definition.id);
                return;
            }
            listing.packages
        };

        let plan = match builder.plan_upgrade_all(&outdated) {
            Ok(plan) => plan,
            Err(e) => {
                result
                    .errors
                    .push(ErrorRecord::fatal(&definition.id, Phase::Execution, e.to_string()));
                return;
            }
        };
        result.errors.extend(plan.warnings);
        match plan.value {
            CommandPlan::Bulk(invocation) => {
                let parser = builder_parser(builder, &invocation);
                self.execute(&invocation, parser, result).await;
            }
            CommandPlan::Iterative(invocations) => {
                for (invocation, package) in invocations.iter().zip(outdated) {
                    let before = result.fatal_count();
                    let parser = builder_parser(builder, invocation);
                    self.execute(invocation, parser, result).await;
                    if result.fatal_count() == before {
                        result.packages.push(package);
                    } else if error_policy == ErrorPolicy::Stop {
                        break;
                    }
                }
            }
        }
    }

    async fn execute(
        &self,
        invocation: &Invocation,
        parser: OutputParser,
        result: &mut TaskResult,
    ) {
        match self.runner.run(invocation).await {
            Ok(output) => {
                let parsed = parser(&result.manager, &output);
                result.packages.extend(parsed.packages);
                result.errors.extend(parsed.errors);
            }
            Err(e) => {
                warn!("{}: {}", result.manager, e);
                result
                    .errors
                    .push(ErrorRecord::fatal(&result.manager, Phase::Execution, e.to_string()));
            }
        }
    }
}

/// The parser declared for an invocation's operation.
fn builder_parser(builder: &CommandBuilder<'_>, invocation: &Invocation) -> OutputParser {
    invocation
        .operation
        .and_then(|op| builder.definition().spec(op).ok())
        .map(|spec| spec.parser)
        .unwrap_or(exit_status)
}

fn check_request(operation: Operation, request: &Request) -> Result<()> {
    let expected = match operation {
        Operation::Search => matches!(request, Request::Search(_)),
        Operation::Install | Operation::Upgrade | Operation::Remove => {
            matches!(request, Request::Packages(specs) if !specs.is_empty())
        }
        _ => matches!(request, Request::All),
    };
    if expected {
        Ok(())
    } else {
        Err(MpmError::invalid_specifier(
            format!("{request:?}"),
            format!("not valid arguments for {operation}"),
        ))
    }
}

fn assemble(
    operation: Operation,
    results: Vec<TaskResult>,
    skipped: &[String],
    unresolved: Vec<Unresolved>,
    error_policy: ErrorPolicy,
) -> Outcome {
    let mut packages = PackageSet::default();
    let mut errors = Vec::new();
    let mut reports = Vec::new();
    for result in results {
        reports.push(ManagerReport {
            manager: result.manager.clone(),
            packages: result.packages.len(),
            failed: result.failed(),
            skipped: false,
            elapsed: result.elapsed,
        });
        packages.extend(result.packages);
        errors.extend(result.errors);
    }
    for manager in skipped {
        errors.push(ErrorRecord::warning(
            manager,
            Phase::Execution,
            "skipped after an earlier failure",
        ));
        reports.push(ManagerReport {
            manager: manager.clone(),
            packages: 0,
            failed: false,
            skipped: true,
            elapsed: Duration::ZERO,
        });
    }

    let failures = reports.iter().filter(|r| r.failed).count() + unresolved.len();
    let successes = reports.iter().filter(|r| !r.failed && !r.skipped).count();
    // Stopping on an error abandons the operation as a whole.
    let status = match (failures, successes, error_policy) {
        (0, _, _) => Status::Success,
        (_, 0, _) | (_, _, ErrorPolicy::Stop) => Status::TotalFailure,
        _ => Status::PartialFailure,
    };

    Outcome {
        operation,
        packages,
        errors,
        reports,
        unresolved,
        status,
    }
}
