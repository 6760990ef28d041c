//! Terminal rendering for the `mpm` binary.
//!
//! Tables are built with [`tabular`] and returned rather than printed, so
//! callers and tests decide where they go. The message helpers print with a
//! colored marker, errors and warnings to stderr.

use colored::Colorize;
use std::collections::BTreeMap;
use tabular::{Row, Table};

use crate::aggregate::PackageSet;
use crate::data::Package;
use crate::dispatcher::{Outcome, Status};
use crate::errors::ErrorRecord;
use crate::selector::Selection;

/// Print a success message in green with a checkmark
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print an error message in red with an X mark
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

/// Print a warning message in yellow with a warning sign
pub fn warning(msg: &str) {
    eprintln!("{} {}", "⚠".yellow(), msg);
}

pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue(), msg);
}

fn version_cell(version: &Option<String>) -> String {
    version.clone().unwrap_or_else(|| "-".to_string())
}

/// Installed or outdated listing: one row per record.
pub fn package_table(packages: &PackageSet) -> Table {
    let mut table = Table::new("{:<}  {:<}  {:<}  {:<}");
    table.add_row(
        Row::new()
            .with_cell("Package".bold())
            .with_cell("Manager".bold())
            .with_cell("Installed".bold())
            .with_cell("Latest".bold()),
    );
    for package in packages.iter() {
        let latest = match &package.latest_version {
            Some(latest) if package.is_outdated() => latest.green().to_string(),
            other => version_cell(other),
        };
        table.add_row(
            Row::new()
                .with_cell(package.display_name())
                .with_cell(&package.manager)
                .with_cell(version_cell(&package.installed_version))
                .with_cell(latest),
        );
    }
    table
}

/// Search results, with descriptions when any manager reported one.
pub fn search_table(packages: &PackageSet) -> Table {
    let mut table = Table::new("{:<}  {:<}  {:<}  {:<}");
    table.add_row(
        Row::new()
            .with_cell("Package".bold())
            .with_cell("Manager".bold())
            .with_cell("Version".bold())
            .with_cell("Description".bold()),
    );
    for package in packages.iter() {
        let version = package
            .latest_version
            .clone()
            .or_else(|| package.installed_version.clone());
        table.add_row(
            Row::new()
                .with_cell(&package.id)
                .with_cell(&package.manager)
                .with_cell(version_cell(&version))
                .with_cell(package.description.as_deref().unwrap_or("")),
        );
    }
    table
}

/// Packages installed by more than one manager.
pub fn duplicates_table(duplicates: &BTreeMap<String, Vec<&Package>>) -> Table {
    let mut table = Table::new("{:<}  {:<}");
    table.add_row(
        Row::new()
            .with_cell("Package".bold())
            .with_cell("Managers".bold()),
    );
    for (key, records) in duplicates {
        let managers: Vec<String> = records
            .iter()
            .map(|p| match &p.installed_version {
                Some(v) => format!("{} ({v})", p.manager),
                None => p.manager.clone(),
            })
            .collect();
        table.add_row(Row::new().with_cell(key).with_cell(managers.join(", ")));
    }
    table
}

/// Available managers followed by the unavailable ones.
pub fn managers_table(selection: &Selection) -> Table {
    let mut table = Table::new("{:<}  {:<}  {:<}  {:<}");
    table.add_row(
        Row::new()
            .with_cell("Id".bold())
            .with_cell("Name".bold())
            .with_cell("Version".bold())
            .with_cell("Location".bold()),
    );
    for manager in &selection.available {
        table.add_row(
            Row::new()
                .with_cell(manager.id().green())
                .with_cell(&manager.definition.name)
                .with_cell(version_cell(&manager.version))
                .with_cell(&manager.executable),
        );
    }
    for record in &selection.unavailable {
        table.add_row(
            Row::new()
                .with_cell(record.manager.red())
                .with_cell("")
                .with_cell("-")
                .with_cell(&record.message),
        );
    }
    table
}

pub fn record(record: &ErrorRecord) {
    let line = format!("{}: {}", record.manager, record.message);
    if record.fatal {
        error(&line);
    } else {
        warning(&line);
    }
}

/// Prints every error and unresolved specifier, then a one-line summary.
pub fn report(outcome: &Outcome) {
    for e in &outcome.errors {
        record(e);
    }
    for unresolved in &outcome.unresolved {
        error(&unresolved.error.to_string());
    }
    let failed = outcome.failed_managers();
    match outcome.status {
        Status::Success => {}
        Status::PartialFailure => warning(&format!(
            "{} finished with failures ({})",
            outcome.operation,
            summary(&failed, outcome.unresolved.len())
        )),
        Status::TotalFailure => error(&format!(
            "{} failed ({})",
            outcome.operation,
            summary(&failed, outcome.unresolved.len())
        )),
    }
}

fn summary(failed: &[&str], unresolved: usize) -> String {
    let mut parts = Vec::new();
    if !failed.is_empty() {
        parts.push(format!("failed: {}", failed.join(", ")));
    }
    if unresolved > 0 {
        parts.push(format!("{unresolved} unresolved package(s)"));
    }
    parts.join("; ")
}
