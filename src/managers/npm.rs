//! Node's npm, global packages only.

use serde::Deserialize;
use std::collections::BTreeMap;

use crate::data::{Operation, Package};
use crate::definition::{
    exit_status, failed_without_output, strings, ManagerDefinition, ManagerDefinitionBuilderError,
    OperationSpec, ParseOutcome, PACKAGE, QUERY,
};
use crate::managers::parse_json;
use crate::process::CommandOutput;

pub fn definition() -> Result<ManagerDefinition, ManagerDefinitionBuilderError> {
    ManagerDefinition::builder()
        .id("npm")
        .name("Node's npm")
        .homepage("https://www.npmjs.com")
        .min_version("4.0.0")
        .cli_names(strings(&["npm"]))
        .purl_types(strings(&["npm"]))
        .pre_args(strings(&["--global", "--no-progress", "--no-update-notifier", "--no-fund"]))
        .operation(
            Operation::Installed,
            OperationSpec::new(&["--json", "list", "--depth", "0"]).parser(parse_installed),
        )
        .operation(
            Operation::Outdated,
            OperationSpec::new(&["--json", "outdated"]).parser(parse_outdated),
        )
        .operation(
            Operation::Search,
            OperationSpec::new(&["search", "--json", QUERY]).parser(parse_search),
        )
        .operation(
            Operation::Install,
            OperationSpec::new(&["install", PACKAGE])
                .versioned(&["install", "{package}@{version}"]),
        )
        .operation(Operation::Upgrade, OperationSpec::new(&["update", PACKAGE]))
        .operation(Operation::UpgradeAll, OperationSpec::new(&["update"]))
        .operation(Operation::Remove, OperationSpec::new(&["uninstall", PACKAGE]))
        .operation(Operation::Cleanup, OperationSpec::new(&["cache", "clean", "--force"]))
        .build()
}

#[derive(Deserialize)]
struct ListDocument {
    #[serde(default)]
    dependencies: BTreeMap<String, ListEntry>,
}

#[derive(Deserialize)]
struct ListEntry {
    #[serde(default)]
    version: Option<String>,
}

#[derive(Deserialize)]
struct OutdatedEntry {
    #[serde(default)]
    current: Option<String>,
    #[serde(default)]
    latest: Option<String>,
}

#[derive(Deserialize)]
struct SearchEntry {
    name: String,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    links: SearchLinks,
}

#[derive(Deserialize, Default)]
struct SearchLinks {
    #[serde(default)]
    homepage: Option<String>,
}

fn parse_installed(manager: &str, output: &CommandOutput) -> ParseOutcome {
    if let Some(failed) = failed_without_output(manager, output) {
        return failed;
    }
    parse_json(manager, &output.stdout, |doc: ListDocument| {
        let packages = doc
            .dependencies
            .into_iter()
            .map(|(id, entry)| {
                let mut pkg = Package::new(manager, id);
                pkg.installed_version = entry.version;
                pkg
            })
            .collect();
        ParseOutcome::packages(packages)
    })
}

/// `npm outdated` exits with 1 whenever something is outdated, so the exit
/// code only matters when there is no JSON to read.
fn parse_outdated(manager: &str, output: &CommandOutput) -> ParseOutcome {
    if output.stdout.trim().is_empty() && output.exit_code != Some(1) {
        return exit_status(manager, output);
    }
    parse_json(manager, &output.stdout, |doc: BTreeMap<String, OutdatedEntry>| {
        let packages = doc
            .into_iter()
            .map(|(id, entry)| {
                let mut pkg = Package::new(manager, id);
                pkg.installed_version = entry.current;
                pkg.latest_version = entry.latest;
                pkg
            })
            .collect();
        ParseOutcome::packages(packages)
    })
}

fn parse_search(manager: &str, output: &CommandOutput) -> ParseOutcome {
    if let Some(failed) = failed_without_output(manager, output) {
        return failed;
    }
    parse_json(manager, &output.stdout, |doc: Vec<SearchEntry>| {
        let packages = doc
            .into_iter()
            .map(|entry| {
                let mut pkg = Package::new(manager, entry.name);
                pkg.latest_version = entry.version;
                pkg.description = entry.description;
                pkg.homepage = entry.links.homepage;
                pkg
            })
            .collect();
        ParseOutcome::packages(packages)
    })
}
