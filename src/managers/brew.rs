//! Homebrew formulae.

use serde::Deserialize;
use std::collections::BTreeMap;

use crate::data::{Operation, Package, OS};
use crate::definition::{
    failed_without_output, strings, ManagerDefinition, ManagerDefinitionBuilderError, OperationSpec,
    ParseOutcome, PACKAGE, QUERY,
};
use crate::managers::{parse_json, skip_line};
use crate::process::CommandOutput;

pub fn definition() -> Result<ManagerDefinition, ManagerDefinitionBuilderError> {
    ManagerDefinition::builder()
        .id("brew")
        .name("Homebrew Formulae")
        .homepage("https://brew.sh")
        .platforms(vec![OS::Macos, OS::Linux])
        .min_version("2.7.0")
        .cli_names(strings(&["brew"]))
        .purl_types(strings(&["homebrew"]))
        .env(BTreeMap::from([
            ("HOMEBREW_NO_AUTO_UPDATE".to_string(), "1".to_string()),
            ("HOMEBREW_NO_ENV_HINTS".to_string(), "1".to_string()),
        ]))
        .operation(
            Operation::Installed,
            OperationSpec::new(&["info", "--json=v2", "--installed", "--formula"])
                .parser(parse_installed),
        )
        .operation(
            Operation::Outdated,
            OperationSpec::new(&["outdated", "--json=v2", "--formula"]).parser(parse_outdated),
        )
        .operation(
            Operation::Search,
            OperationSpec::new(&["search", "--formula", QUERY]).parser(parse_search),
        )
        .operation(Operation::Install, OperationSpec::new(&["install", "--formula", PACKAGE]))
        .operation(Operation::Upgrade, OperationSpec::new(&["upgrade", "--formula", PACKAGE]))
        .operation(Operation::UpgradeAll, OperationSpec::new(&["upgrade", "--formula"]))
        .operation(Operation::Remove, OperationSpec::new(&["uninstall", "--formula", PACKAGE]))
        .operation(Operation::Sync, OperationSpec::new(&["update"]))
        .operation(Operation::Cleanup, OperationSpec::new(&["cleanup", "--prune=all"]))
        .build()
}

#[derive(Deserialize)]
struct InfoDocument {
    #[serde(default)]
    formulae: Vec<FormulaInfo>,
}

#[derive(Deserialize)]
struct FormulaInfo {
    name: String,
    #[serde(default)]
    desc: Option<String>,
    #[serde(default)]
    homepage: Option<String>,
    #[serde(default)]
    installed: Vec<InstalledVersion>,
}

#[derive(Deserialize)]
struct InstalledVersion {
    version: String,
}

#[derive(Deserialize)]
struct OutdatedDocument {
    #[serde(default)]
    formulae: Vec<OutdatedFormula>,
}

#[derive(Deserialize)]
struct OutdatedFormula {
    name: String,
    #[serde(default)]
    installed_versions: Vec<String>,
    current_version: String,
}

fn parse_installed(manager: &str, output: &CommandOutput) -> ParseOutcome {
    if let Some(failed) = failed_without_output(manager, output) {
        return failed;
    }
    parse_json(manager, &output.stdout, |doc: InfoDocument| {
        let packages = doc
            .formulae
            .into_iter()
            .map(|f| {
                let mut pkg = Package::new(manager, &f.name);
                // Several kegs can be installed side by side: report the newest.
                pkg.installed_version = f
                    .installed
                    .into_iter()
                    .map(|i| i.version)
                    .max_by(|a, b| crate::version::compare(a, b));
                pkg.description = f.desc;
                pkg.homepage = f.homepage;
                pkg
            })
            .collect();
        ParseOutcome::packages(packages)
    })
}

fn parse_outdated(manager: &str, output: &CommandOutput) -> ParseOutcome {
    if let Some(failed) = failed_without_output(manager, output) {
        return failed;
    }
    parse_json(manager, &output.stdout, |doc: OutdatedDocument| {
        let packages = doc
            .formulae
            .into_iter()
            .map(|f| {
                let mut pkg = Package::new(manager, &f.name).with_latest(f.current_version);
                pkg.installed_version = f
                    .installed_versions
                    .into_iter()
                    .max_by(|a, b| crate::version::compare(a, b));
                pkg
            })
            .collect();
        ParseOutcome::packages(packages)
    })
}

/// `brew search` prints one name per line under `==>` section headers.
fn parse_search(manager: &str, output: &CommandOutput) -> ParseOutcome {
    let packages = output
        .stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| {
            if line.starts_with("==>") || line.contains(char::is_whitespace) {
                skip_line(manager, line);
                None
            } else {
                Some(Package::new(manager, line))
            }
        })
        .collect();
    ParseOutcome::packages(packages)
}
