//! Debian's APT.

use regex::Regex;
use std::sync::LazyLock;

use crate::data::{Operation, Package, OS};
use crate::definition::{
    failed_without_output, strings, ManagerDefinition, ManagerDefinitionBuilderError, OperationSpec,
    ParseOutcome, PACKAGE, QUERY,
};
use crate::managers::skip_line;
use crate::process::CommandOutput;

pub fn definition() -> Result<ManagerDefinition, ManagerDefinitionBuilderError> {
    ManagerDefinition::builder()
        .id("apt")
        .name("APT")
        .homepage("https://wiki.debian.org/AptCLI")
        .platforms(vec![OS::Linux])
        .min_version("1.0.0")
        .cli_names(strings(&["apt"]))
        .purl_types(strings(&["deb"]))
        .operation(
            Operation::Installed,
            OperationSpec::new(&["list", "--installed", "--quiet"]).parser(parse_installed),
        )
        .operation(
            Operation::Outdated,
            OperationSpec::new(&["list", "--upgradable", "--quiet"]).parser(parse_outdated),
        )
        .operation(
            Operation::Search,
            OperationSpec::new(&["search", "--quiet", QUERY]).parser(parse_search),
        )
        .operation(
            Operation::Install,
            OperationSpec::new(&["install", "--yes", PACKAGE])
                .versioned(&["install", "--yes", "{package}={version}"])
                .sudo(),
        )
        .operation(
            Operation::Upgrade,
            OperationSpec::new(&["install", "--only-upgrade", "--yes", PACKAGE]).sudo(),
        )
        .operation(Operation::UpgradeAll, OperationSpec::new(&["upgrade", "--yes"]).sudo())
        .operation(Operation::Remove, OperationSpec::new(&["remove", "--yes", PACKAGE]).sudo())
        .operation(Operation::Sync, OperationSpec::new(&["update", "--quiet"]).sudo())
        .operation(
            Operation::Cleanup,
            OperationSpec::new(&["autoremove", "--yes"]).sudo(),
        )
        .build()
}

// curl/jammy-updates,now 7.81.0-1ubuntu1.15 amd64 [installed,automatic]
static INSTALLED_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<id>[^/\s]+)/\S+\s+(?P<version>\S+)\s+\S+\s+\[(?P<flags>[^\]]*)\]")
        .expect("apt installed pattern is valid")
});

// curl/jammy-updates 7.81.0-1ubuntu1.16 amd64 [upgradable from: 7.81.0-1ubuntu1.15]
static UPGRADABLE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"^(?P<id>[^/\s]+)/\S+\s+(?P<latest>\S+)\s+\S+\s+",
        r"\[upgradable from: (?P<installed>[^\]]+)\]",
    ))
    .expect("apt upgradable pattern is valid")
});

// curl/jammy-updates 7.81.0-1ubuntu1.16 amd64
static SEARCH_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<id>[^/\s]+)/\S+\s+(?P<version>\S+)").expect("apt search pattern is valid")
});

fn parse_installed(manager: &str, output: &CommandOutput) -> ParseOutcome {
    if let Some(failed) = failed_without_output(manager, output) {
        return failed;
    }
    let mut packages = Vec::new();
    for line in output.stdout.lines() {
        match INSTALLED_LINE.captures(line) {
            Some(caps) if caps["flags"].split(',').any(|f| f.starts_with("installed")) => {
                packages.push(Package::new(manager, &caps["id"]).with_installed(&caps["version"]));
            }
            _ => skip_line(manager, line),
        }
    }
    ParseOutcome::packages(packages)
}

fn parse_outdated(manager: &str, output: &CommandOutput) -> ParseOutcome {
    if let Some(failed) = failed_without_output(manager, output) {
        return failed;
    }
    let packages = output
        .stdout
        .lines()
        .filter_map(|line| match UPGRADABLE_LINE.captures(line) {
            Some(caps) => Some(
                Package::new(manager, &caps["id"])
                    .with_installed(caps["installed"].trim())
                    .with_latest(&caps["latest"]),
            ),
            None => {
                skip_line(manager, line);
                None
            }
        })
        .collect();
    ParseOutcome::packages(packages)
}

/// Search results come in blocks: a header line, then indented description
/// lines, then a blank line.
fn parse_search(manager: &str, output: &CommandOutput) -> ParseOutcome {
    if let Some(failed) = failed_without_output(manager, output) {
        return failed;
    }
    let mut packages: Vec<Package> = Vec::new();
    for line in output.stdout.lines() {
        if line.starts_with(char::is_whitespace) {
            let text = line.trim();
            if let (Some(last), false) = (packages.last_mut(), text.is_empty()) {
                if last.description.is_none() {
                    last.description = Some(text.to_string());
                }
            }
            continue;
        }
        match SEARCH_HEADER.captures(line) {
            Some(caps) => {
                packages.push(Package::new(manager, &caps["id"]).with_latest(&caps["version"]))
            }
            None => skip_line(manager, line),
        }
    }
    ParseOutcome::packages(packages)
}
