//! Arch Linux's pacman and the yay AUR helper.
//!
//! Both front ends write to the same local package database, so they share
//! the `pacman` family and never mutate concurrently.

use regex::Regex;
use std::sync::LazyLock;

use crate::data::{Operation, Package, OS};
use crate::definition::{
    failed_without_output, strings, ManagerDefinition, ManagerDefinitionBuilder,
    ManagerDefinitionBuilderError, OperationSpec, ParseOutcome, PACKAGE, QUERY,
};
use crate::managers::skip_line;
use crate::process::CommandOutput;

const FAMILY: &str = "pacman";

pub fn pacman() -> Result<ManagerDefinition, ManagerDefinitionBuilderError> {
    with_operations(ManagerDefinition::builder(), true)
        .id("pacman")
        .name("Pacman")
        .homepage("https://wiki.archlinux.org/title/pacman")
        .min_version("5.0.0")
        .cli_names(strings(&["pacman"]))
        .build()
}

/// yay escalates privileges itself and refuses to run under `sudo`.
pub fn yay() -> Result<ManagerDefinition, ManagerDefinitionBuilderError> {
    with_operations(ManagerDefinition::builder(), false)
        .id("yay")
        .name("Yay")
        .homepage("https://github.com/Jguer/yay")
        .min_version("11.0.0")
        .cli_names(strings(&["yay"]))
        .operation(
            Operation::Cleanup,
            OperationSpec::new(&["--yay", "--clean", "--noconfirm"]),
        )
        .build()
}

fn with_operations(
    mut builder: ManagerDefinitionBuilder,
    elevated: bool,
) -> ManagerDefinitionBuilder {
    let sudo = |spec: OperationSpec| if elevated { spec.sudo() } else { spec };
    builder
        .platforms(vec![OS::Linux])
        .family(FAMILY)
        .purl_types(strings(&["alpm"]))
        .operation(
            Operation::Installed,
            OperationSpec::new(&["--query"]).parser(parse_installed),
        )
        .operation(
            Operation::Outdated,
            OperationSpec::new(&["--query", "--upgrades"]).parser(parse_outdated),
        )
        .operation(
            Operation::Search,
            OperationSpec::new(&["--sync", "--search", QUERY]).parser(parse_search),
        )
        .operation(
            Operation::Install,
            sudo(OperationSpec::new(&["--sync", "--noconfirm", PACKAGE])),
        )
        .operation(
            Operation::Upgrade,
            sudo(OperationSpec::new(&["--sync", "--noconfirm", PACKAGE])),
        )
        .operation(
            Operation::UpgradeAll,
            sudo(OperationSpec::new(&["--sync", "--refresh", "--sysupgrade", "--noconfirm"])),
        )
        .operation(
            Operation::Remove,
            sudo(OperationSpec::new(&["--remove", "--noconfirm", PACKAGE])),
        )
        .operation(
            Operation::Sync,
            sudo(OperationSpec::new(&["--sync", "--refresh"])),
        )
        .operation(
            Operation::Cleanup,
            sudo(OperationSpec::new(&["--sync", "--clean", "--noconfirm"])),
        );
    builder
}

// linux 6.9.7.arch1-1
static INSTALLED_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<id>\S+) (?P<version>\S+)$").expect("pacman installed pattern is valid")
});

// linux 6.9.7.arch1-1 -> 6.9.8.arch1-1
static UPGRADE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<id>\S+) (?P<installed>\S+) -> (?P<latest>\S+)")
        .expect("pacman upgrade pattern is valid")
});

// extra/ripgrep 14.1.0-1 [installed]
static SEARCH_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<repo>[^/\s]+)/(?P<id>\S+) (?P<version>\S+)")
        .expect("pacman search pattern is valid")
});

fn parse_installed(manager: &str, output: &CommandOutput) -> ParseOutcome {
    if let Some(failed) = failed_without_output(manager, output) {
        return failed;
    }
    let packages = output
        .stdout
        .lines()
        .filter_map(|line| match INSTALLED_LINE.captures(line.trim()) {
            Some(caps) => Some(Package::new(manager, &caps["id"]).with_installed(&caps["version"])),
            None => {
                skip_line(manager, line);
                None
            }
        })
        .collect();
    ParseOutcome::packages(packages)
}

/// `--query --upgrades` exits with 1 when nothing is outdated.
fn parse_outdated(manager: &str, output: &CommandOutput) -> ParseOutcome {
    // Exit 1 with no output means nothing to upgrade.
    if output.exit_code == Some(1) && output.stdout.trim().is_empty() {
        return ParseOutcome::default();
    }
    if let Some(failed) = failed_without_output(manager, output) {
        return failed;
    }
    let packages = output
        .stdout
        .lines()
        .filter_map(|line| match UPGRADE_LINE.captures(line.trim()) {
            Some(caps) => Some(
                Package::new(manager, &caps["id"])
                    .with_installed(&caps["installed"])
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

fn parse_search(manager: &str, output: &CommandOutput) -> ParseOutcome {
    let mut packages: Vec<Package> = Vec::new();
    for line in output.stdout.lines() {
        if line.starts_with(char::is_whitespace) {
            if let Some(last) = packages.last_mut() {
                let text = line.trim();
                if !text.is_empty() && last.description.is_none() {
                    last.description = Some(text.to_string());
                }
            }
            continue;
        }
        match SEARCH_HEADER.captures(line) {
            Some(caps) => packages.push(
                Package::new(manager, &caps["id"]).with_latest(&caps["version"]),
            ),
            None => skip_line(manager, line),
        }
    }
    ParseOutcome::packages(packages)
}
