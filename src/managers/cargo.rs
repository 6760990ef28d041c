//! Binaries installed with `cargo install`.

use regex::Regex;
use std::sync::LazyLock;

use crate::data::{Operation, Package};
use crate::definition::{
    failed_without_output, strings, ManagerDefinition, ManagerDefinitionBuilderError, OperationSpec,
    ParseOutcome, PACKAGE, QUERY,
};
use crate::managers::skip_line;
use crate::process::CommandOutput;

/// cargo has no outdated listing and no bulk upgrade; `install` on an
/// installed crate upgrades it in place.
pub fn definition() -> Result<ManagerDefinition, ManagerDefinitionBuilderError> {
    ManagerDefinition::builder()
        .id("cargo")
        .name("Rust's cargo")
        .homepage("https://doc.rust-lang.org/cargo/")
        .min_version("1.40.0")
        .cli_names(strings(&["cargo"]))
        .purl_types(strings(&["cargo"]))
        .operation(
            Operation::Installed,
            OperationSpec::new(&["install", "--list"]).parser(parse_installed),
        )
        .operation(
            Operation::Search,
            OperationSpec::new(&["search", "--limit", "100", "--color", "never", QUERY])
                .parser(parse_search),
        )
        .operation(
            Operation::Install,
            OperationSpec::new(&["install", PACKAGE])
                .versioned(&["install", PACKAGE, "--version", "{version}"]),
        )
        .operation(Operation::Upgrade, OperationSpec::new(&["install", PACKAGE]))
        .operation(Operation::Remove, OperationSpec::new(&["uninstall", PACKAGE]))
        .build()
}

// ripgrep v14.1.0:
// mpm v0.4.0 (/home/me/src/mpm):
static INSTALLED_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<id>\S+) v(?P<version>\S+?)(?: \(.*\))?:$")
        .expect("cargo installed pattern is valid")
});

// ripgrep = "14.1.0"    # ripgrep is a line-oriented search tool
static SEARCH_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^(?P<id>\S+) = "(?P<version>[^"]+)"\s*(?:#\s*(?P<desc>.*))?$"#)
        .expect("cargo search pattern is valid")
});

/// Indented lines under each header list the crate's binaries.
fn parse_installed(manager: &str, output: &CommandOutput) -> ParseOutcome {
    if let Some(failed) = failed_without_output(manager, output) {
        return failed;
    }
    let packages = output
        .stdout
        .lines()
        .filter(|line| !line.starts_with(char::is_whitespace))
        .filter_map(|line| match INSTALLED_HEADER.captures(line) {
            Some(caps) => Some(Package::new(manager, &caps["id"]).with_installed(&caps["version"])),
            None => {
                skip_line(manager, line);
                None
            }
        })
        .collect();
    ParseOutcome::packages(packages)
}

fn parse_search(manager: &str, output: &CommandOutput) -> ParseOutcome {
    if let Some(failed) = failed_without_output(manager, output) {
        return failed;
    }
    let packages = output
        .stdout
        .lines()
        .filter_map(|line| match SEARCH_LINE.captures(line.trim_end()) {
            Some(caps) => {
                let mut pkg = Package::new(manager, &caps["id"]).with_latest(&caps["version"]);
                pkg.description = caps
                    .name("desc")
                    .map(|d| d.as_str().trim().to_string())
                    .filter(|d| !d.is_empty());
                Some(pkg)
            }
            None => {
                skip_line(manager, line);
                None
            }
        })
        .collect();
    ParseOutcome::packages(packages)
}
