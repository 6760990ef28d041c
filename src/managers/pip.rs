//! Python's pip, against whichever interpreter is first on `PATH`.

use serde::Deserialize;
use std::collections::BTreeMap;

use crate::data::{Operation, Package};
use crate::definition::{
    failed_without_output, strings, ManagerDefinition, ManagerDefinitionBuilderError, OperationSpec,
    ParseOutcome, PACKAGE,
};
use crate::managers::parse_json;
use crate::process::CommandOutput;

/// pip has no search (PyPI disabled the XML-RPC endpoint) and no bulk
/// upgrade; upgrading everything goes through the outdated listing.
pub fn definition() -> Result<ManagerDefinition, ManagerDefinitionBuilderError> {
    ManagerDefinition::builder()
        .id("pip")
        .name("Pip")
        .homepage("https://pip.pypa.io")
        .min_version("10.0.0")
        .cli_names(strings(&["pip3", "pip"]))
        .purl_types(strings(&["pypi"]))
        .env(BTreeMap::from([(
            "PIP_DISABLE_PIP_VERSION_CHECK".to_string(),
            "1".to_string(),
        )]))
        .pre_args(strings(&["--no-color"]))
        .operation(
            Operation::Installed,
            OperationSpec::new(&["list", "--format=json"]).parser(parse_listing),
        )
        .operation(
            Operation::Outdated,
            OperationSpec::new(&["list", "--outdated", "--format=json"]).parser(parse_listing),
        )
        .operation(
            Operation::Install,
            OperationSpec::new(&["install", PACKAGE])
                .versioned(&["install", "{package}=={version}"]),
        )
        .operation(
            Operation::Upgrade,
            OperationSpec::new(&["install", "--upgrade", PACKAGE]),
        )
        .operation(Operation::Remove, OperationSpec::new(&["uninstall", "--yes", PACKAGE]))
        .operation(Operation::Cleanup, OperationSpec::new(&["cache", "purge"]))
        .build()
}

#[derive(Deserialize)]
struct ListEntry {
    name: String,
    version: String,
    #[serde(default)]
    latest_version: Option<String>,
}

/// Both listings share a format; the outdated one adds `latest_version`.
fn parse_listing(manager: &str, output: &CommandOutput) -> ParseOutcome {
    if let Some(failed) = failed_without_output(manager, output) {
        return failed;
    }
    parse_json(manager, &output.stdout, |doc: Vec<ListEntry>| {
        let packages = doc
            .into_iter()
            .map(|entry| {
                let mut pkg = Package::new(manager, entry.name).with_installed(entry.version);
                pkg.latest_version = entry.latest_version;
                pkg
            })
            .collect();
        ParseOutcome::packages(packages)
    })
}
