//! Declarative description of one package manager.
//!
//! A [`ManagerDefinition`] is plain data: identity, the platforms it runs on,
//! and a capability table mapping each supported [`Operation`] to an
//! [`OperationSpec`] (argument template plus output parser). The engine never
//! dispatches on the type of a manager, only on what its table contains.

use derive_builder::Builder;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::LazyLock;
use tracing::trace;

use crate::data::{Operation, Package, OS};
use crate::errors::{ErrorRecord, MpmError, Phase, Result};
use crate::process::CommandOutput;

/// Placeholder replaced by the package id in argument templates.
pub const PACKAGE: &str = "{package}";
/// Placeholder replaced by the requested version in versioned templates.
pub const VERSION: &str = "{version}";
/// Placeholder replaced by the search query.
pub const QUERY: &str = "{query}";

/// Turns one command's output into packages and error records.
///
/// Parsers must accept empty output and must skip lines they do not
/// understand instead of failing the whole parse.
pub type OutputParser = fn(manager: &str, output: &CommandOutput) -> ParseOutcome;

/// Extracts a version number from the output of a manager's version command.
pub type VersionParser = fn(output: &str) -> Option<String>;

/// What a parser made of one command's output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParseOutcome {
    pub packages: Vec<Package>,
    pub errors: Vec<ErrorRecord>,
}

impl ParseOutcome {
    pub fn packages(packages: Vec<Package>) -> Self {
        ParseOutcome {
            packages,
            errors: Vec::new(),
        }
    }

    pub fn has_fatal(&self) -> bool {
        self.errors.iter().any(|e| e.fatal)
    }
}

/// How to run one capability of a manager.
#[derive(Clone)]
pub struct OperationSpec {
    /// Arguments following the executable and global pre-arguments.
    pub args: Vec<String>,
    /// Alternative template used when a version is requested.
    pub versioned_args: Option<Vec<String>>,
    pub parser: OutputParser,
    /// Whether the call must be prefixed with `sudo`.
    pub sudo: bool,
}

impl OperationSpec {
    pub fn new(args: &[&str]) -> Self {
        OperationSpec {
            args: strings(args),
            versioned_args: None,
            parser: exit_status,
            sudo: false,
        }
    }

    pub fn versioned(mut self, args: &[&str]) -> Self {
        self.versioned_args = Some(strings(args));
        self
    }

    pub fn parser(mut self, parser: OutputParser) -> Self {
        self.parser = parser;
        self
    }

    pub fn sudo(mut self) -> Self {
        self.sudo = true;
        self
    }
}

impl fmt::Debug for OperationSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationSpec")
            .field("args", &self.args)
            .field("versioned_args", &self.versioned_args)
            .field("sudo", &self.sudo)
            .finish_non_exhaustive()
    }
}

/// Static description of a package manager.
#[derive(Clone, Debug, Builder)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct ManagerDefinition {
    /// Short unique token, e.g. `brew`.
    pub id: String,
    pub name: String,
    #[builder(default)]
    pub homepage: String,
    #[builder(default = "OS::ALL.to_vec()")]
    pub platforms: Vec<OS>,
    /// Lowest manager version the templates are known to work with.
    #[builder(default, setter(into, strip_option))]
    pub min_version: Option<String>,
    #[builder(default, setter(custom))]
    pub operations: BTreeMap<Operation, OperationSpec>,
    /// Executable names searched on `PATH`, in order.
    #[builder(default)]
    pub cli_names: Vec<String>,
    #[builder(default = "vec![\"--version\".to_string()]")]
    pub version_args: Vec<String>,
    #[builder(default = "extract_version as VersionParser")]
    pub version_parser: VersionParser,
    /// Commands placed in front of everything else, e.g. `nice -n 10`.
    #[builder(default)]
    pub pre_commands: Vec<String>,
    /// Arguments placed right after the executable for every call.
    #[builder(default)]
    pub pre_args: Vec<String>,
    /// Arguments appended to every call.
    #[builder(default)]
    pub post_args: Vec<String>,
    #[builder(default)]
    pub env: BTreeMap<String, String>,
    /// Managers sharing an underlying package store share a family and never
    /// run mutating calls concurrently. Defaults to the id.
    #[builder(default, setter(into, strip_option))]
    pub family: Option<String>,
    /// Package URL types this manager answers to besides its id.
    #[builder(default)]
    pub purl_types: Vec<String>,
    #[builder(default)]
    pub deprecated: bool,
}

impl ManagerDefinitionBuilder {
    /// Declares a capability.
    pub fn operation(&mut self, operation: Operation, spec: OperationSpec) -> &mut Self {
        self.operations
            .get_or_insert_with(BTreeMap::new)
            .insert(operation, spec);
        self
    }

    fn validate(&self) -> std::result::Result<(), String> {
        match &self.id {
            Some(id) if id.is_empty() => Err("manager id must not be empty".to_string()),
            Some(id) if !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') => {
                Err(format!("manager id '{id}' must be a short alphanumeric token"))
            }
            _ => Ok(()),
        }
    }
}

impl ManagerDefinition {
    pub fn builder() -> ManagerDefinitionBuilder {
        ManagerDefinitionBuilder::default()
    }

    /// The set of operations this manager supports.
    ///
    /// `backup` is implied by `installed`: a backup is an installed listing
    /// written to disk.
    pub fn capabilities(&self) -> BTreeSet<Operation> {
        let mut caps: BTreeSet<Operation> = self.operations.keys().copied().collect();
        if caps.contains(&Operation::Installed) {
            caps.insert(Operation::Backup);
        }
        caps
    }

    pub fn supports(&self, operation: Operation) -> bool {
        self.capabilities().contains(&operation)
    }

    /// Whether the dispatcher can carry out `operation` with this manager.
    ///
    /// `upgrade_all` is also reachable without a bulk form, through an
    /// outdated listing followed by one `upgrade` per package.
    pub fn can_run(&self, operation: Operation) -> bool {
        match operation {
            Operation::UpgradeAll => {
                self.supports(Operation::UpgradeAll)
                    || (self.supports(Operation::Upgrade) && self.supports(Operation::Outdated))
            }
            other => self.supports(other),
        }
    }

    /// Looks up the template for a capability.
    pub fn spec(&self, operation: Operation) -> Result<&OperationSpec> {
        let key = match operation {
            Operation::Backup => Operation::Installed,
            other => other,
        };
        self.operations
            .get(&key)
            .ok_or_else(|| MpmError::MissingCapability {
                manager: self.id.clone(),
                operation,
            })
    }

    pub fn family(&self) -> &str {
        self.family.as_deref().unwrap_or(&self.id)
    }

    pub fn supports_platform(&self, os: OS) -> bool {
        self.platforms.contains(&os)
    }

    /// Whether a package URL type or manager id designates this manager.
    pub fn answers_to(&self, hint: &str) -> bool {
        self.id.eq_ignore_ascii_case(hint)
            || self.purl_types.iter().any(|t| t.eq_ignore_ascii_case(hint))
    }

    /// The executable names to search for, defaulting to the id.
    pub fn search_names(&self) -> Vec<String> {
        if self.cli_names.is_empty() {
            vec![self.id.clone()]
        } else {
            self.cli_names.clone()
        }
    }
}

impl fmt::Display for ManagerDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

pub(crate) fn strings(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

static VERSION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+(?:\.\d+)+(?:[-+~.][0-9A-Za-z]+)*)").expect("version pattern is valid")
});

/// Default [`VersionParser`]: the first dotted number in the output.
pub fn extract_version(output: &str) -> Option<String> {
    VERSION_PATTERN
        .captures(output)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Default parser for operations without listing output: any non-zero exit
/// is a fatal execution error carrying the end of stderr.
pub fn exit_status(manager: &str, output: &CommandOutput) -> ParseOutcome {
    if output.success() {
        return ParseOutcome::default();
    }
    let detail = output.stderr_tail(5);
    trace!("{} exited with {:?}: {}", manager, output.exit_code, detail);
    ParseOutcome {
        packages: Vec::new(),
        errors: vec![ErrorRecord::fatal(
            manager,
            Phase::Execution,
            format!(
                "exited with status {}: {}",
                output
                    .exit_code
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "unknown".to_string()),
                detail
            ),
        )],
    }
}

/// Guard for listing parsers: a non-zero exit with nothing on stdout is a
/// failed call, not an empty listing.
pub fn failed_without_output(manager: &str, output: &CommandOutput) -> Option<ParseOutcome> {
    (!output.success() && output.stdout.trim().is_empty()).then(|| exit_status(manager, output))
}
