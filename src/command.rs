//! Turning a manager definition plus operation arguments into argv.
//!
//! Every argv has the same shape:
//!
//! ```text
//! [pre-commands] [sudo] executable [pre-args] [operation template] [post-args]
//! ```
//!
//! Building is pure: the same definition, executable and arguments always
//! produce the same [`Invocation`]s.

use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, warn};

use crate::data::{Operation, Package};
use crate::definition::{ManagerDefinition, PACKAGE, QUERY, VERSION};
use crate::errors::{ErrorRecord, MpmError, Phase, Result};

/// One fully assembled external call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub manager: String,
    /// `None` for the version probe run during selection.
    pub operation: Option<Operation>,
    pub argv: Vec<String>,
    /// Variables added on top of the executor's base environment.
    pub env: BTreeMap<String, String>,
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match shlex::try_join(self.argv.iter().map(String::as_str)) {
            Ok(line) => f.write_str(&line),
            Err(_) => f.write_str(&self.argv.join(" ")),
        }
    }
}

/// Values substituted into an operation template.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateArgs {
    pub package: Option<String>,
    pub version: Option<String>,
    pub query: Option<String>,
}

impl TemplateArgs {
    pub fn none() -> Self {
        TemplateArgs::default()
    }

    pub fn package(id: impl Into<String>, version: Option<String>) -> Self {
        TemplateArgs {
            package: Some(id.into()),
            version,
            query: None,
        }
    }

    pub fn query(query: impl Into<String>) -> Self {
        TemplateArgs {
            query: Some(query.into()),
            ..Default::default()
        }
    }
}

/// How an upgrade of every outdated package will be carried out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandPlan {
    /// One call upgrades everything.
    Bulk(Invocation),
    /// The manager has no bulk form: one call per outdated package, run in
    /// sequence.
    Iterative(Vec<Invocation>),
}

impl CommandPlan {
    pub fn invocations(&self) -> Vec<&Invocation> {
        match self {
            CommandPlan::Bulk(invocation) => vec![invocation],
            CommandPlan::Iterative(invocations) => invocations.iter().collect(),
        }
    }

    pub fn is_iterative(&self) -> bool {
        matches!(self, CommandPlan::Iterative(_))
    }
}

/// An invocation plus the non-fatal notes produced while building it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Built<T> {
    pub value: T,
    pub warnings: Vec<ErrorRecord>,
}

/// Assembles invocations for one manager.
#[derive(Debug, Clone)]
pub struct CommandBuilder<'a> {
    definition: &'a ManagerDefinition,
    executable: String,
    sudo: Vec<String>,
    extra_env: BTreeMap<String, String>,
}

impl<'a> CommandBuilder<'a> {
    pub fn new(definition: &'a ManagerDefinition, executable: impl Into<String>) -> Self {
        CommandBuilder {
            definition,
            executable: executable.into(),
            sudo: vec!["sudo".to_string()],
            extra_env: BTreeMap::new(),
        }
    }

    pub fn definition(&self) -> &'a ManagerDefinition {
        self.definition
    }

    /// Replaces the privilege elevation prefix (default `sudo`).
    pub fn with_sudo(mut self, sudo: Vec<String>) -> Self {
        self.sudo = sudo;
        self
    }

    /// Adds environment variables on top of the definition's own.
    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.extra_env.extend(env);
        self
    }

    /// Builds the single call for `operation`.
    pub fn build(&self, operation: Operation, args: &TemplateArgs) -> Result<Built<Invocation>> {
        let def = self.definition;
        let spec = def.spec(operation)?;
        let mut warnings = Vec::new();

        let template = match (&args.version, &spec.versioned_args) {
            (Some(_), Some(versioned)) => versioned,
            (Some(version), None) => {
                warn!(
                    "{} cannot {} a specific version, ignoring {}",
                    def.id, operation, version
                );
                warnings.push(ErrorRecord::warning(
                    &def.id,
                    Phase::Execution,
                    format!("{operation} does not support version constraints, ignoring {version}"),
                ));
                &spec.args
            }
            (None, _) => &spec.args,
        };

        let mut argv = Vec::with_capacity(
            def.pre_commands.len()
                + self.sudo.len()
                + 1
                + def.pre_args.len()
                + template.len()
                + def.post_args.len(),
        );
        argv.extend(def.pre_commands.iter().cloned());
        if spec.sudo {
            argv.extend(self.sudo.iter().cloned());
        }
        argv.push(self.executable.clone());
        argv.extend(def.pre_args.iter().cloned());
        for token in template {
            argv.push(expand(token, args, &def.id, operation)?);
        }
        argv.extend(def.post_args.iter().cloned());

        let mut env = def.env.clone();
        env.extend(self.extra_env.clone());

        let invocation = Invocation {
            manager: def.id.clone(),
            operation: Some(operation),
            argv,
            env,
        };
        debug!("Built {} command for {}: {}", operation, def.id, invocation);
        Ok(Built {
            value: invocation,
            warnings,
        })
    }

    /// The call that prints the manager's own version.
    pub fn version_probe(&self) -> Invocation {
        let def = self.definition;
        let mut argv = vec![self.executable.clone()];
        argv.extend(def.version_args.iter().cloned());
        let mut env = def.env.clone();
        env.extend(self.extra_env.clone());
        Invocation {
            manager: def.id.clone(),
            operation: None,
            argv,
            env,
        }
    }

    /// Plans the upgrade of every package in `outdated`.
    ///
    /// Uses the manager's bulk form when it has one. Otherwise falls back to
    /// one `upgrade` call per package and reports the fallback as a warning.
    pub fn plan_upgrade_all(&self, outdated: &[Package]) -> Result<Built<CommandPlan>> {
        let def = self.definition;
        if def.supports(Operation::UpgradeAll) {
            let built = self.build(Operation::UpgradeAll, &TemplateArgs::none())?;
            return Ok(Built {
                value: CommandPlan::Bulk(built.value),
                warnings: built.warnings,
            });
        }
        if !def.supports(Operation::Upgrade) {
            return Err(MpmError::MissingCapability {
                manager: def.id.clone(),
                operation: Operation::UpgradeAll,
            });
        }

        let mut warnings = vec![ErrorRecord::warning(
            &def.id,
            Phase::Execution,
            format!(
                "no bulk upgrade available, upgrading {} package(s) one by one",
                outdated.len()
            ),
        )];
        let mut invocations = Vec::with_capacity(outdated.len());
        for package in outdated {
            let built = self.build(Operation::Upgrade, &TemplateArgs::package(&package.id, None))?;
            warnings.extend(built.warnings);
            invocations.push(built.value);
        }
        Ok(Built {
            value: CommandPlan::Iterative(invocations),
            warnings,
        })
    }
}

/// Substitutes placeholders in one pass over `token`; substituted values are
/// never expanded again.
fn expand(token: &str, args: &TemplateArgs, manager: &str, operation: Operation) -> Result<String> {
    let placeholders = [
        (PACKAGE, &args.package),
        (VERSION, &args.version),
        (QUERY, &args.query),
    ];
    let mut out = String::with_capacity(token.len());
    let mut rest = token;
    while !rest.is_empty() {
        let found = placeholders
            .iter()
            .find(|(placeholder, _)| rest.starts_with(placeholder));
        match found {
            Some((placeholder, value)) => {
                let value = value.as_deref().ok_or_else(|| {
                    MpmError::invalid_specifier(
                        token,
                        format!("{manager} {operation} needs a value for {placeholder}"),
                    )
                })?;
                out.push_str(value);
                rest = &rest[placeholder.len()..];
            }
            None => {
                let mut chars = rest.chars();
                if let Some(c) = chars.next() {
                    out.push(c);
                }
                rest = chars.as_str();
            }
        }
    }
    Ok(out)
}
