//! Choosing which managers take part in an operation.
//!
//! Selection happens in two stages. [`Selector::candidates`] is pure: it
//! applies the include/exclude lists, the platform and deprecation filters and
//! the capability check. [`Selector::select`] then locates each candidate's
//! executable and probes its version. Detection failures are collected as
//! non-fatal records; only an empty result is an error.
//!
//! Nothing is memoized across calls: every [`Selection`] is built fresh for
//! one invocation of the tool.

use futures::future::join_all;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

use crate::command::CommandBuilder;
use crate::data::{Operation, OS};
use crate::definition::ManagerDefinition;
use crate::errors::{ErrorRecord, MpmError, Phase, Result};
use crate::managers::Registry;
use crate::process::CommandRunner;
use crate::version::meets_minimum;

/// Which managers the user asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionPolicy {
    /// When non-empty, only these managers, in this order.
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    /// Ignore platform restrictions and deprecation.
    pub all_managers: bool,
    pub operation: Operation,
}

impl SelectionPolicy {
    pub fn new(operation: Operation) -> Self {
        SelectionPolicy {
            include: Vec::new(),
            exclude: Vec::new(),
            all_managers: false,
            operation,
        }
    }

    pub fn include<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.include = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn exclude<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn all_managers(mut self, all: bool) -> Self {
        self.all_managers = all;
        self
    }

    /// The same manager filters, for another operation.
    pub fn for_operation(&self, operation: Operation) -> Self {
        SelectionPolicy {
            operation,
            ..self.clone()
        }
    }
}

/// A manager found on this machine.
#[derive(Debug, Clone)]
pub struct SelectedManager {
    pub definition: Arc<ManagerDefinition>,
    /// Path (or bare name) used as argv[0].
    pub executable: String,
    pub version: Option<String>,
}

impl SelectedManager {
    pub fn id(&self) -> &str {
        &self.definition.id
    }
}

/// The managers taking part in one invocation.
#[derive(Debug, Clone, Default)]
pub struct Selection {
    pub available: Vec<SelectedManager>,
    /// One detection record per candidate that could not be used.
    pub unavailable: Vec<ErrorRecord>,
}

impl Selection {
    pub fn get(&self, id: &str) -> Option<&SelectedManager> {
        self.available.iter().find(|m| m.id() == id)
    }

    pub fn ids(&self) -> Vec<&str> {
        self.available.iter().map(SelectedManager::id).collect()
    }

    /// The available managers able to run `operation`, in selection order.
    pub fn capable_of(&self, operation: Operation) -> Vec<&SelectedManager> {
        self.available
            .iter()
            .filter(|m| m.definition.can_run(operation))
            .collect()
    }
}

/// Filters and probes registry entries against one machine.
pub struct Selector<'a, R: CommandRunner> {
    registry: &'a Registry,
    runner: &'a R,
    os: OS,
    search_path: Option<String>,
    working_dir: PathBuf,
    overrides: BTreeMap<String, PathBuf>,
    extra_env: BTreeMap<String, BTreeMap<String, String>>,
}

impl<'a, R: CommandRunner> Selector<'a, R> {
    /// `search_path` is the `PATH` value of the explicit child environment,
    /// never the ambient one.
    pub fn new(registry: &'a Registry, runner: &'a R, search_path: Option<String>) -> Self {
        Selector {
            registry,
            runner,
            os: OS::current(),
            search_path,
            working_dir: PathBuf::from("."),
            overrides: BTreeMap::new(),
            extra_env: BTreeMap::new(),
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

    /// Explicit executable paths, keyed by manager id.
    pub fn with_overrides(mut self, overrides: BTreeMap<String, PathBuf>) -> Self {
        self.overrides = overrides;
        self
    }

    /// Extra environment for the version probe, keyed by manager id.
    pub fn with_manager_env(mut self, env: BTreeMap<String, BTreeMap<String, String>>) -> Self {
        self.extra_env = env;
        self
    }

    /// Definitions that pass the static filters, in selection order.
    pub fn candidates(&self, policy: &SelectionPolicy) -> Result<Vec<Arc<ManagerDefinition>>> {
        for id in policy.include.iter().chain(&policy.exclude) {
            if self.registry.get(id).is_none() {
                return Err(MpmError::UnknownManager(id.clone()));
            }
        }

        let ordered: Vec<&Arc<ManagerDefinition>> = if policy.include.is_empty() {
            self.registry.iter().collect()
        } else {
            let mut seen = Vec::new();
            policy
                .include
                .iter()
                .filter(|id| {
                    let first = !seen.contains(id);
                    seen.push(*id);
                    first
                })
                .filter_map(|id| self.registry.get(id))
                .collect()
        };

        let explicit = !policy.include.is_empty();
        let candidates: Vec<Arc<ManagerDefinition>> = ordered
            .into_iter()
            .filter(|def| {
                if policy.exclude.contains(&def.id) {
                    debug!("{} excluded by policy", def.id);
                    return false;
                }
                if !policy.all_managers && !def.supports_platform(self.os) {
                    debug!("{} does not run on {}", def.id, self.os);
                    return false;
                }
                if def.deprecated && !policy.all_managers && !explicit {
                    debug!("{} is deprecated, skipping", def.id);
                    return false;
                }
                if !def.can_run(policy.operation) {
                    debug!("{} cannot {}", def.id, policy.operation);
                    return false;
                }
                true
            })
            .cloned()
            .collect();

        if candidates.is_empty() {
            return Err(MpmError::NoApplicableManager {
                operation: policy.operation.to_string(),
            });
        }
        Ok(candidates)
    }

    /// Candidates that are installed here and recent enough.
    pub async fn select(&self, policy: &SelectionPolicy) -> Result<Selection> {
        let selection = self.survey(policy).await?;
        if selection.available.is_empty() {
            return Err(MpmError::NoApplicableManager {
                operation: policy.operation.to_string(),
            });
        }
        debug!("Selected managers: {:?}", selection.ids());
        Ok(selection)
    }

    /// Probes every candidate, keeping the unavailable ones as records even
    /// when none is usable.
    pub async fn survey(&self, policy: &SelectionPolicy) -> Result<Selection> {
        let candidates = self.candidates(policy)?;
        let probes = candidates.iter().map(|def| self.probe(def.clone()));
        let mut selection = Selection::default();
        for result in join_all(probes).await {
            match result {
                Ok(manager) => selection.available.push(manager),
                Err(record) => {
                    info!("{}", record);
                    selection.unavailable.push(record);
                }
            }
        }
        Ok(selection)
    }

    fn locate(&self, def: &ManagerDefinition) -> std::result::Result<String, ErrorRecord> {
        if let Some(path) = self.overrides.get(&def.id) {
            return if path.is_file() {
                Ok(path.display().to_string())
            } else {
                Err(ErrorRecord::warning(
                    &def.id,
                    Phase::Detection,
                    format!("configured executable {} does not exist", path.display()),
                ))
            };
        }
        let names = def.search_names();
        names
            .iter()
            .find_map(|name| {
                which::which_in(name, self.search_path.as_ref(), &self.working_dir).ok()
            })
            .map(|path| path.display().to_string())
            .ok_or_else(|| {
                ErrorRecord::warning(
                    &def.id,
                    Phase::Detection,
                    format!("none of {} found on PATH", names.join(", ")),
                )
            })
    }

    async fn probe(
        &self,
        def: Arc<ManagerDefinition>,
    ) -> std::result::Result<SelectedManager, ErrorRecord> {
        let executable = self.locate(&def)?;
        let mut builder = CommandBuilder::new(&def, executable.clone());
        if let Some(env) = self.extra_env.get(&def.id) {
            builder = builder.with_env(env.clone());
        }
        let output = self
            .runner
            .run(&builder.version_probe())
            .await
            .map_err(|e| {
                ErrorRecord::warning(
                    &def.id,
                    Phase::Detection,
                    format!("version check failed: {e}"),
                )
            })?;
        if !output.success() {
            return Err(ErrorRecord::warning(
                &def.id,
                Phase::Detection,
                format!("version check failed: {}", output.stderr_tail(3)),
            ));
        }

        let version = (def.version_parser)(&output.stdout);
        if let (Some(found), Some(minimum)) = (&version, &def.min_version) {
            if !meets_minimum(found, minimum) {
                return Err(ErrorRecord::warning(
                    &def.id,
                    Phase::Detection,
                    format!("version {found} is older than the required {minimum}"),
                ));
            }
        }
        if version.is_none() {
            debug!("{}: could not read a version from {:?}", def.id, output.stdout);
        }

        Ok(SelectedManager {
            definition: def,
            executable,
            version,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Invocation;
    use crate::definition::OperationSpec;
    use crate::process::{CommandOutput, ExecError};
    use std::time::Duration;

    /// Answers every version probe with a fixed string.
    struct FixedVersion(&'static str);

    impl CommandRunner for FixedVersion {
        async fn run(
            &self,
            _invocation: &Invocation,
        ) -> std::result::Result<CommandOutput, ExecError> {
            Ok(CommandOutput {
                exit_code: Some(0),
                stdout: self.0.to_string(),
                stderr: String::new(),
                elapsed: Duration::ZERO,
            })
        }
    }

    fn def(id: &str, platforms: Vec<OS>, deprecated: bool) -> ManagerDefinition {
        ManagerDefinition::builder()
            .id(id)
            .name(id)
            .platforms(platforms)
            .deprecated(deprecated)
            .min_version("2.0")
            .operation(Operation::Installed, OperationSpec::new(&["list"]))
            .build()
            .unwrap()
    }

    fn registry() -> Registry {
        Registry::new(vec![
            def("alpha", vec![OS::Linux], false),
            def("beta", vec![OS::Macos], false),
            def("gamma", vec![OS::Linux], true),
            def("delta", OS::ALL.to_vec(), false),
        ])
        .unwrap()
    }

    fn ids(defs: &[Arc<ManagerDefinition>]) -> Vec<&str> {
        defs.iter().map(|d| d.id.as_str()).collect()
    }

    #[test]
    fn test_candidates_follow_registration_order() {
        let registry = registry();
        let runner = FixedVersion("2.0");
        let selector = Selector::new(&registry, &runner, None).with_os(OS::Linux);
        let candidates = selector.candidates(&SelectionPolicy::new(Operation::Installed)).unwrap();
        assert_eq!(ids(&candidates), vec!["alpha", "delta"]);
    }

    #[test]
    fn test_include_order_wins_and_duplicates_collapse() {
        let registry = registry();
        let runner = FixedVersion("2.0");
        let selector = Selector::new(&registry, &runner, None).with_os(OS::Linux);
        let policy =
            SelectionPolicy::new(Operation::Installed).include(["delta", "gamma", "delta"]);
        let candidates = selector.candidates(&policy).unwrap();
        assert_eq!(ids(&candidates), vec!["delta", "gamma"]);
    }

    #[test]
    fn test_all_managers_ignores_platform() {
        let registry = registry();
        let runner = FixedVersion("2.0");
        let selector = Selector::new(&registry, &runner, None).with_os(OS::Linux);
        let policy = SelectionPolicy::new(Operation::Installed)
            .all_managers(true)
            .exclude(["alpha"]);
        let candidates = selector.candidates(&policy).unwrap();
        assert_eq!(ids(&candidates), vec!["beta", "gamma", "delta"]);
    }

    #[test]
    fn test_unknown_and_incapable() {
        let registry = registry();
        let runner = FixedVersion("2.0");
        let selector = Selector::new(&registry, &runner, None).with_os(OS::Linux);

        let unknown = SelectionPolicy::new(Operation::Installed).include(["nope"]);
        assert!(matches!(
            selector.candidates(&unknown),
            Err(MpmError::UnknownManager(id)) if id == "nope"
        ));

        let incapable = SelectionPolicy::new(Operation::Remove);
        assert!(matches!(
            selector.candidates(&incapable),
            Err(MpmError::NoApplicableManager { .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_override_is_unavailable() {
        let registry = registry();
        let runner = FixedVersion("2.0");
        let overrides =
            BTreeMap::from([("alpha".to_string(), PathBuf::from("/nonexistent/alpha"))]);
        let selector = Selector::new(&registry, &runner, Some(String::new()))
            .with_os(OS::Linux)
            .with_overrides(overrides);
        let policy = SelectionPolicy::new(Operation::Installed).include(["alpha"]);

        let err = selector.select(&policy).await.unwrap_err();
        assert_eq!(err.category(), "no_applicable_manager");
    }
}
