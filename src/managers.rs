//! Built-in manager definitions and the registry that holds them.
//!
//! Each submodule contributes one or more [`ManagerDefinition`]s together with
//! the parsers for that tool's output. The registry keeps them in
//! registration order, which is the default selection order.

use std::sync::Arc;
use tracing::trace;

use crate::definition::{ManagerDefinition, ManagerDefinitionBuilderError, ParseOutcome};
use crate::errors::{ErrorRecord, MpmError, Phase, Result};

pub mod apt;
pub mod brew;
pub mod cargo;
pub mod npm;
pub mod pacman;
pub mod pip;

/// All known manager definitions, in registration order.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    definitions: Vec<Arc<ManagerDefinition>>,
}

impl Registry {
    /// Builds a registry, rejecting duplicate ids.
    pub fn new(definitions: Vec<ManagerDefinition>) -> Result<Self> {
        let mut registry = Registry::default();
        for definition in definitions {
            registry.register(definition)?;
        }
        Ok(registry)
    }

    /// The registry of every manager shipped with mpm.
    pub fn builtin() -> Result<Self> {
        Registry::new(vec![
            brew::definition().map_err(builder_error)?,
            apt::definition().map_err(builder_error)?,
            pacman::pacman().map_err(builder_error)?,
            pacman::yay().map_err(builder_error)?,
            cargo::definition().map_err(builder_error)?,
            npm::definition().map_err(builder_error)?,
            pip::definition().map_err(builder_error)?,
        ])
    }

    pub fn register(&mut self, definition: ManagerDefinition) -> Result<()> {
        if self.get(&definition.id).is_some() {
            return Err(MpmError::Config(anyhow::anyhow!(
                "Duplicate manager id: {}",
                definition.id
            )));
        }
        self.definitions.push(Arc::new(definition));
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&Arc<ManagerDefinition>> {
        self.definitions.iter().find(|d| d.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<ManagerDefinition>> {
        self.definitions.iter()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.definitions.iter().map(|d| d.id.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

fn builder_error(err: ManagerDefinitionBuilderError) -> MpmError {
    MpmError::Config(anyhow::Error::from(err))
}

/// Parses JSON output, turning a decode failure into a fatal parse record.
///
/// Empty output is an empty listing, not an error.
pub(crate) fn parse_json<T, F>(manager: &str, stdout: &str, convert: F) -> ParseOutcome
where
    T: serde::de::DeserializeOwned,
    F: FnOnce(T) -> ParseOutcome,
{
    if stdout.trim().is_empty() {
        return ParseOutcome::default();
    }
    match serde_json::from_str::<T>(stdout) {
        Ok(value) => convert(value),
        Err(e) => ParseOutcome {
            packages: Vec::new(),
            errors: vec![ErrorRecord::fatal(
                manager,
                Phase::Parsing,
                format!("unreadable JSON output: {e}"),
            )],
        },
    }
}

pub(crate) fn skip_line(manager: &str, line: &str) {
    trace!("{}: skipping unparsable line: {:?}", manager, line);
}
