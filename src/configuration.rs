//! User configuration.
//!
//! Settings come from three layers, later ones winning: built-in defaults, an
//! optional TOML file (`~/.config/mpm/config.toml` or `--config PATH`), and
//! `MPM_*` environment variables (see [`env`]). Command-line flags are applied
//! on top by the binary.
//!
//! ```toml
//! timeout_secs = 300
//! concurrency = 8
//! exclude = ["npm"]
//!
//! [executable_overrides]
//! brew = "/opt/homebrew/bin/brew"
//!
//! [manager_env.pip]
//! http_proxy = "http://proxy.internal:3128"
//! ```

use anyhow::Context;
use derive_builder::Builder;
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};
use validator::Validate;

use crate::data::Operation;
use crate::errors::{MpmError, Result};
use crate::selector::SelectionPolicy;

pub mod env;

pub use env::EnvironmentConfig;

const CONFIG_DIR: &str = "mpm";
const CONFIG_FILE: &str = "config.toml";

fn default_timeout_secs() -> u64 {
    crate::process::DEFAULT_TIMEOUT.as_secs()
}

fn default_concurrency() -> usize {
    4
}

/// Main configuration structure for mpm
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Builder, Validate)]
#[builder(setter(into), default)]
#[serde(default)]
pub struct MpmConfig {
    /// Wall-clock limit for one external call.
    #[validate(range(min = 1, message = "timeout_secs must be at least 1"))]
    pub timeout_secs: u64,
    /// How many managers may run at once.
    #[validate(range(min = 1, max = 64, message = "concurrency must be between 1 and 64"))]
    pub concurrency: usize,
    /// Skip the remaining managers after the first failure.
    pub stop_on_error: bool,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub all_managers: bool,
    /// manager id → executable path
    pub executable_overrides: BTreeMap<String, PathBuf>,
    /// manager id → extra environment for that manager's calls
    pub manager_env: BTreeMap<String, BTreeMap<String, String>>,
}

impl Default for MpmConfig {
    fn default() -> Self {
        MpmConfig {
            timeout_secs: default_timeout_secs(),
            concurrency: default_concurrency(),
            stop_on_error: false,
            include: Vec::new(),
            exclude: Vec::new(),
            all_managers: false,
            executable_overrides: BTreeMap::new(),
            manager_env: BTreeMap::new(),
        }
    }
}

impl MpmConfig {
    pub fn builder() -> MpmConfigBuilder {
        MpmConfigBuilder::default()
    }

    /// The default config file location, if a home directory is known.
    pub fn default_path() -> Option<PathBuf> {
        BaseDirs::new().map(|dirs| dirs.config_dir().join(CONFIG_DIR).join(CONFIG_FILE))
    }

    /// Parses a TOML document through the `config` crate and validates it.
    pub fn load_from_str(toml: &str) -> Result<Self> {
        let config: MpmConfig = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        config.checked()
    }

    /// Loads a config file. A missing file at the default location yields
    /// the defaults; a missing explicit file is an error.
    pub fn load_from(file: &Path, required: bool) -> Result<Self> {
        debug!("Loading config from: {}", file.display());
        if !file.exists() {
            if required {
                return Err(MpmError::Config(anyhow::anyhow!(
                    "Config file not found: {}",
                    file.display()
                )));
            }
            info!("No config file at {}, using defaults", file.display());
            return Ok(MpmConfig::default());
        }
        let config: MpmConfig = config::Config::builder()
            .add_source(config::File::from(file).format(config::FileFormat::Toml))
            .build()
            .with_context(|| format!("Failed to read config file: {}", file.display()))?
            .try_deserialize()
            .with_context(|| format!("Failed to parse config file: {}", file.display()))?;
        config.checked()
    }

    /// Runs the field validators, turning failures into a config error.
    pub fn checked(self) -> Result<Self> {
        self.validate()
            .map_err(|e| {
                MpmError::Config(anyhow::anyhow!("Configuration validation failed: {e}"))
            })?;
        Ok(self)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// The manager filters as a selection policy for `operation`.
    pub fn policy(&self, operation: Operation) -> SelectionPolicy {
        SelectionPolicy::new(operation)
            .include(self.include.iter().cloned())
            .exclude(self.exclude.iter().cloned())
            .all_managers(self.all_managers)
    }
}
