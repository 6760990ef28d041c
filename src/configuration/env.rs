use crate::configuration::MpmConfig;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{debug, info};

/// Environment variable configuration support for mpm
#[derive(Debug, Clone)]
pub struct EnvironmentConfig {
    /// Prefix for mpm environment variables
    pub prefix: String,
    /// Map of environment variable names to their values
    pub variables: HashMap<String, String>,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            prefix: "MPM_".to_string(),
            variables: HashMap::new(),
        }
    }
}

/// Configuration that can be loaded from environment variables
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvConfigOverrides {
    /// Override config file path via MPM_CONFIG_PATH
    pub config_path: Option<PathBuf>,
    /// Override the per-call timeout via MPM_TIMEOUT_SECS
    pub timeout_secs: Option<u64>,
    /// Override the parallelism limit via MPM_CONCURRENCY
    pub concurrency: Option<usize>,
    /// Stop after the first failing manager via MPM_STOP_ON_ERROR
    pub stop_on_error: Option<bool>,
    /// Restrict managers via MPM_INCLUDE (comma-separated)
    pub include: Option<Vec<String>>,
    /// Skip managers via MPM_EXCLUDE (comma-separated)
    pub exclude: Option<Vec<String>>,
    /// Ignore platform restrictions via MPM_ALL_MANAGERS
    pub all_managers: Option<bool>,
}

impl EnvironmentConfig {
    /// Collects the prefixed variables from an explicit environment.
    pub fn load_from<I>(&mut self, vars: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            if key.starts_with(&self.prefix) {
                debug!("Found mpm environment variable: {}={}", key, value);
                self.variables.insert(key, value);
            }
        }
        info!("Loaded {} environment variables", self.variables.len());
    }

    /// Get environment variable value
    pub fn get(&self, key: &str) -> Option<&String> {
        let full_key = format!("{}{}", self.prefix, key.to_uppercase());
        self.variables.get(&full_key)
    }

    /// Set environment variable (for testing)
    #[cfg(test)]
    pub fn set(&mut self, key: &str, value: &str) {
        let full_key = format!("{}{}", self.prefix, key.to_uppercase());
        self.variables.insert(full_key, value.to_string());
    }

    /// Parse environment variables into configuration overrides
    pub fn parse_overrides(&self) -> Result<EnvConfigOverrides> {
        let mut overrides = EnvConfigOverrides {
            config_path: self.get("CONFIG_PATH").map(PathBuf::from),
            ..Default::default()
        };

        if let Some(secs) = self.get("TIMEOUT_SECS") {
            overrides.timeout_secs = Some(
                secs.parse()
                    .with_context(|| format!("Invalid timeout: {secs}"))?,
            );
        }

        if let Some(limit) = self.get("CONCURRENCY") {
            overrides.concurrency = Some(
                limit
                    .parse()
                    .with_context(|| format!("Invalid concurrency: {limit}"))?,
            );
        }

        if let Some(stop) = self.get("STOP_ON_ERROR") {
            overrides.stop_on_error = Some(Self::parse_bool(stop)?);
        }

        if let Some(all) = self.get("ALL_MANAGERS") {
            overrides.all_managers = Some(Self::parse_bool(all)?);
        }

        overrides.include = self.get("INCLUDE").map(|s| Self::parse_list(s));
        overrides.exclude = self.get("EXCLUDE").map(|s| Self::parse_list(s));

        Ok(overrides)
    }

    /// Apply environment overrides to configuration
    pub fn apply_overrides_to_config(
        &self,
        mut config: MpmConfig,
        overrides: &EnvConfigOverrides,
    ) -> MpmConfig {
        if let Some(secs) = overrides.timeout_secs {
            config.timeout_secs = secs;
            info!("Overrode timeout from environment: {}s", secs);
        }
        if let Some(limit) = overrides.concurrency {
            config.concurrency = limit;
            info!("Overrode concurrency from environment: {}", limit);
        }
        if let Some(stop) = overrides.stop_on_error {
            config.stop_on_error = stop;
        }
        if let Some(all) = overrides.all_managers {
            config.all_managers = all;
        }
        if let Some(include) = &overrides.include {
            config.include = include.clone();
            info!("Overrode included managers from environment: {:?}", include);
        }
        if let Some(exclude) = &overrides.exclude {
            config.exclude = exclude.clone();
            info!("Overrode excluded managers from environment: {:?}", exclude);
        }
        config
    }

    /// Parse boolean value from string
    fn parse_bool(value: &str) -> Result<bool> {
        match value.to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" | "enabled" => Ok(true),
            "false" | "0" | "no" | "off" | "disabled" => Ok(false),
            _ => Err(anyhow::anyhow!(
                "Invalid boolean value: '{}'. Use true/false, 1/0, yes/no or on/off",
                value
            )),
        }
    }

    /// Parse a comma-separated list of manager ids
    fn parse_list(value: &str) -> Vec<String> {
        value
            .split(',')
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect()
    }
}

/// Loads the configuration file and applies `MPM_*` overrides taken from
/// `vars`. An explicit `config_path` wins over `MPM_CONFIG_PATH`, which wins
/// over the default location.
pub fn load_config_with_env<I>(
    config_path: Option<PathBuf>,
    vars: I,
) -> crate::errors::Result<MpmConfig>
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut env_config = EnvironmentConfig::default();
    env_config.load_from(vars);
    let overrides = env_config.parse_overrides()?;

    let explicit = config_path.or_else(|| overrides.config_path.clone());
    let base_config = match (&explicit, MpmConfig::default_path()) {
        (Some(path), _) => MpmConfig::load_from(path, true)?,
        (None, Some(path)) => MpmConfig::load_from(&path, false)?,
        (None, None) => MpmConfig::default(),
    };

    env_config
        .apply_overrides_to_config(base_config, &overrides)
        .checked()
}
