//! Core data model shared by every component: platforms, operations and the
//! [`Package`] record produced by output parsers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Operating system families a manager can be declared for.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Eq, PartialEq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "camelCase")]
pub enum OS {
    Macos,
    Linux,
    Windows,
    FreeBsd,
}

impl OS {
    /// Get current platform using compile-time detection where possible
    pub fn current() -> Self {
        if cfg!(target_os = "windows") {
            OS::Windows
        } else if cfg!(target_os = "macos") {
            OS::Macos
        } else if cfg!(target_os = "freebsd") {
            OS::FreeBsd
        } else if cfg!(target_os = "linux") {
            OS::Linux
        } else {
            // Fallback to runtime detection for unknown platforms
            match std::env::consts::OS {
                "windows" => OS::Windows,
                "macos" | "ios" => OS::Macos,
                "freebsd" => OS::FreeBsd,
                _ => OS::Linux,
            }
        }
    }

    /// Every known system.
    pub const ALL: &'static [OS] = &[OS::Macos, OS::Linux, OS::Windows, OS::FreeBsd];
}

impl fmt::Display for OS {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OS::Macos => "macOS",
            OS::Linux => "Linux",
            OS::Windows => "Windows",
            OS::FreeBsd => "FreeBSD",
        };
        f.write_str(s)
    }
}

/// One capability a manager may declare.
///
/// The order of variants is the order operations are listed in help output
/// and in capability tables.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Eq, PartialEq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Installed,
    Outdated,
    Search,
    Install,
    Upgrade,
    UpgradeAll,
    Remove,
    Sync,
    Cleanup,
    Backup,
}

impl Operation {
    pub const ALL: [Operation; 10] = [
        Operation::Installed,
        Operation::Outdated,
        Operation::Search,
        Operation::Install,
        Operation::Upgrade,
        Operation::UpgradeAll,
        Operation::Remove,
        Operation::Sync,
        Operation::Cleanup,
        Operation::Backup,
    ];

    /// Whether the operation changes the state of the underlying package store.
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            Operation::Install
                | Operation::Upgrade
                | Operation::UpgradeAll
                | Operation::Remove
                | Operation::Sync
                | Operation::Cleanup
        )
    }

    /// The operation whose command carries this one out. A backup is an
    /// installed listing.
    pub fn command(&self) -> Operation {
        match self {
            Operation::Backup => Operation::Installed,
            other => *other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Installed => "installed",
            Operation::Outdated => "outdated",
            Operation::Search => "search",
            Operation::Install => "install",
            Operation::Upgrade => "upgrade",
            Operation::UpgradeAll => "upgrade_all",
            Operation::Remove => "remove",
            Operation::Sync => "sync",
            Operation::Cleanup => "cleanup",
            Operation::Backup => "backup",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Operation::ALL
            .iter()
            .find(|op| op.as_str() == s || op.as_str().replace('_', "-") == s)
            .copied()
            .ok_or_else(|| format!("unknown operation: {s}"))
    }
}

/// A package as reported by one manager.
///
/// Versions are kept exactly as the manager printed them. Two records are the
/// same record when both the manager id and package id match; cross-manager
/// duplicate detection uses the lower-cased package id alone.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct Package {
    pub manager: String,
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub installed_version: Option<String>,
    pub latest_version: Option<String>,
    pub description: Option<String>,
    pub homepage: Option<String>,
}

impl Package {
    pub fn new(manager: impl Into<String>, id: impl Into<String>) -> Self {
        Package {
            manager: manager.into(),
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_installed(mut self, version: impl Into<String>) -> Self {
        self.installed_version = Some(version.into());
        self
    }

    pub fn with_latest(mut self, version: impl Into<String>) -> Self {
        self.latest_version = Some(version.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// The name to show and sort by: the human-readable name, or the id when
    /// the manager reports none.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }

    /// Key used to group the same package across managers.
    pub fn dedup_key(&self) -> String {
        self.id.to_lowercase()
    }

    /// Whether a newer candidate version is known for this package.
    pub fn is_outdated(&self) -> bool {
        match (&self.installed_version, &self.latest_version) {
            (Some(installed), Some(latest)) => crate::version::is_outdated(installed, latest),
            _ => false,
        }
    }
}

impl fmt::Display for Package {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.manager, self.id)?;
        if let Some(version) = &self.installed_version {
            write!(f, "@{version}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_os_current_detection_is_stable() {
        let os = OS::current();
        assert_eq!(os, OS::current());
        assert!(OS::ALL.contains(&os));
        assert!(!format!("{os}").is_empty());
    }

    #[test]
    fn test_operation_round_trips_through_str() {
        for op in Operation::ALL {
            assert_eq!(op.as_str().parse::<Operation>().unwrap(), op);
        }
        assert_eq!("upgrade-all".parse::<Operation>().unwrap(), Operation::UpgradeAll);
        assert!("frobnicate".parse::<Operation>().is_err());
    }

    #[test]
    fn test_mutating_operations() {
        assert!(Operation::Install.is_mutating());
        assert!(Operation::Cleanup.is_mutating());
        assert!(!Operation::Installed.is_mutating());
        assert!(!Operation::Search.is_mutating());
    }

    #[test]
    fn test_backup_runs_the_installed_command() {
        assert_eq!(Operation::Backup.command(), Operation::Installed);
        assert_eq!(Operation::Sync.command(), Operation::Sync);
    }

    #[test]
    fn test_package_display_name_falls_back_to_id() {
        let pkg = Package::new("brew", "broot");
        assert_eq!(pkg.display_name(), "broot");

        let named = Package::new("npm", "@scope/tool").with_name("Tool");
        assert_eq!(named.display_name(), "Tool");
        assert_eq!(named.dedup_key(), "@scope/tool");
    }

    #[test]
    fn test_package_outdated() {
        let pkg = Package::new("pip", "requests")
            .with_installed("2.31.0")
            .with_latest("2.32.3");
        assert!(pkg.is_outdated());

        let current = Package::new("pip", "requests")
            .with_installed("2.32.3")
            .with_latest("2.32.3");
        assert!(!current.is_outdated());

        assert!(!Package::new("pip", "requests").is_outdated());
    }
}
