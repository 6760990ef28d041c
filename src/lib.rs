//! mpm - one interface over many package managers
//!
//! mpm drives the command-line package managers already installed on a
//! machine (Homebrew, APT, pacman, yay, cargo, npm, pip) through a single
//! operation model: list installed or outdated packages, search, install,
//! upgrade, remove, and snapshot or restore the whole package set.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use mpm::{Dispatcher, ErrorPolicy, MpmConfig, Operation, ProcessExecutor, Registry, Request};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = MpmConfig::default();
//! let env: std::collections::BTreeMap<String, String> = std::env::vars().collect();
//! let runner = ProcessExecutor::new(env.clone(), ".").with_timeout(config.timeout());
//! let search_path = env.get("PATH").cloned();
//! let dispatcher = Dispatcher::new(Registry::builtin()?, runner, &config, search_path);
//!
//! let outcome = dispatcher
//!     .run(&config.policy(Operation::Installed), &Request::All, ErrorPolicy::Continue)
//!     .await?;
//! println!("{} packages installed", outcome.packages.len());
//! for error in &outcome.errors {
//!     eprintln!("{error}");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - [`ManagerDefinition`]: a manager as data, a capability table of argument
//!   templates and output parsers
//! - [`CommandBuilder`] and [`ProcessExecutor`]: argv assembly and bounded
//!   child process execution
//! - [`Selector`]: which managers apply, are installed and are recent enough
//! - [`PackageSet`]: aggregation, duplicates and search refiltering
//! - [`Resolver`]: mapping a package specifier to exactly one manager
//! - [`BackupDocument`]: TOML snapshots of installed packages
//! - [`Dispatcher`]: runs an operation across managers and collects an
//!   [`Outcome`]
//!
//! # Error Handling
//!
//! Failures that stop an operation as a whole are [`MpmError`]s. A single
//! manager failing is not: it becomes an [`ErrorRecord`] in the
//! [`Outcome`], next to the results of the managers that worked.

pub mod aggregate;
pub mod backup;
pub mod command;
pub mod configuration;
pub mod data;
pub mod definition;
pub mod dispatcher;
pub mod errors;
pub mod managers;
pub mod output;
pub mod process;
pub mod selector;
pub mod specifier;
pub mod version;

// Re-export commonly used types
pub use aggregate::{PackageSet, SearchQuery};
pub use backup::{BackupDocument, WriteMode};
pub use command::{CommandBuilder, CommandPlan, Invocation};
pub use configuration::MpmConfig;
pub use data::{Operation, Package, OS};
pub use definition::{ManagerDefinition, OperationSpec, ParseOutcome};
pub use dispatcher::{Dispatcher, ErrorPolicy, Outcome, Request, Status};
pub use errors::{ErrorRecord, MpmError, Phase, Result};
pub use managers::Registry;
pub use process::{CommandOutput, CommandRunner, ProcessExecutor};
pub use selector::{Selection, SelectionPolicy, Selector};
pub use specifier::{Resolver, Specifier};
