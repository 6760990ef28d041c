//! Error types for mpm.
//!
//! Two kinds of failure flow through the crate. [`MpmError`] is returned as an
//! `Err` when an operation as a whole cannot proceed (bad configuration, an
//! ambiguous specifier, no usable manager). [`ErrorRecord`] is plain data: one
//! manager failed during one phase, and the failure is reported next to the
//! results of every other manager.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

use crate::data::Operation;

/// The main error type for mpm operations.
#[derive(Debug, Error)]
pub enum MpmError {
    /// Configuration-related errors (file parsing, validation, etc.)
    #[error("Configuration error: {0}")]
    Config(#[from] anyhow::Error),

    /// File I/O operation failures
    #[error("I/O operation failed: {0}")]
    Io(#[from] std::io::Error),

    /// A manager id that no registered definition carries
    #[error("Unknown manager: {0}")]
    UnknownManager(String),

    /// Every candidate manager was filtered out or unavailable
    #[error("No applicable manager for {operation}")]
    NoApplicableManager { operation: String },

    /// A capability was requested from a manager that does not declare it
    #[error("Manager {manager} does not support {operation}")]
    MissingCapability { manager: String, operation: Operation },

    /// User input could not be parsed as a package specifier
    #[error("Invalid specifier '{specifier}': {reason}")]
    InvalidSpecifier { specifier: String, reason: String },

    /// More than one manager could handle a specifier
    #[error("'{specifier}' is ambiguous, it matches managers: {}", .managers.join(", "))]
    Ambiguous {
        specifier: String,
        managers: Vec<String>,
    },

    /// No selected manager can handle a specifier
    #[error("No selected manager can {operation} '{specifier}'")]
    NotFound {
        specifier: String,
        operation: Operation,
    },

    /// Refusing to overwrite an existing backup file
    #[error("Backup file already exists: {0}")]
    BackupExists(String),

    /// Backup document could not be read or written
    #[error("Backup error: {0}")]
    Backup(String),
}

/// A type alias for Results that use MpmError.
pub type Result<T> = std::result::Result<T, MpmError>;

impl MpmError {
    /// Creates a new InvalidSpecifier error with context.
    pub fn invalid_specifier<S1, S2>(specifier: S1, reason: S2) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
    {
        MpmError::InvalidSpecifier {
            specifier: specifier.into(),
            reason: reason.into(),
        }
    }

    /// Creates a new Backup error with context.
    pub fn backup<S1, S2>(path: S1, msg: S2) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
    {
        MpmError::Backup(format!("{}: {}", path.into(), msg.into()))
    }

    /// Returns the error category as a string for logging.
    pub fn category(&self) -> &'static str {
        match self {
            MpmError::Config(_) => "config",
            MpmError::Io(_) => "io",
            MpmError::UnknownManager(_) => "unknown_manager",
            MpmError::NoApplicableManager { .. } => "no_applicable_manager",
            MpmError::MissingCapability { .. } => "missing_capability",
            MpmError::InvalidSpecifier { .. } => "invalid_specifier",
            MpmError::Ambiguous { .. } => "ambiguous",
            MpmError::NotFound { .. } => "not_found",
            MpmError::BackupExists(_) => "backup_exists",
            MpmError::Backup(_) => "backup",
        }
    }
}

impl From<config::ConfigError> for MpmError {
    fn from(err: config::ConfigError) -> Self {
        MpmError::Config(anyhow::Error::from(err))
    }
}

/// The stage of a manager's pipeline in which a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Locating the manager or checking its version
    Detection,
    /// Running a command (spawn failure, real failure exit, timeout)
    Execution,
    /// Interpreting a command's output
    Parsing,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Detection => "detection",
            Phase::Execution => "execution",
            Phase::Parsing => "parsing",
        };
        f.write_str(s)
    }
}

/// One failure attributed to one manager and one phase.
///
/// A fatal record means the manager contributed nothing usable for the
/// operation. Non-fatal records are warnings reported next to its results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorRecord {
    pub manager: String,
    pub phase: Phase,
    pub message: String,
    pub fatal: bool,
}

impl ErrorRecord {
    pub fn fatal(manager: impl Into<String>, phase: Phase, message: impl Into<String>) -> Self {
        Self {
            manager: manager.into(),
            phase,
            message: message.into(),
            fatal: true,
        }
    }

    pub fn warning(manager: impl Into<String>, phase: Phase, message: impl Into<String>) -> Self {
        Self {
            manager: manager.into(),
            phase,
            message: message.into(),
            fatal: false,
        }
    }
}

impl fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = if self.fatal { "error" } else { "warning" };
        write!(
            f,
            "{} [{}] {}: {}",
            level, self.manager, self.phase, self.message
        )
    }
}
