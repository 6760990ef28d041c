//! Snapshots of installed packages, and restoring them.
//!
//! A backup is a TOML document. Top-level keys form the header; every table
//! is one manager's section mapping package id to installed version:
//!
//! ```toml
//! tool = "mpm"
//! version = "0.4.0"
//! generated_at = "2026-10-16T09:30:00Z"
//!
//! [brew]
//! broot = "1.40.0"
//!
//! [pip]
//! requests = "2.32.3"
//! ```
//!
//! A package whose manager reports no version is written with an empty
//! string and restored without a version constraint.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::aggregate::PackageSet;
use crate::errors::{ErrorRecord, MpmError, Phase, Result};
use crate::selector::Selection;
use crate::specifier::Specifier;

pub const TOOL_NAME: &str = "mpm";

/// How to treat a backup file that already exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum WriteMode {
    /// Refuse to touch it.
    #[default]
    Forbid,
    /// Add new entries; on conflict the new version wins.
    Merge,
    /// Only refresh the versions of entries already in the file.
    Update,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupHeader {
    pub tool: String,
    pub version: String,
    pub generated_at: DateTime<Utc>,
}

impl Default for BackupHeader {
    fn default() -> Self {
        BackupHeader {
            tool: TOOL_NAME.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            generated_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackupDocument {
    pub header: BackupHeader,
    /// manager id → package id → installed version (possibly empty).
    pub managers: BTreeMap<String, BTreeMap<String, String>>,
}

/// What restoring a document on this machine will do.
#[derive(Debug, Clone, Default)]
pub struct RestorePlan {
    /// One pinned specifier per entry of a manager present here.
    pub specifiers: Vec<Specifier>,
    /// One warning per manager section that was skipped.
    pub skipped: Vec<ErrorRecord>,
}

impl BackupDocument {
    /// Snapshots every record of an installed listing. Records are not
    /// deduplicated across managers.
    pub fn from_packages(packages: &PackageSet) -> Self {
        let mut doc = BackupDocument::default();
        for package in packages.iter() {
            doc.managers
                .entry(package.manager.clone())
                .or_default()
                .insert(
                    package.id.clone(),
                    package.installed_version.clone().unwrap_or_default(),
                );
        }
        doc
    }

    /// Number of package entries across all sections.
    pub fn entry_count(&self) -> usize {
        self.managers.values().map(BTreeMap::len).sum()
    }

    pub fn parse(text: &str) -> Result<Self> {
        let table: toml::Table =
            toml::from_str(text).map_err(|e| MpmError::Backup(format!("invalid TOML: {e}")))?;

        let mut header = BackupHeader::default();
        let mut managers = BTreeMap::new();
        for (key, value) in table {
            match value {
                toml::Value::Table(section) => {
                    let mut entries = BTreeMap::new();
                    for (id, version) in section {
                        let version = match version {
                            toml::Value::String(v) => v,
                            other => {
                                return Err(MpmError::Backup(format!(
                                    "[{key}] {id}: expected a version string, found {}",
                                    other.type_str()
                                )))
                            }
                        };
                        if id.is_empty() || id.starts_with('-') {
                            return Err(MpmError::Backup(format!(
                                "[{key}] {id:?} is not a valid package id"
                            )));
                        }
                        entries.insert(id, version);
                    }
                    managers.insert(key, entries);
                }
                toml::Value::String(s) => match key.as_str() {
                    "tool" => header.tool = s,
                    "version" => header.version = s,
                    "generated_at" => {
                        header.generated_at = DateTime::parse_from_rfc3339(&s)
                            .map_err(|e| MpmError::Backup(format!("generated_at: {e}")))?
                            .with_timezone(&Utc);
                    }
                    _ => debug!("Ignoring unknown backup header key {}", key),
                },
                _ => debug!("Ignoring unknown backup header key {}", key),
            }
        }
        if header.tool != TOOL_NAME {
            return Err(MpmError::Backup(format!(
                "not an {TOOL_NAME} backup (tool = {:?})",
                header.tool
            )));
        }
        Ok(BackupDocument { header, managers })
    }

    pub fn to_toml_string(&self) -> Result<String> {
        let mut table = toml::Table::new();
        table.insert("tool".into(), toml::Value::String(self.header.tool.clone()));
        table.insert("version".into(), toml::Value::String(self.header.version.clone()));
        table.insert(
            "generated_at".into(),
            toml::Value::String(
                self.header
                    .generated_at
                    .to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            ),
        );
        for (manager, entries) in &self.managers {
            let section: toml::Table = entries
                .iter()
                .map(|(id, version)| (id.clone(), toml::Value::String(version.clone())))
                .collect();
            table.insert(manager.clone(), toml::Value::Table(section));
        }
        toml::to_string(&table).map_err(|e| MpmError::Backup(format!("cannot serialize: {e}")))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| MpmError::backup(path.display().to_string(), e.to_string()))?;
        BackupDocument::parse(&text)
            .map_err(|e| MpmError::backup(path.display().to_string(), e.to_string()))
    }

    /// Combines an existing document with this one according to `mode`.
    /// The header of the result is always this document's.
    pub fn combine(&self, existing: &BackupDocument, mode: WriteMode) -> BackupDocument {
        let managers = match mode {
            WriteMode::Forbid => self.managers.clone(),
            WriteMode::Merge => {
                let mut merged = existing.managers.clone();
                for (manager, entries) in &self.managers {
                    merged
                        .entry(manager.clone())
                        .or_default()
                        .extend(entries.iter().map(|(k, v)| (k.clone(), v.clone())));
                }
                merged
            }
            WriteMode::Update => {
                let mut updated = existing.managers.clone();
                for (manager, entries) in updated.iter_mut() {
                    let Some(fresh) = self.managers.get(manager) else {
                        continue;
                    };
                    for (id, version) in entries.iter_mut() {
                        if let Some(new) = fresh.get(id) {
                            *version = new.clone();
                        }
                    }
                }
                updated
            }
        };
        BackupDocument {
            header: self.header.clone(),
            managers,
        }
    }

    /// Writes this document to `path`, honouring `mode` when the file exists.
    /// Returns what was actually written.
    pub fn write(&self, path: &Path, mode: WriteMode) -> Result<BackupDocument> {
        let document = if path.exists() {
            match mode {
                WriteMode::Forbid => {
                    return Err(MpmError::BackupExists(path.display().to_string()));
                }
                _ => {
                    info!("Updating existing backup {} ({:?})", path.display(), mode);
                    self.combine(&BackupDocument::load(path)?, mode)
                }
            }
        } else {
            self.clone()
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, document.to_toml_string()?)?;
        debug!("Wrote {} entries to {}", document.entry_count(), path.display());
        Ok(document)
    }

    /// Pairs every entry with a manager of `selection`. Sections for
    /// managers that are not selected here are skipped with one warning each.
    pub fn plan_restore(&self, selection: &Selection) -> RestorePlan {
        let mut plan = RestorePlan::default();
        for (manager, entries) in &self.managers {
            if selection.get(manager).is_none() {
                warn!("Skipping {} packages of unavailable manager {}", entries.len(), manager);
                plan.skipped.push(ErrorRecord::warning(
                    manager,
                    Phase::Detection,
                    format!("not available here, skipped {} package(s)", entries.len()),
                ));
                continue;
            }
            for (id, version) in entries {
                let version = Some(version.as_str()).filter(|v| !v.is_empty());
                plan.specifiers.push(Specifier::pinned(manager, id, version));
            }
        }
        plan
    }
}
