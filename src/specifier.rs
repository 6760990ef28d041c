//! Package specifiers and their resolution to exactly one manager.
//!
//! Accepted forms:
//!
//! - `id`, e.g. `broot`
//! - `id@version`, e.g. `requests@2.32.3` or `@biomejs/biome@1.8.3`
//! - a package URL, `pkg:<type>/<id>@<version>`, e.g. `pkg:brew/broot`
//!
//! The package URL type doubles as a manager hint; it matches a manager id or
//! one of the purl types a manager declares.

use std::fmt;
use std::str::FromStr;
use tracing::debug;

use crate::aggregate::PackageSet;
use crate::data::Operation;
use crate::errors::{MpmError, Result};
use crate::selector::{SelectedManager, Selection};

const PURL_SCHEME: &str = "pkg:";

/// purl types whose namespace names a distribution rather than being part of
/// the package name.
const VENDOR_NAMESPACED: &[&str] = &["deb", "alpm", "rpm", "apk"];

/// Parsed user input naming one package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Specifier {
    pub raw: String,
    pub id: String,
    pub version: Option<String>,
    /// Manager id or purl type restricting the candidates.
    pub manager_hint: Option<String>,
}

impl Specifier {
    pub fn parse(raw: &str) -> Result<Self> {
        let input = raw.trim();
        if input.is_empty() {
            return Err(MpmError::invalid_specifier(raw, "empty specifier"));
        }
        if let Some(purl) = input.strip_prefix(PURL_SCHEME) {
            return parse_purl(raw, purl);
        }

        // A leading `@` starts an npm scope, not a version.
        let (id, version) = match input.char_indices().skip(1).find(|(_, c)| *c == '@') {
            Some((at, _)) => (&input[..at], Some(&input[at + 1..])),
            None => (input, None),
        };
        Specifier::checked(raw, id.to_string(), version.map(str::to_string), None)
    }

    /// A specifier for an exact package on an exact manager, as written by
    /// restore.
    pub fn pinned(manager: &str, id: &str, version: Option<&str>) -> Self {
        let mut raw = format!("{PURL_SCHEME}{manager}/{id}");
        if let Some(version) = version {
            raw.push('@');
            raw.push_str(version);
        }
        Specifier {
            raw,
            id: id.to_string(),
            version: version.map(str::to_string),
            manager_hint: Some(manager.to_string()),
        }
    }

    fn checked(
        raw: &str,
        id: String,
        version: Option<String>,
        manager_hint: Option<String>,
    ) -> Result<Self> {
        if id.is_empty() {
            return Err(MpmError::invalid_specifier(raw, "missing package id"));
        }
        if id.chars().any(char::is_whitespace) {
            return Err(MpmError::invalid_specifier(raw, "package id contains whitespace"));
        }
        // Templates pass the id as a bare argument; a dash would make it an option.
        if id.starts_with('-') {
            return Err(MpmError::invalid_specifier(raw, "package id starts with '-'"));
        }
        if version.as_deref() == Some("") {
            return Err(MpmError::invalid_specifier(raw, "empty version after '@'"));
        }
        Ok(Specifier {
            raw: raw.to_string(),
            id,
            version,
            manager_hint,
        })
    }
}

fn parse_purl(raw: &str, body: &str) -> Result<Specifier> {
    // Qualifiers and subpath carry nothing a manager template can use.
    let body = body.split(['?', '#']).next().unwrap_or_default();
    let body = body.trim_start_matches('/');
    let (kind, path) = body
        .split_once('/')
        .ok_or_else(|| MpmError::invalid_specifier(raw, "package URL needs a type and a name"))?;
    if kind.is_empty() {
        return Err(MpmError::invalid_specifier(raw, "package URL type is empty"));
    }
    let kind = kind.to_lowercase();

    let (path, version) = match path.rsplit_once('@') {
        Some((path, version)) => (path, Some(percent_decode(raw, version)?)),
        None => (path, None),
    };
    let path = path.trim_end_matches('/');
    let id = if VENDOR_NAMESPACED.contains(&kind.as_str()) {
        path.rsplit('/').next().unwrap_or(path)
    } else {
        path
    };
    Specifier::checked(raw, percent_decode(raw, id)?, version, Some(kind))
}

fn percent_decode(raw: &str, text: &str) -> Result<String> {
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = text
                .get(i + 1..i + 3)
                .and_then(|h| u8::from_str_radix(h, 16).ok())
                .ok_or_else(|| MpmError::invalid_specifier(raw, "bad percent-encoding"))?;
            out.push(hex);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out)
        .map_err(|_| MpmError::invalid_specifier(raw, "percent-encoding is not UTF-8"))
}

impl FromStr for Specifier {
    type Err = MpmError;

    fn from_str(s: &str) -> Result<Self> {
        Specifier::parse(s)
    }
}

impl fmt::Display for Specifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Picks the single manager that should handle a specifier.
///
/// Never guesses: zero candidates is [`MpmError::NotFound`], more than one is
/// [`MpmError::Ambiguous`] naming them all.
pub struct Resolver<'a> {
    selection: &'a Selection,
    index: Option<&'a PackageSet>,
}

impl<'a> Resolver<'a> {
    pub fn new(selection: &'a Selection) -> Self {
        Resolver {
            selection,
            index: None,
        }
    }

    /// Narrows candidates to managers that reported the package in a prior
    /// installed or outdated listing.
    pub fn with_index(mut self, index: &'a PackageSet) -> Self {
        self.index = Some(index);
        self
    }

    /// Managers able to run `operation` for `specifier`, before the
    /// uniqueness check.
    pub fn candidates(
        &self,
        specifier: &Specifier,
        operation: Operation,
    ) -> Vec<&'a SelectedManager> {
        let mut candidates = self.selection.capable_of(operation);
        if let Some(hint) = &specifier.manager_hint {
            candidates.retain(|m| m.definition.answers_to(hint));
        }
        if let Some(index) = self.index {
            let key = specifier.id.to_lowercase();
            candidates.retain(|m| index.by_manager(m.id()).any(|p| p.dedup_key() == key));
        }
        candidates
    }

    pub fn resolve(
        &self,
        specifier: &Specifier,
        operation: Operation,
    ) -> Result<&'a SelectedManager> {
        let candidates = self.candidates(specifier, operation);
        match candidates.as_slice() {
            [only] => {
                debug!("{} resolved to {}", specifier, only.id());
                Ok(only)
            }
            [] => Err(MpmError::NotFound {
                specifier: specifier.raw.clone(),
                operation,
            }),
            several => Err(MpmError::Ambiguous {
                specifier: specifier.raw.clone(),
                managers: several.iter().map(|m| m.id().to_string()).collect(),
            }),
        }
    }
}
