//! Merging per-manager package lists.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

use crate::data::Package;

/// Packages from every manager, in display order.
///
/// The set never merges records: the same package reported by two managers
/// stays two records. Cross-manager grouping is a view, see
/// [`PackageSet::duplicates`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PackageSet {
    packages: Vec<Package>,
}

/// Package counts for a result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Stats {
    pub total: usize,
    pub per_manager: BTreeMap<String, usize>,
}

impl PackageSet {
    pub fn new(packages: Vec<Package>) -> Self {
        let mut set = PackageSet { packages };
        set.sort();
        set
    }

    /// Adds one manager's results, keeping the order.
    pub fn extend(&mut self, packages: impl IntoIterator<Item = Package>) {
        self.packages.extend(packages);
        self.sort();
    }

    fn sort(&mut self) {
        self.packages.sort_by(|a, b| {
            a.display_name()
                .to_lowercase()
                .cmp(&b.display_name().to_lowercase())
                .then_with(|| a.manager.cmp(&b.manager))
                .then_with(|| a.id.cmp(&b.id))
        });
    }

    pub fn packages(&self) -> &[Package] {
        &self.packages
    }

    pub fn into_packages(self) -> Vec<Package> {
        self.packages
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Package> {
        self.packages.iter()
    }

    /// Records reported by one manager.
    pub fn by_manager<'a>(&'a self, manager: &'a str) -> impl Iterator<Item = &'a Package> + 'a {
        self.packages.iter().filter(move |p| p.manager == manager)
    }

    /// Groups of records sharing a lower-cased package id across at least two
    /// distinct managers, keyed by that id.
    pub fn duplicates(&self) -> BTreeMap<String, Vec<&Package>> {
        let mut groups: BTreeMap<String, Vec<&Package>> = BTreeMap::new();
        for package in &self.packages {
            groups.entry(package.dedup_key()).or_default().push(package);
        }
        groups.retain(|_, group| {
            group
                .iter()
                .map(|p| p.manager.as_str())
                .collect::<BTreeSet<_>>()
                .len()
                >= 2
        });
        groups
    }

    /// Only the records that have a newer candidate version.
    pub fn outdated(&self) -> PackageSet {
        PackageSet {
            packages: self.packages.iter().filter(|p| p.is_outdated()).cloned().collect(),
        }
    }

    /// Keeps the records matching `query`. Applying the same query twice
    /// gives the same set as applying it once.
    pub fn refilter(&self, query: &SearchQuery) -> PackageSet {
        PackageSet {
            packages: self
                .packages
                .iter()
                .filter(|p| query.matches(p))
                .cloned()
                .collect(),
        }
    }

    pub fn stats(&self) -> Stats {
        let mut per_manager = BTreeMap::new();
        for package in &self.packages {
            *per_manager.entry(package.manager.clone()).or_insert(0) += 1;
        }
        Stats {
            total: self.packages.len(),
            per_manager,
        }
    }
}

impl FromIterator<Package> for PackageSet {
    fn from_iter<T: IntoIterator<Item = Package>>(iter: T) -> Self {
        PackageSet::new(iter.into_iter().collect())
    }
}

impl IntoIterator for PackageSet {
    type Item = Package;
    type IntoIter = std::vec::IntoIter<Package>;

    fn into_iter(self) -> Self::IntoIter {
        self.packages.into_iter()
    }
}

/// A search as the user typed it.
///
/// Managers' own search commands are fuzzy in different ways, so their
/// results are filtered again with one consistent rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub query: String,
    /// Also look in descriptions.
    pub extended: bool,
    /// Case-insensitive equality instead of substring.
    pub exact: bool,
}

impl SearchQuery {
    pub fn new(query: impl Into<String>) -> Self {
        SearchQuery {
            query: query.into(),
            extended: false,
            exact: false,
        }
    }

    pub fn extended(mut self, extended: bool) -> Self {
        self.extended = extended;
        self
    }

    pub fn exact(mut self, exact: bool) -> Self {
        self.exact = exact;
        self
    }

    pub fn matches(&self, package: &Package) -> bool {
        let needle = self.query.to_lowercase();
        let hit = |field: &str| {
            let field = field.to_lowercase();
            if self.exact {
                field == needle
            } else {
                field.contains(&needle)
            }
        };
        hit(&package.id)
            || (!package.name.is_empty() && hit(&package.name))
            || (self.extended && package.description.as_deref().is_some_and(hit))
    }
}
