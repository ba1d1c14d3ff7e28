//! In-memory release index.
//!
//! A [`Snapshot`] pairs the tag table (tag name → commit) with the package
//! table (commit → files).  Snapshots are immutable once built; the
//! [`builder`] produces a fresh one on every rebuild and [`query`] answers
//! request-path lookups against whichever snapshot is current.

pub mod builder;
pub mod query;

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

pub use builder::{build_snapshot, IndexBuilder};

/// Name of the synthesized pseudo-tag pointing at the highest-sorting tag.
pub const LATEST: &str = "latest";

/// A named tag as reported by the tag source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub name: String,
    pub commit: String,
}

impl Tag {
    pub fn new(name: impl Into<String>, commit: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            commit: commit.into(),
        }
    }
}

/// One object listed from the package bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageFile {
    /// Full object key, e.g. `packages/<commit>/vagrant_1.2.0_x86_64.deb`.
    pub key: String,
    /// Object size in bytes, `0` when the listing did not report one.
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
}

impl PackageFile {
    #[cfg(test)]
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            size: 0,
            last_modified: None,
        }
    }

    /// Last path segment of the key.
    pub fn file_name(&self) -> &str {
        self.key.rsplit('/').next().unwrap_or(&self.key)
    }
}

/// Tag name → commit identifier.
pub type TagMap = BTreeMap<String, String>;

/// Commit identifier → files, in storage listing order.  Sequences are
/// shared between the commit entry and the `latest` alias.
pub type PackageIndex = BTreeMap<String, Arc<[PackageFile]>>;

/// One consistent (tags, packages) pair.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub tags: TagMap,
    pub packages: PackageIndex,
    pub built_at: DateTime<Utc>,
}

impl Snapshot {
    /// A snapshot with no tags and no packages.
    pub fn empty() -> Self {
        Self {
            tags: TagMap::new(),
            packages: PackageIndex::new(),
            built_at: Utc::now(),
        }
    }

    /// Commit a tag resolves to, if known.
    pub fn commit_for(&self, tag: &str) -> Option<&str> {
        self.tags.get(tag).map(String::as_str)
    }

    /// Number of files across all real commits (the `latest` alias is not
    /// double counted).
    pub fn file_count(&self) -> usize {
        self.packages
            .iter()
            .filter(|(commit, _)| commit.as_str() != LATEST)
            .map(|(_, files)| files.len())
            .sum()
    }

    /// Number of real commits with at least one file.
    pub fn commit_count(&self) -> usize {
        self.packages.keys().filter(|k| k.as_str() != LATEST).count()
    }

    /// Structural equality ignoring `built_at`.
    #[cfg(test)]
    pub fn same_contents(&self, other: &Snapshot) -> bool {
        self.tags == other.tags && self.packages == other.packages
    }
}
