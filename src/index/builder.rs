//! Index rebuild: merges the tag listing and the bucket listing into a fresh
//! [`Snapshot`].
//!
//! Object keys are expected to look like `packages/<commit>/<file>`.  Keys
//! that do not fit that shape are skipped.  A tag is recorded only when its
//! commit has at least one file under the prefix, so a tag pushed before its
//! packages are uploaded stays invisible until the next rebuild after the
//! upload.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, instrument};

use crate::error::RebuildError;
use crate::forge::TagSource;
use crate::storage::PackageStore;

use super::{PackageFile, PackageIndex, Snapshot, Tag, TagMap, LATEST};

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Pulls from both adapters and assembles a new snapshot.  Holds no state
/// between rebuilds.
#[derive(Clone)]
pub struct IndexBuilder {
    tags: Arc<dyn TagSource>,
    store: Arc<dyn PackageStore>,
    prefix: String,
}

impl IndexBuilder {
    pub fn new(tags: Arc<dyn TagSource>, store: Arc<dyn PackageStore>, prefix: String) -> Self {
        Self {
            tags,
            store,
            prefix,
        }
    }

    /// Run one full rebuild.  Either adapter failing aborts the whole
    /// rebuild; nothing partial is returned.
    #[instrument(skip(self), fields(prefix = %self.prefix))]
    pub async fn build(&self) -> Result<Snapshot, RebuildError> {
        let tags = self
            .tags
            .list_tags()
            .await
            .map_err(RebuildError::SourceUnavailable)?;
        debug!(count = tags.len(), "tags loaded");

        let files = self
            .store
            .list_files(&self.prefix)
            .await
            .map_err(RebuildError::StorageUnavailable)?;
        debug!(count = files.len(), "package files listed");

        let snapshot = build_snapshot(&tags, files, &self.prefix);
        info!(
            tags = snapshot.tags.len(),
            commits = snapshot.commit_count(),
            files = snapshot.file_count(),
            latest = snapshot.commit_for(LATEST).unwrap_or("-"),
            "index rebuilt"
        );
        Ok(snapshot)
    }
}

// ---------------------------------------------------------------------------
// Pure merge
// ---------------------------------------------------------------------------

/// Merge a tag listing and a file listing into a snapshot.
///
/// When several tags point at the same commit the lexicographically smallest
/// tag name is kept.
pub fn build_snapshot(tags: &[Tag], files: Vec<PackageFile>, prefix: &str) -> Snapshot {
    let by_commit = invert_tags(tags);

    let mut result_tags = TagMap::new();
    let mut grouped: BTreeMap<String, Vec<PackageFile>> = BTreeMap::new();

    for file in files {
        let Some(commit) = parse_commit(&file.key, prefix) else {
            continue;
        };
        let commit = commit.to_string();

        if let Some(tag_name) = by_commit.get(commit.as_str()) {
            result_tags.insert((*tag_name).to_string(), commit.clone());
        }

        grouped.entry(commit).or_default().push(file);
    }

    let mut packages: PackageIndex = grouped
        .into_iter()
        .map(|(commit, files)| (commit, Arc::from(files)))
        .collect();

    // Only tags with files were recorded, so the highest tag always has an
    // entry to alias.
    let latest = result_tags
        .values()
        .next_back()
        .and_then(|commit| Some((commit.clone(), packages.get(commit)?.clone())));
    if let Some((latest_commit, latest_files)) = latest {
        result_tags.insert(LATEST.to_string(), latest_commit);
        packages.insert(LATEST.to_string(), latest_files);
    }

    Snapshot {
        tags: result_tags,
        packages,
        built_at: Utc::now(),
    }
}

/// Commit → tag name, smallest tag name winning on collisions.
fn invert_tags(tags: &[Tag]) -> HashMap<&str, &str> {
    let mut by_commit: HashMap<&str, &str> = HashMap::with_capacity(tags.len());
    for tag in tags {
        by_commit
            .entry(tag.commit.as_str())
            .and_modify(|current| {
                if tag.name.as_str() < *current {
                    *current = tag.name.as_str();
                }
            })
            .or_insert(tag.name.as_str());
    }
    by_commit
}

/// Extract `<commit>` from `<prefix><commit>/<rest>`.
///
/// The commit segment must be non-empty lowercase ASCII alphanumerics and
/// `<rest>` must be non-empty.
pub fn parse_commit<'a>(key: &'a str, prefix: &str) -> Option<&'a str> {
    let remainder = key.strip_prefix(prefix)?;
    let (commit, rest) = remainder.split_once('/')?;
    let valid_commit = !commit.is_empty()
        && commit
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit());
    if !valid_commit || rest.is_empty() || rest.contains('\n') {
        return None;
    }
    Some(commit)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
