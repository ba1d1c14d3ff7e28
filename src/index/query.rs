//! Request-path lookups against a [`Snapshot`].
//!
//! Nothing here performs I/O; every lookup is answered from the snapshot the
//! caller already holds.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::QueryError;

use super::{PackageFile, Snapshot, LATEST};

/// A `.` followed by letters marks a pre-release tag (`1.0.0.rc1`).
static PRERELEASE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\.[a-zA-Z]+").expect("valid pre-release regex"));

/// Version stamp embedded in package file names (`vagrant_1.2.0_x86_64.deb`).
static VERSIONED_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(vagrant)[_-]\d+\.\d+\.\d+([._])").expect("valid file name regex")
});

// ---------------------------------------------------------------------------
// Tags
// ---------------------------------------------------------------------------

/// Whether a tag is shown in the listing.
pub fn is_listable(tag: &str) -> bool {
    tag == LATEST || !PRERELEASE.is_match(tag)
}

/// Listable tags, `latest` first, the rest in descending string order.
pub fn listable_tags(snapshot: &Snapshot) -> Vec<String> {
    let mut tags: Vec<String> = snapshot
        .tags
        .keys()
        .filter(|t| t.as_str() != LATEST && is_listable(t))
        .rev()
        .cloned()
        .collect();
    if snapshot.tags.contains_key(LATEST) {
        tags.insert(0, LATEST.to_string());
    }
    tags
}

/// Files published under `tag`.  A tag with no files is reported the same
/// way as a tag whose commit has no entry at all.
pub fn files_for_tag<'a>(snapshot: &'a Snapshot, tag: &str) -> Result<&'a [PackageFile], QueryError> {
    let commit = snapshot
        .commit_for(tag)
        .ok_or_else(|| QueryError::UnknownTag(tag.to_string()))?;
    let key = if tag == LATEST { LATEST } else { commit };
    snapshot
        .packages
        .get(key)
        .map(|files| &files[..])
        .filter(|files| !files.is_empty())
        .ok_or_else(|| QueryError::NoPackages(tag.to_string()))
}

// ---------------------------------------------------------------------------
// Latest redirect
// ---------------------------------------------------------------------------

/// First file of the `latest` release whose key or canonical name contains
/// `name`.
pub fn resolve_latest<'a>(snapshot: &'a Snapshot, name: &str) -> Result<&'a PackageFile, QueryError> {
    let no_match = || QueryError::NoMatch(name.to_string());
    if name.is_empty() {
        return Err(no_match());
    }
    let files = snapshot.packages.get(LATEST).ok_or_else(no_match)?;
    files
        .iter()
        .find(|f| f.key.contains(name) || canonical_name(f.file_name()).contains(name))
        .ok_or_else(no_match)
}

/// Strip the version stamp from a package file name, keeping the product
/// prefix and the separator that followed the version.
pub fn canonical_name(file_name: &str) -> String {
    VERSIONED_NAME.replace_all(file_name, "${1}${2}").into_owned()
}

// ---------------------------------------------------------------------------
// Presentation helpers
// ---------------------------------------------------------------------------

/// Extension after the last `.` of the key.
pub fn file_type(file: &PackageFile) -> &str {
    file.key.rsplit('.').next().unwrap_or("")
}

/// Direct download URL for a stored object.
pub fn storage_url(download_base_url: &str, file: &PackageFile) -> String {
    format!("{}/{}", download_base_url.trim_end_matches('/'), file.key)
}

/// Link shown for `file` on the page for `tag`.  Files under `latest` get a
/// stable, version-free path that redirects to the real object.
pub fn file_url(download_base_url: &str, tag: &str, file: &PackageFile) -> String {
    if tag == LATEST {
        format!("/tags/{LATEST}/{}", canonical_name(file.file_name()))
    } else {
        storage_url(download_base_url, file)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::index::{build_snapshot, Tag};

    const BASE: &str = "http://files.example.com";

    fn snapshot(tags: &[(&str, &str)], keys: &[&str]) -> Snapshot {
        let tags: Vec<Tag> = tags.iter().map(|(n, c)| Tag::new(*n, *c)).collect();
        let files = keys.iter().map(|k| PackageFile::new(*k)).collect();
        build_snapshot(&tags, files, "packages/")
    }

    // ── Listing ─────────────────────────────────────────────────────────

    #[test]
    fn prerelease_tags_are_hidden() {
        assert!(is_listable("1.0.0"));
        assert!(is_listable("latest"));
        assert!(!is_listable("1.0.0.rc1"));
        assert!(!is_listable("1.0.0.beta"));
        assert!(!is_listable("1.0.0.b"));
        assert!(is_listable("v1.0.0"));
    }

    #[test]
    fn listing_pins_latest_and_sorts_descending() {
        let snap = snapshot(
            &[("1.0.0", "c1"), ("1.0.0.rc1", "c0"), ("0.9.0", "c9")],
            &["packages/c1/a.deb", "packages/c0/a.deb", "packages/c9/a.deb"],
        );
        // `1.0.0.rc1` sorts highest, so it is what `latest` points at, but it
        // is still hidden from the listing under its own name.
        assert_eq!(snap.commit_for(LATEST), Some("c0"));
        assert_eq!(listable_tags(&snap), ["latest", "1.0.0", "0.9.0"]);
    }

    #[test]
    fn listing_matches_filter_example() {
        let snap = snapshot(
            &[("1.0.0", "c1"), ("1.0.0.rc1", "c2")],
            &["packages/c1/a.deb", "packages/c2/a.deb"],
        );
        assert_eq!(listable_tags(&snap), ["latest", "1.0.0"]);
    }

    #[test]
    fn listing_of_empty_snapshot_is_empty() {
        assert!(listable_tags(&Snapshot::empty()).is_empty());
    }

    // ── Tag lookup ──────────────────────────────────────────────────────

    #[test]
    fn files_for_known_tag() {
        let snap = snapshot(&[("1.0.0", "c1")], &["packages/c1/a.deb", "packages/c1/b.rpm"]);
        let files = files_for_tag(&snap, "1.0.0").unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files_for_tag(&snap, LATEST).unwrap(), files);
    }

    #[test]
    fn unknown_tag_is_not_found() {
        let snap = snapshot(&[("1.0.0", "c1")], &["packages/c1/a.deb"]);
        assert_eq!(
            files_for_tag(&snap, "nope"),
            Err(QueryError::UnknownTag("nope".into()))
        );
    }

    #[test]
    fn tag_with_empty_file_list_is_not_found() {
        let mut snap = snapshot(&[("1.0.0", "c1")], &["packages/c1/a.deb"]);
        snap.packages.insert("c1".into(), Arc::from(Vec::<PackageFile>::new()));
        assert_eq!(
            files_for_tag(&snap, "1.0.0"),
            Err(QueryError::NoPackages("1.0.0".into()))
        );
    }

    #[test]
    fn tag_without_package_entry_is_not_found() {
        let mut snap = snapshot(&[("1.0.0", "c1")], &["packages/c1/a.deb"]);
        snap.tags.insert("orphan".into(), "gone".into());
        assert_eq!(
            files_for_tag(&snap, "orphan"),
            Err(QueryError::NoPackages("orphan".into()))
        );
    }

    // ── Latest redirect ─────────────────────────────────────────────────

    #[test]
    fn fuzzy_match_on_key_substring() {
        let snap = snapshot(&[("1.2.0", "c2")], &["packages/c2/vagrant_1.2.0_x86_64.deb"]);
        let file = resolve_latest(&snap, "x86_64").unwrap();
        assert_eq!(file.key, "packages/c2/vagrant_1.2.0_x86_64.deb");
        assert_eq!(canonical_name(file.file_name()), "vagrant_x86_64.deb");
    }

    #[test]
    fn fuzzy_match_on_canonical_name() {
        let snap = snapshot(
            &[("1.2.0", "c2")],
            &[
                "packages/c2/vagrant_1.2.0_i686.deb",
                "packages/c2/vagrant_1.2.0_x86_64.deb",
            ],
        );
        let file = resolve_latest(&snap, "vagrant_x86_64.deb").unwrap();
        assert_eq!(file.key, "packages/c2/vagrant_1.2.0_x86_64.deb");
    }

    #[test]
    fn fuzzy_match_returns_first_in_listing_order() {
        let snap = snapshot(
            &[("1.2.0", "c2")],
            &["packages/c2/vagrant_1.2.0.msi", "packages/c2/vagrant_1.2.0_x86_64.deb"],
        );
        let file = resolve_latest(&snap, "vagrant").unwrap();
        assert_eq!(file.key, "packages/c2/vagrant_1.2.0.msi");
    }

    #[test]
    fn fuzzy_match_is_literal_not_regex() {
        let snap = snapshot(&[("1.2.0", "c2")], &["packages/c2/vagrant_1.2.0_x86_64.deb"]);
        assert!(resolve_latest(&snap, "x86.*deb").is_err());
    }

    #[test]
    fn no_match_is_not_found() {
        let snap = snapshot(&[("1.2.0", "c2")], &["packages/c2/vagrant_1.2.0_x86_64.deb"]);
        assert_eq!(
            resolve_latest(&snap, "arm64"),
            Err(QueryError::NoMatch("arm64".into()))
        );
        assert!(resolve_latest(&snap, "").is_err());
        assert!(resolve_latest(&Snapshot::empty(), "x86_64").is_err());
    }

    // ── Presentation ────────────────────────────────────────────────────

    #[test]
    fn canonical_name_strips_version() {
        assert_eq!(canonical_name("vagrant_1.2.0_x86_64.deb"), "vagrant_x86_64.deb");
        assert_eq!(canonical_name("Vagrant-1.2.0.dmg"), "Vagrant.dmg");
        assert_eq!(canonical_name("vagrant_1.2.0.msi"), "vagrant.msi");
        assert_eq!(canonical_name("other_1.2.0_x86_64.deb"), "other_1.2.0_x86_64.deb");
        assert_eq!(canonical_name("vagrant_1.2_x86_64.deb"), "vagrant_1.2_x86_64.deb");
    }

    #[test]
    fn file_type_is_extension() {
        assert_eq!(file_type(&PackageFile::new("packages/c1/a.tar.gz")), "gz");
        assert_eq!(file_type(&PackageFile::new("packages/c1/vagrant.deb")), "deb");
    }

    #[test]
    fn file_url_depends_on_tag() {
        let file = PackageFile::new("packages/c2/vagrant_1.2.0_x86_64.deb");
        assert_eq!(
            file_url(BASE, "1.2.0", &file),
            "http://files.example.com/packages/c2/vagrant_1.2.0_x86_64.deb"
        );
        assert_eq!(
            file_url(BASE, LATEST, &file),
            "/tags/latest/vagrant_x86_64.deb"
        );
        assert_eq!(
            storage_url("http://files.example.com/", &file),
            "http://files.example.com/packages/c2/vagrant_1.2.0_x86_64.deb"
        );
    }
}
