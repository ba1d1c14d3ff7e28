//! Package bucket listing.
//!
//! The index builder reads the bucket through [`PackageStore`]; the S3
//! implementation lives in [`s3`].

pub mod s3;

use anyhow::Result;

use crate::index::PackageFile;

pub use s3::S3Storage;

/// Lists stored package objects under a key prefix.
///
/// Every call is an independent, complete listing: implementations keep no
/// cursor between calls, so two rebuilds sharing one store never see each
/// other's pages.
#[async_trait::async_trait]
pub trait PackageStore: Send + Sync {
    async fn list_files(&self, prefix: &str) -> Result<Vec<PackageFile>>;
}
