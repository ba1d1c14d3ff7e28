use anyhow::{Context, Result};
use aws_sdk_s3::types::Object;
use aws_sdk_s3::Client;
use chrono::{DateTime, Utc};
use tracing::{debug, instrument};

use crate::index::PackageFile;

use super::PackageStore;

/// The package bucket.
pub struct S3Storage {
    pub client: Client,
    pub bucket: String,
}

impl S3Storage {
    pub fn new(client: Client, bucket: String) -> Self {
        Self { client, bucket }
    }
}

#[async_trait::async_trait]
impl PackageStore for S3Storage {
    async fn list_files(&self, prefix: &str) -> Result<Vec<PackageFile>> {
        list_objects(&self.client, &self.bucket, prefix).await
    }
}

// ---------------------------------------------------------------------------
// Listing
// ---------------------------------------------------------------------------

/// List every object under `prefix`, in the order S3 returns them.
///
/// Automatically paginates through all results.  The continuation token is
/// local to this call.
#[instrument(skip(client), fields(%bucket, %prefix))]
pub async fn list_objects(client: &Client, bucket: &str, prefix: &str) -> Result<Vec<PackageFile>> {
    let mut files = Vec::new();
    let mut continuation_token: Option<String> = None;

    loop {
        let mut req = client.list_objects_v2().bucket(bucket).prefix(prefix);

        if let Some(ref token) = continuation_token {
            req = req.continuation_token(token);
        }

        let resp = req.send().await.context("S3 ListObjectsV2")?;

        files.extend(resp.contents().iter().filter_map(package_file_from_object));

        match resp.next_continuation_token() {
            Some(token) if resp.is_truncated().unwrap_or(true) => {
                continuation_token = Some(token.to_string());
            }
            _ => break,
        }
    }

    debug!(count = files.len(), "listed package objects");
    Ok(files)
}

/// Convert a listing entry, skipping entries without a key.
fn package_file_from_object(obj: &Object) -> Option<PackageFile> {
    let key = obj.key()?;
    let last_modified = obj
        .last_modified()
        .and_then(|t| DateTime::<Utc>::from_timestamp(t.secs(), t.subsec_nanos()));
    Some(PackageFile {
        key: key.to_string(),
        size: obj.size().and_then(|s| u64::try_from(s).ok()).unwrap_or(0),
        last_modified,
    })
}
