//! Tag source abstraction.
//!
//! The index builder only needs one thing from the source-control host: the
//! list of tags and the commit each one points at.  [`TagSource`] hides which
//! host answers that question.

pub mod github;
pub mod rate_limit;

use std::sync::Arc;

use anyhow::Result;

use crate::config::Config;
use crate::index::Tag;
use crate::metrics::MetricsRegistry;

use self::rate_limit::RateLimitState;

/// Lists `tag name → commit` pairs from a remote repository.
///
/// Implementations do not retry; a failed call fails the rebuild that made
/// it and the next scheduled rebuild tries again.
#[async_trait::async_trait]
pub trait TagSource: Send + Sync {
    /// All tags, in the order the host enumerates them.
    async fn list_tags(&self) -> Result<Vec<Tag>>;
}

/// Build the GitHub-backed [`TagSource`] for the configured repository.
pub fn build_tag_source(
    config: &Config,
    http_client: reqwest::Client,
    rate_limit: RateLimitState,
    metrics: MetricsRegistry,
) -> Arc<dyn TagSource> {
    Arc::new(github::GitHubTagSource::new(
        &config.upstream,
        http_client,
        rate_limit,
        metrics,
    ))
}
