//! GitHub tag listing.
//!
//! Walks `GET /repos/{owner}/{repo}/tags` page by page.  GitHub returns at
//! most `per_page` entries per page, so a short page marks the end.

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use crate::config::UpstreamConfig;
use crate::index::Tag;
use crate::metrics::MetricsRegistry;

use super::rate_limit::RateLimitState;
use super::TagSource;

const ACCEPT: &str = "application/vnd.github.v3+json";
const PER_PAGE: usize = 100;
/// Upper bound on pages fetched in one listing (10k tags).
const MAX_PAGES: usize = 100;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct TagEntry {
    name: String,
    commit: CommitRef,
}

#[derive(Debug, Deserialize)]
struct CommitRef {
    sha: String,
}

// ---------------------------------------------------------------------------
// Source
// ---------------------------------------------------------------------------

pub struct GitHubTagSource {
    api_url: String,
    repo: String,
    token: Option<String>,
    http_client: reqwest::Client,
    rate_limit: RateLimitState,
    metrics: MetricsRegistry,
}

impl GitHubTagSource {
    pub fn new(
        config: &UpstreamConfig,
        http_client: reqwest::Client,
        rate_limit: RateLimitState,
        metrics: MetricsRegistry,
    ) -> Self {
        Self {
            api_url: config.api_url.trim_end_matches('/').to_string(),
            repo: config.repo.clone(),
            token: config.token.clone(),
            http_client,
            rate_limit,
            metrics,
        }
    }

    fn page_url(&self, page: usize) -> String {
        format!(
            "{}/repos/{}/tags?per_page={PER_PAGE}&page={page}",
            self.api_url, self.repo
        )
    }

    async fn fetch_page(&self, page: usize) -> Result<Vec<TagEntry>> {
        let url = self.page_url(page);

        let mut req = self.http_client.get(&url).header("Accept", ACCEPT);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }

        let resp = req.send().await.context("upstream tag listing request failed")?;
        self.metrics.metrics.upstream_api_calls.inc();

        if let Some(remaining) = self.rate_limit.update_from_headers(resp.headers()) {
            self.metrics
                .metrics
                .upstream_api_rate_limit_remaining
                .set(remaining as i64);
        }

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!(repo = %self.repo, page, %status, "upstream API returned non-success for tag listing");
            anyhow::bail!("GET {url} returned {status}: {}", body.trim());
        }

        resp.json::<Vec<TagEntry>>()
            .await
            .with_context(|| format!("failed to parse tag listing page {page}"))
    }
}

#[async_trait::async_trait]
impl TagSource for GitHubTagSource {
    #[instrument(skip(self), fields(repo = %self.repo))]
    async fn list_tags(&self) -> Result<Vec<Tag>> {
        let mut tags = Vec::new();

        for page in 1..=MAX_PAGES {
            let entries = self.fetch_page(page).await?;
            let short_page = entries.len() < PER_PAGE;
            tags.extend(entries.into_iter().map(|e| Tag::new(e.name, e.commit.sha)));
            if short_page {
                debug!(count = tags.len(), pages = page, "tag listing complete");
                return Ok(tags);
            }
        }

        warn!(count = tags.len(), "tag listing truncated at page limit");
        Ok(tags)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
