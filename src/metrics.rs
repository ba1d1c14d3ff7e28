use std::sync::Arc;

use prometheus_client::encoding::{EncodeLabelSet, EncodeLabelValue};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;

use crate::error::RebuildError;
use crate::index::Snapshot;

// ---------------------------------------------------------------------------
// Label types
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RebuildLabels {
    pub outcome: RebuildOutcome,
}

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum RebuildOutcome {
    Success,
    SourceUnavailable,
    StorageUnavailable,
}

impl From<&RebuildError> for RebuildOutcome {
    fn from(err: &RebuildError) -> Self {
        match err {
            RebuildError::SourceUnavailable(_) => RebuildOutcome::SourceUnavailable,
            RebuildError::StorageUnavailable(_) => RebuildOutcome::StorageUnavailable,
        }
    }
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RouteLabels {
    pub route: Route,
}

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum Route {
    Index,
    Tag,
    LatestRedirect,
}

// ---------------------------------------------------------------------------
// Metrics struct
// ---------------------------------------------------------------------------

/// Central container for every Prometheus metric exposed by the service.
pub struct Metrics {
    // -- rebuilds --
    pub rebuild_total: Family<RebuildLabels, Counter>,
    pub rebuild_duration_seconds: Histogram,

    // -- cache contents --
    pub cache_tags: Gauge,
    pub cache_commits: Gauge,
    pub cache_files: Gauge,

    // -- upstream API --
    pub upstream_api_calls: Counter,
    pub upstream_api_rate_limit_remaining: Gauge,

    // -- requests --
    pub http_requests: Family<RouteLabels, Counter>,
}

impl Metrics {
    /// Create a new [`Metrics`] instance and register every metric with the
    /// supplied `registry`.
    pub fn new(registry: &mut Registry) -> Self {
        let rebuild_total = Family::<RebuildLabels, Counter>::default();
        registry.register(
            "releasecache_rebuild",
            "Index rebuild attempts by outcome",
            rebuild_total.clone(),
        );

        let rebuild_duration_seconds = Histogram::new(exponential_buckets(0.05, 2.0, 12));
        registry.register(
            "releasecache_rebuild_duration_seconds",
            "Index rebuild latency in seconds",
            rebuild_duration_seconds.clone(),
        );

        let cache_tags: Gauge = Gauge::default();
        registry.register(
            "releasecache_cache_tags",
            "Tags in the live snapshot, including latest",
            cache_tags.clone(),
        );

        let cache_commits: Gauge = Gauge::default();
        registry.register(
            "releasecache_cache_commits",
            "Commits with at least one package in the live snapshot",
            cache_commits.clone(),
        );

        let cache_files: Gauge = Gauge::default();
        registry.register(
            "releasecache_cache_files",
            "Package files in the live snapshot",
            cache_files.clone(),
        );

        let upstream_api_calls = Counter::default();
        registry.register(
            "releasecache_upstream_api_calls",
            "Tag source API requests",
            upstream_api_calls.clone(),
        );

        let upstream_api_rate_limit_remaining: Gauge = Gauge::default();
        registry.register(
            "releasecache_upstream_api_rate_limit_remaining",
            "Remaining tag source API calls before rate limit",
            upstream_api_rate_limit_remaining.clone(),
        );

        let http_requests = Family::<RouteLabels, Counter>::default();
        registry.register(
            "releasecache_http_requests",
            "HTTP requests served by route",
            http_requests.clone(),
        );

        Self {
            rebuild_total,
            rebuild_duration_seconds,
            cache_tags,
            cache_commits,
            cache_files,
            upstream_api_calls,
            upstream_api_rate_limit_remaining,
            http_requests,
        }
    }

    pub fn record_rebuild(&self, outcome: RebuildOutcome) {
        self.rebuild_total
            .get_or_create(&RebuildLabels { outcome })
            .inc();
    }

    pub fn record_snapshot(&self, snapshot: &Snapshot) {
        self.cache_tags.set(snapshot.tags.len() as i64);
        self.cache_commits.set(snapshot.commit_count() as i64);
        self.cache_files.set(snapshot.file_count() as i64);
    }

    pub fn record_request(&self, route: Route) {
        self.http_requests
            .get_or_create(&RouteLabels { route })
            .inc();
    }
}

// ---------------------------------------------------------------------------
// Shared handle
// ---------------------------------------------------------------------------

/// Thread-safe wrapper for the metrics registry, used in [`AppState`].
///
/// [`AppState`]: crate::AppState
#[derive(Clone)]
pub struct MetricsRegistry {
    pub registry: Arc<Registry>,
    pub metrics: Arc<Metrics>,
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRegistry {
    /// Build a fresh registry and pre-register all service metrics.
    pub fn new() -> Self {
        let mut registry = Registry::default();
        let metrics = Metrics::new(&mut registry);
        Self {
            registry: Arc::new(registry),
            metrics: Arc::new(metrics),
        }
    }

    /// Render the registry in the OpenMetrics text format.
    pub fn encode(&self) -> Result<String, std::fmt::Error> {
        let mut buf = String::new();
        prometheus_client::encoding::text::encode(&mut buf, &self.registry)?;
        Ok(buf)
    }
}
