//! Main axum router and HTTP request handlers for the release directory.
//!
//! Routes:
//! - `GET /`                      - Listing of release tags
//! - `GET /tags/{tag}`            - Files published under one tag
//! - `GET /tags/latest/{name}`    - Redirect to the newest matching package
//! - `GET /healthz`               - Health check
//! - `GET /metrics`               - Prometheus metrics

use std::sync::Arc;

use askama::Template;
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Redirect, Response},
    routing::get,
    Router,
};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, instrument};

use crate::config::RefreshMode;
use crate::error::QueryError;
use crate::index::query::{files_for_tag, listable_tags, resolve_latest, storage_url};
use crate::index::Snapshot;
use crate::metrics::Route;
use crate::AppState;

use super::views::{FileRow, FilesTemplate, IndexTemplate, NotFoundTemplate};

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the axum [`Router`] with all HTTP routes and shared state.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Release directory
        .route("/", get(handle_index))
        .route("/tags/latest/{name}", get(handle_latest_redirect))
        .route("/tags/{tag}", get(handle_tag))
        // Health, metrics
        .route("/healthz", get(handle_health))
        .route("/metrics", get(handle_metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET /`
#[instrument(skip(state))]
async fn handle_index(State(state): State<Arc<AppState>>) -> Result<Response, AppError> {
    state.metrics.metrics.record_request(Route::Index);
    let snapshot = current_snapshot(&state);

    let template = IndexTemplate {
        tags: listable_tags(&snapshot),
    };
    render(&template)
}

/// `GET /tags/{tag}`
#[instrument(skip(state), fields(%tag))]
async fn handle_tag(
    State(state): State<Arc<AppState>>,
    Path(tag): Path<String>,
) -> Result<Response, AppError> {
    state.metrics.metrics.record_request(Route::Tag);
    let snapshot = current_snapshot(&state);

    let base = &state.config.storage.download_base_url;
    let files = files_for_tag(&snapshot, &tag)?
        .iter()
        .map(|file| FileRow::new(base, &tag, file))
        .collect();

    render(&FilesTemplate { tag, files })
}

/// `GET /tags/latest/{name}`
///
/// Redirects to the storage URL of the first `latest` package whose key or
/// version-free name contains `name`.
#[instrument(skip(state), fields(%name))]
async fn handle_latest_redirect(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Response, AppError> {
    state.metrics.metrics.record_request(Route::LatestRedirect);
    let snapshot = current_snapshot(&state);

    let file = resolve_latest(&snapshot, &name)?;
    let target = storage_url(&state.config.storage.download_base_url, file);
    debug!(key = %file.key, %target, "redirecting to latest package");
    Ok(Redirect::to(&target).into_response())
}

/// `GET /healthz`
async fn handle_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health_state = crate::health::HealthState {
        refresher: Arc::clone(&state.refresher),
        rate_limit: state.rate_limit.clone(),
    };
    crate::health::health_handler(State(health_state)).await
}

/// `GET /metrics`
///
/// Returns Prometheus metrics collected by the service.
async fn handle_metrics(State(state): State<Arc<AppState>>) -> Result<Response, AppError> {
    let buf = state
        .metrics
        .encode()
        .map_err(|e| AppError::Internal(anyhow::anyhow!("metrics encoding failed: {e}")))?;

    Ok((
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            "application/openmetrics-text; version=1.0.0; charset=utf-8",
        )],
        buf,
    )
        .into_response())
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Kick off a background rebuild when one is due, then hand back whatever
/// snapshot is live right now.  The request never waits on the rebuild.
fn current_snapshot(state: &AppState) -> Arc<Snapshot> {
    if state.config.refresh.mode == RefreshMode::OnRequest {
        state.refresher.maybe_refresh();
    }
    state.cache.get()
}

fn render<T: Template>(template: &T) -> Result<Response, AppError> {
    let html = template
        .render()
        .map_err(|e| AppError::Internal(anyhow::anyhow!("template render error: {e}")))?;
    Ok(Html(html).into_response())
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Application-level error type that maps cleanly to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    /// The requested tag or package does not exist.
    NotFound(QueryError),
    /// An unexpected internal error.
    Internal(anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::NotFound(err) => {
                debug!(error = %err, "not found");
                let page = NotFoundTemplate {
                    message: err.to_string(),
                };
                match page.render() {
                    Ok(html) => (StatusCode::NOT_FOUND, Html(html)).into_response(),
                    Err(_) => (StatusCode::NOT_FOUND, err.to_string()).into_response(),
                }
            }
            AppError::Internal(err) => {
                error!(error = %err, "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("Internal server error: {err:#}"),
                )
                    .into_response()
            }
        }
    }
}

impl From<QueryError> for AppError {
    fn from(err: QueryError) -> Self {
        AppError::NotFound(err)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tokio::sync::Semaphore;
    use tower::ServiceExt;

    use super::*;
    use crate::cache::{CacheStore, RefreshState, Refresher};
    use crate::config::Config;
    use crate::forge::rate_limit::RateLimitState;
    use crate::forge::TagSource;
    use crate::index::{IndexBuilder, PackageFile, Tag};
    use crate::metrics::MetricsRegistry;
    use crate::storage::PackageStore;

    /// Tag source that takes one gate permit per call.
    struct Tags {
        calls: AtomicUsize,
        gate: Semaphore,
    }

    #[async_trait::async_trait]
    impl TagSource for Tags {
        async fn list_tags(&self) -> anyhow::Result<Vec<Tag>> {
            self.gate.acquire().await?.forget();
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![
                Tag::new("1.0.0", "c1"),
                Tag::new("1.0.0.rc1", "c0"),
                Tag::new("1.2.0", "c2"),
            ])
        }
    }

    struct Files;

    #[async_trait::async_trait]
    impl PackageStore for Files {
        async fn list_files(&self, _prefix: &str) -> anyhow::Result<Vec<PackageFile>> {
            Ok([
                "packages/c0/vagrant_1.0.0.rc1_x86_64.deb",
                "packages/c1/vagrant_1.0.0_x86_64.deb",
                "packages/c2/vagrant_1.2.0_i686.deb",
                "packages/c2/vagrant_1.2.0_x86_64.deb",
            ]
            .into_iter()
            .map(PackageFile::new)
            .collect())
        }
    }

    async fn state(mode: RefreshMode) -> (Arc<AppState>, Arc<Tags>) {
        state_with(mode, Duration::from_secs(300), 1000).await
    }

    /// App state after one successful build.  `permits` bounds how many tag
    /// listings may run before the test opens the gate further.
    async fn state_with(
        mode: RefreshMode,
        interval: Duration,
        permits: usize,
    ) -> (Arc<AppState>, Arc<Tags>) {
        let mut config = Config::default();
        config.storage.download_base_url = "http://files.example.com".into();
        config.refresh.mode = mode;

        let tags = Arc::new(Tags {
            calls: AtomicUsize::new(0),
            gate: Semaphore::new(permits),
        });
        let metrics = MetricsRegistry::new();
        let cache = Arc::new(CacheStore::new(Snapshot::empty()));
        let builder = IndexBuilder::new(tags.clone(), Arc::new(Files), "packages/".into());
        let refresher = Arc::new(Refresher::new(
            builder,
            Arc::clone(&cache),
            interval,
            metrics.clone(),
        ));
        refresher.refresh_now().await.unwrap();

        let state = Arc::new(AppState {
            config: Arc::new(config),
            cache,
            refresher,
            metrics,
            rate_limit: RateLimitState::new(),
        });
        (state, tags)
    }

    async fn get(state: Arc<AppState>, uri: &str) -> Response {
        create_router(state)
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn index_lists_release_tags() {
        let (state, _) = state(RefreshMode::OnRequest).await;
        let response = get(state, "/").await;
        assert_eq!(response.status(), StatusCode::OK);

        let html = body_text(response).await;
        assert!(html.contains(">latest</a>"));
        assert!(html.contains(">1.2.0</a>"));
        assert!(html.contains(">1.0.0</a>"));
        assert!(!html.contains("1.0.0.rc1"));
        let latest = html.find(">latest</a>").unwrap();
        let newest = html.find(">1.2.0</a>").unwrap();
        let oldest = html.find(">1.0.0</a>").unwrap();
        assert!(latest < newest && newest < oldest);
    }

    #[tokio::test]
    async fn tag_page_lists_files() {
        let (state, _) = state(RefreshMode::OnRequest).await;
        let response = get(state, "/tags/1.2.0").await;
        assert_eq!(response.status(), StatusCode::OK);

        let html = body_text(response).await;
        assert!(html.contains("vagrant_1.2.0_i686.deb"));
        assert!(html.contains("vagrant_1.2.0_x86_64.deb"));
        assert!(!html.contains("vagrant_1.0.0_x86_64.deb"));
    }

    #[tokio::test]
    async fn unknown_tag_is_404() {
        let (state, _) = state(RefreshMode::OnRequest).await;
        let response = get(state, "/tags/nope").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(body_text(response).await.contains("nope"));
    }

    #[tokio::test]
    async fn latest_redirects_to_storage() {
        let (state, _) = state(RefreshMode::OnRequest).await;
        for name in ["x86_64", "vagrant_x86_64.deb"] {
            let response = get(Arc::clone(&state), &format!("/tags/latest/{name}")).await;
            assert_eq!(response.status(), StatusCode::SEE_OTHER);
            assert_eq!(
                response.headers()[header::LOCATION],
                "http://files.example.com/packages/c2/vagrant_1.2.0_x86_64.deb"
            );
        }
    }

    #[tokio::test]
    async fn latest_without_match_is_404() {
        let (state, _) = state(RefreshMode::OnRequest).await;
        let response = get(state, "/tags/latest/arm64").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn latest_tag_page_links_to_redirects() {
        let (state, _) = state(RefreshMode::OnRequest).await;
        let response = get(state, "/tags/latest").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.contains("vagrant_x86_64.deb"));
    }

    #[tokio::test]
    async fn fresh_cache_does_not_rebuild_on_request() {
        let (state, tags) = state(RefreshMode::OnRequest).await;
        get(Arc::clone(&state), "/").await;
        get(state, "/tags/1.0.0").await;
        assert_eq!(tags.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn health_and_metrics_never_trigger_refresh() {
        let (state, tags) =
            state_with(RefreshMode::OnRequest, Duration::from_secs(60), 1000).await;
        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(state.refresher.is_due());

        assert_eq!(get(Arc::clone(&state), "/healthz").await.status(), StatusCode::OK);
        assert_eq!(get(Arc::clone(&state), "/metrics").await.status(), StatusCode::OK);
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        assert_eq!(tags.calls.load(Ordering::SeqCst), 1);
        assert!(state.refresher.is_due());
        assert_eq!(state.refresher.state(), RefreshState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_view_serves_old_snapshot_while_rebuilding() {
        let (state, tags) = state_with(RefreshMode::OnRequest, Duration::from_secs(60), 1).await;
        let before = state.cache.get();
        tokio::time::advance(Duration::from_secs(61)).await;

        let response = get(Arc::clone(&state), "/").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.contains(">1.2.0</a>"));
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        // The rebuild is parked on the gate; readers still see the old data.
        assert_eq!(state.refresher.state(), RefreshState::Rebuilding);
        assert_eq!(tags.calls.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&before, &state.cache.get()));

        tags.gate.add_permits(1);
        while state.refresher.state() == RefreshState::Rebuilding {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(tags.calls.load(Ordering::SeqCst), 2);
        assert!(!Arc::ptr_eq(&before, &state.cache.get()));
        assert!(before.same_contents(&state.cache.get()));
    }

    #[tokio::test]
    async fn health_and_metrics_are_served() {
        let (state, _) = state(RefreshMode::Interval).await;
        get(Arc::clone(&state), "/").await;

        let health = get(Arc::clone(&state), "/healthz").await;
        assert_eq!(health.status(), StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body_text(health).await).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["cache"]["latest"], "c2");

        let metrics = get(state, "/metrics").await;
        assert_eq!(metrics.status(), StatusCode::OK);
        let text = body_text(metrics).await;
        assert!(text.contains(r#"releasecache_http_requests_total{route="Index"} 1"#));
        assert!(text.contains("releasecache_cache_files 4"));
    }
}
