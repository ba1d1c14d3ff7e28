use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::cache::{RefreshState, Refresher};
use crate::forge::rate_limit::RateLimitState;
use crate::index::LATEST;

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub cache: CacheReport,
    pub refresh: RefreshReport,
    pub upstream: UpstreamReport,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    Degraded,
}

#[derive(Debug, Serialize)]
pub struct CacheReport {
    pub built_at: DateTime<Utc>,
    pub age_secs: i64,
    pub tags: usize,
    pub commits: usize,
    pub files: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RefreshReport {
    pub state: RefreshState,
    pub interval_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_success: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub successes: u64,
    pub failures: u64,
}

#[derive(Debug, Serialize)]
pub struct UpstreamReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit_remaining: Option<u64>,
    pub rate_limit_resets_in_secs: u64,
}

// ---------------------------------------------------------------------------
// Shared state expected by the handler
// ---------------------------------------------------------------------------

/// Minimal subset of `AppState` required by the health-check handler.
#[derive(Clone)]
pub struct HealthState {
    pub refresher: Arc<Refresher>,
    pub rate_limit: RateLimitState,
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

pub fn build_report(state: &HealthState) -> HealthResponse {
    let snapshot = state.refresher.store().get();
    let status = state.refresher.status();

    let cache = CacheReport {
        built_at: snapshot.built_at,
        age_secs: (Utc::now() - snapshot.built_at).num_seconds().max(0),
        tags: snapshot.tags.len(),
        commits: snapshot.commit_count(),
        files: snapshot.file_count(),
        latest: snapshot.commit_for(LATEST).map(str::to_string),
    };

    // A failed rebuild only means the data is stale; the previous snapshot
    // still serves every request.
    let health = if status.is_failing() {
        HealthStatus::Degraded
    } else {
        HealthStatus::Ok
    };

    let refresh = RefreshReport {
        state: state.refresher.state(),
        interval_secs: state.refresher.interval().as_secs(),
        last_success: status.last_success,
        last_error: if status.is_failing() {
            status.last_error
        } else {
            None
        },
        successes: status.successes,
        failures: status.failures,
    };

    let upstream = UpstreamReport {
        rate_limit_remaining: state.rate_limit.remaining(),
        rate_limit_resets_in_secs: state.rate_limit.resets_in_secs(),
    };

    HealthResponse {
        status: health,
        cache,
        refresh,
        upstream,
    }
}

// ---------------------------------------------------------------------------
// Axum handler
// ---------------------------------------------------------------------------

/// `GET /healthz` handler.  Always 200 once the server is up: a degraded
/// cache still answers requests.
pub async fn health_handler(State(state): State<HealthState>) -> impl IntoResponse {
    (StatusCode::OK, Json(build_report(&state)))
}
