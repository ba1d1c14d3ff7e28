//! Upstream API rate-limit tracking.
//!
//! Reads `X-RateLimit-Remaining` / `X-RateLimit-Reset` (or the standardised
//! `RateLimit-Remaining` / `RateLimit-Reset`) from tag listing responses so
//! that health checks and metrics can show how close the token is to its
//! quota.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Sentinel for "no response seen yet".
const UNKNOWN: u64 = u64::MAX;

/// Shared rate-limit state updated after every tag source response.
#[derive(Debug, Clone)]
pub struct RateLimitState {
    remaining: Arc<AtomicU64>,
    reset_at: Arc<AtomicU64>,
}

impl Default for RateLimitState {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimitState {
    pub fn new() -> Self {
        Self {
            remaining: Arc::new(AtomicU64::new(UNKNOWN)),
            reset_at: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Remaining calls, or `None` before the first response.
    pub fn remaining(&self) -> Option<u64> {
        match self.remaining.load(Ordering::Relaxed) {
            UNKNOWN => None,
            n => Some(n),
        }
    }

    /// Unix timestamp when the window resets (`0` when unknown).
    pub fn reset_at(&self) -> u64 {
        self.reset_at.load(Ordering::Relaxed)
    }

    /// Record the quota headers of a response.  Returns the remaining count
    /// when the response carried one.
    pub fn update_from_headers(&self, headers: &reqwest::header::HeaderMap) -> Option<u64> {
        let header_u64 = |primary: &str, fallback: &str| {
            headers
                .get(primary)
                .or_else(|| headers.get(fallback))
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
        };

        let remaining = header_u64("X-RateLimit-Remaining", "RateLimit-Remaining");
        if let Some(r) = remaining {
            self.remaining.store(r, Ordering::Relaxed);
        }
        if let Some(r) = header_u64("X-RateLimit-Reset", "RateLimit-Reset") {
            self.reset_at.store(r, Ordering::Relaxed);
        }
        remaining
    }

    /// Seconds until the window resets, `0` if already reset or unknown.
    pub fn resets_in_secs(&self) -> u64 {
        let now = chrono::Utc::now().timestamp().max(0) as u64;
        self.reset_at().saturating_sub(now)
    }
}
