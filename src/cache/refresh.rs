//! Background index refresh.
//!
//! A rebuild is attempted at most once per `interval`, measured on the
//! monotonic clock from the start of the previous attempt.  Triggers come
//! either from incoming requests ([`Refresher::maybe_refresh`]) or from a
//! dedicated ticker ([`Refresher::run_periodic`]).  An atomic in-flight flag
//! keeps rebuilds from overlapping; a trigger that loses the race is simply
//! dropped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use crate::error::RebuildError;
use crate::index::IndexBuilder;
use crate::metrics::{MetricsRegistry, RebuildOutcome};

use super::CacheStore;

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RefreshState {
    Idle,
    Rebuilding,
}

/// Outcome bookkeeping reported by the health endpoint.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RefreshStatus {
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub successes: u64,
    pub failures: u64,
}

impl RefreshStatus {
    /// `true` when the most recent attempt failed.
    pub fn is_failing(&self) -> bool {
        match (self.last_success, self.last_failure) {
            (_, None) => false,
            (None, Some(_)) => true,
            (Some(ok), Some(failed)) => failed > ok,
        }
    }
}

// ---------------------------------------------------------------------------
// Refresher
// ---------------------------------------------------------------------------

pub struct Refresher {
    builder: IndexBuilder,
    store: Arc<CacheStore>,
    interval: Duration,
    metrics: MetricsRegistry,
    in_flight: AtomicBool,
    last_attempt: Mutex<Option<Instant>>,
    status: Mutex<RefreshStatus>,
}

/// Releases the in-flight flag when the rebuild finishes or unwinds.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Refresher {
    pub fn new(
        builder: IndexBuilder,
        store: Arc<CacheStore>,
        interval: Duration,
        metrics: MetricsRegistry,
    ) -> Self {
        Self {
            builder,
            store,
            interval,
            metrics,
            in_flight: AtomicBool::new(false),
            last_attempt: Mutex::new(None),
            status: Mutex::new(RefreshStatus::default()),
        }
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn state(&self) -> RefreshState {
        if self.in_flight.load(Ordering::Acquire) {
            RefreshState::Rebuilding
        } else {
            RefreshState::Idle
        }
    }

    pub fn status(&self) -> RefreshStatus {
        self.status.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Whether the interval has elapsed since the last attempt started.
    pub fn is_due(&self) -> bool {
        let last = self.last_attempt.lock().unwrap_or_else(|e| e.into_inner());
        match *last {
            None => true,
            Some(at) => at.elapsed() >= self.interval,
        }
    }

    /// Claim the in-flight flag and stamp the attempt time.  With `force`
    /// unset the claim also requires the interval to have elapsed.  On
    /// success the caller owns the flag and must release it through
    /// [`InFlight`].
    fn try_claim(&self, force: bool) -> bool {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        let mut last = self.last_attempt.lock().unwrap_or_else(|p| p.into_inner());
        let too_soon = !force && last.is_some_and(|at| at.elapsed() < self.interval);
        if too_soon {
            self.in_flight.store(false, Ordering::Release);
            return false;
        }
        *last = Some(Instant::now());
        true
    }

    /// Request-path trigger.  Returns immediately; when a rebuild is due and
    /// none is running, one is spawned and its handle returned.
    pub fn maybe_refresh(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        if !self.is_due() || !self.try_claim(false) {
            return None;
        }

        debug!("refresh interval elapsed, spawning background rebuild");
        let this = Arc::clone(self);
        Some(tokio::spawn(async move {
            let _guard = InFlight(&this.in_flight);
            let _ = this.rebuild().await;
        }))
    }

    /// Rebuild immediately, waiting for the result.  Used for the initial
    /// load.  Returns without rebuilding if another rebuild is running.
    pub async fn refresh_now(&self) -> Result<(), RebuildError> {
        if !self.try_claim(true) {
            debug!("rebuild already in flight, skipping forced refresh");
            return Ok(());
        }
        let _guard = InFlight(&self.in_flight);
        self.rebuild().await
    }

    /// Dedicated ticker.  Runs until the task is dropped.
    pub async fn run_periodic(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; the initial build already ran.
        ticker.tick().await;

        info!(interval_secs = self.interval.as_secs(), "periodic refresh started");
        loop {
            ticker.tick().await;
            if self.try_claim(false) {
                let _guard = InFlight(&self.in_flight);
                let _ = self.rebuild().await;
            }
        }
    }

    /// One rebuild attempt.  The caller holds the in-flight flag.
    #[instrument(skip(self))]
    async fn rebuild(&self) -> Result<(), RebuildError> {
        let started = Instant::now();
        let result = self.builder.build().await;
        let elapsed = started.elapsed();
        let metrics = &self.metrics.metrics;
        metrics.rebuild_duration_seconds.observe(elapsed.as_secs_f64());

        match result {
            Ok(snapshot) => {
                metrics.record_snapshot(&snapshot);
                metrics.record_rebuild(RebuildOutcome::Success);
                let tags = snapshot.tags.len();
                self.store.swap(snapshot);

                let mut status = self.status.lock().unwrap_or_else(|e| e.into_inner());
                status.last_success = Some(Utc::now());
                status.successes += 1;
                info!(tags, elapsed_ms = elapsed.as_millis() as u64, "cache swapped");
                Ok(())
            }
            Err(e) => {
                metrics.record_rebuild(RebuildOutcome::from(&e));
                let mut status = self.status.lock().unwrap_or_else(|p| p.into_inner());
                status.last_failure = Some(Utc::now());
                status.last_error = Some(e.to_string());
                status.failures += 1;
                match &e {
                    RebuildError::SourceUnavailable(_) => {
                        warn!(error = %e, kind = e.kind(), "rebuild skipped, keeping previous cache")
                    }
                    RebuildError::StorageUnavailable(_) => {
                        error!(error = %e, kind = e.kind(), "rebuild skipped, keeping previous cache")
                    }
                }
                Err(e)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
