//! Poll Scheduler
//!
//! Periodically refreshes one REST-backed resource. The first fetch runs
//! immediately, then one per tick. A tick that fires while the previous
//! fetch is still running is skipped rather than queued, so a slow endpoint
//! never accumulates concurrent requests.
//!
//! A failed fetch keeps the last good value and marks the resource stale
//! until the next success. There is no extra backoff; the next tick is the
//! retry.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::infrastructure::metrics::{self, FetchOutcome};
use crate::infrastructure::rest::RestError;

// =============================================================================
// Errors
// =============================================================================

/// Errors from one polled fetch.
#[derive(Debug, thiserror::Error)]
pub enum PollError {
    /// Request failed or returned a non-success status.
    #[error(transparent)]
    Rest(#[from] RestError),

    /// Body was JSON but not the expected shape.
    #[error("unexpected response shape: {0}")]
    Shape(String),
}

// =============================================================================
// Polled Resource
// =============================================================================

/// Last known value of a polled resource plus freshness markers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceSnapshot<T> {
    /// Last successfully fetched value.
    pub value: Option<T>,
    /// When `value` was fetched.
    pub last_success: Option<DateTime<Utc>>,
    /// First failure since the last success.
    pub stale_since: Option<DateTime<Utc>>,
    /// Most recent failure.
    pub last_error: Option<String>,
    /// Completed fetches, successful or not.
    pub fetches: u64,
    /// Failed fetches.
    pub failures: u64,
    /// Ticks skipped because a fetch was in flight.
    pub skipped_ticks: u64,
}

impl<T> Default for ResourceSnapshot<T> {
    fn default() -> Self {
        Self {
            value: None,
            last_success: None,
            stale_since: None,
            last_error: None,
            fetches: 0,
            failures: 0,
            skipped_ticks: 0,
        }
    }
}

impl<T> ResourceSnapshot<T> {
    /// Whether the held value is out of date.
    #[must_use]
    pub const fn is_stale(&self) -> bool {
        self.stale_since.is_some()
    }
}

/// Shared state of one polled resource. Written only by its scheduler.
#[derive(Debug)]
pub struct PolledResource<T> {
    state: RwLock<ResourceSnapshot<T>>,
}

impl<T> Default for PolledResource<T> {
    fn default() -> Self {
        Self {
            state: RwLock::new(ResourceSnapshot::default()),
        }
    }
}

impl<T: Clone> PolledResource<T> {
    /// Create an empty resource.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a fresh value.
    pub fn record_success(&self, value: T, now: DateTime<Utc>) {
        let mut state = self.state.write();
        state.value = Some(value);
        state.last_success = Some(now);
        state.stale_since = None;
        state.last_error = None;
        state.fetches += 1;
    }

    /// Record a failure, keeping the previous value.
    pub fn record_failure(&self, error: &PollError, now: DateTime<Utc>) {
        let mut state = self.state.write();
        state.stale_since.get_or_insert(now);
        state.last_error = Some(error.to_string());
        state.fetches += 1;
        state.failures += 1;
    }

    fn record_skip(&self) {
        self.state.write().skipped_ticks += 1;
    }

    /// Copy of the current state.
    #[must_use]
    pub fn snapshot(&self) -> ResourceSnapshot<T> {
        self.state.read().clone()
    }

    /// Whether the last fetch failed.
    #[must_use]
    pub fn is_stale(&self) -> bool {
        self.state.read().is_stale()
    }
}

// =============================================================================
// Scheduler
// =============================================================================

/// Handle to a running poll loop.
#[derive(Debug)]
pub struct PollScheduler {
    name: &'static str,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl PollScheduler {
    /// Start polling `resource` every `interval`.
    ///
    /// `cancel` is the parent token; the scheduler runs on a child of it.
    pub fn start<T, F, Fut>(
        name: &'static str,
        fetch: F,
        interval: Duration,
        resource: Arc<PolledResource<T>>,
        cancel: &CancellationToken,
    ) -> Self
    where
        T: Clone + Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, PollError>> + Send + 'static,
    {
        let cancel = cancel.child_token();
        let task = tokio::spawn(run(name, fetch, interval, resource, cancel.clone()));
        Self {
            name,
            cancel,
            task: Some(task),
        }
    }

    /// Resource name used in logs and metrics.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Stop the schedule and abandon any in-flight fetch.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Stop and wait for the loop to exit.
    pub async fn join(mut self) {
        self.stop();
        if let Some(task) = self.task.take()
            && let Err(e) = task.await
        {
            tracing::warn!(resource = self.name, error = %e, "Poll task failed");
        }
    }
}

impl Drop for PollScheduler {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

type InFlight<T> = Pin<Box<dyn Future<Output = Result<T, PollError>> + Send>>;

async fn run<T, F, Fut>(
    name: &'static str,
    fetch: F,
    period: Duration,
    resource: Arc<PolledResource<T>>,
    cancel: CancellationToken,
) where
    T: Clone + Send + Sync + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, PollError>> + Send + 'static,
{
    let mut interval = tokio::time::interval(period.max(Duration::from_millis(1)));
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut in_flight: Option<(InFlight<T>, Instant)> = None;
    tracing::debug!(resource = name, interval_ms = ?period.as_millis(), "Poll scheduler started");

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                tracing::debug!(resource = name, "Poll scheduler stopped");
                break;
            }
            result = next_result(&mut in_flight), if in_flight.is_some() => {
                let elapsed = in_flight.take().map(|(_, started)| started.elapsed()).unwrap_or_default();
                let now = Utc::now();
                match result {
                    Ok(value) => {
                        resource.record_success(value, now);
                        metrics::record_poll_fetch(name, FetchOutcome::Success, elapsed);
                    }
                    Err(e) => {
                        tracing::warn!(resource = name, error = %e, "Poll fetch failed; keeping last value");
                        resource.record_failure(&e, now);
                        metrics::record_poll_fetch(name, FetchOutcome::Failure, elapsed);
                    }
                }
            }
            _ = interval.tick() => {
                if in_flight.is_some() {
                    tracing::debug!(resource = name, "Fetch still in flight; skipping tick");
                    resource.record_skip();
                    metrics::record_poll_tick_skipped(name);
                    continue;
                }
                in_flight = Some((Box::pin(fetch()), Instant::now()));
            }
        }
    }
}

async fn next_result<T>(slot: &mut Option<(InFlight<T>, Instant)>) -> Result<T, PollError> {
    match slot {
        Some((future, _)) => future.await,
        None => std::future::pending().await,
    }
}
