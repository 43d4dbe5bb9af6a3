//! Snapshot and Health Endpoint
//!
//! Local HTTP surface for the presentation layer and for monitoring.
//!
//! # Endpoints
//!
//! - `GET /healthz` - liveness probe (simple OK)
//! - `GET /health` - feed connectivity and resource staleness
//! - `GET /snapshot` - full dashboard snapshot as JSON
//! - `GET /metrics` - Prometheus metrics in text format
//! - `POST /notifications/{id}/ack` - mark one notification read
//! - `POST /notifications/clear` - clear the notification list

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::domain::feed::HealthStatus;
use crate::domain::notification::AckOutcome;
use crate::infrastructure::metrics::get_metrics_handle;
use crate::runtime::{DashboardSnapshot, FeedReport, SyncRuntime};

// =============================================================================
// Source
// =============================================================================

/// What the server reads from and writes to.
pub trait SnapshotSource: Send + Sync + 'static {
    /// Copy of every store.
    fn snapshot(&self) -> DashboardSnapshot;

    /// Mark one notification read.
    fn acknowledge(&self, id: &str) -> AckOutcome;

    /// Clear the notification list.
    fn clear_notifications(&self);
}

impl SnapshotSource for SyncRuntime {
    fn snapshot(&self) -> DashboardSnapshot {
        Self::snapshot(self)
    }

    fn acknowledge(&self, id: &str) -> AckOutcome {
        Self::acknowledge(self, id)
    }

    fn clear_notifications(&self) {
        Self::clear_notifications(self);
    }
}

// =============================================================================
// Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status.
    pub status: HealthStatus,
    /// Crate version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Connection state per feed.
    pub feeds: Vec<FeedReport>,
    /// Names of polled resources whose last fetch failed.
    pub stale_resources: Vec<&'static str>,
}

// =============================================================================
// Server State
// =============================================================================

struct ServerState {
    version: String,
    started_at: Instant,
    source: Arc<dyn SnapshotSource>,
}

// =============================================================================
// Snapshot Server
// =============================================================================

/// Snapshot HTTP server.
pub struct SnapshotServer {
    port: u16,
    state: Arc<ServerState>,
    cancel: CancellationToken,
}

impl SnapshotServer {
    /// Create a server over `source`.
    #[must_use]
    pub fn new(port: u16, source: Arc<dyn SnapshotSource>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state: Arc::new(ServerState {
                version: env!("CARGO_PKG_VERSION").to_string(),
                started_at: Instant::now(),
                source,
            }),
            cancel,
        }
    }

    /// Run until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `SnapshotServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), SnapshotServerError> {
        let app = router(Arc::clone(&self.state));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| SnapshotServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Snapshot server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| SnapshotServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Snapshot server stopped");
        Ok(())
    }
}

fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/snapshot", get(snapshot_handler))
        .route("/metrics", get(metrics_handler))
        .route("/notifications/{id}/ack", post(ack_handler))
        .route("/notifications/clear", post(clear_handler))
        .with_state(state)
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn snapshot_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    Json(state.source.snapshot())
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            let body = handle.render();
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                body,
            )
        },
    )
}

async fn ack_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let (status, outcome) = match state.source.acknowledge(&id) {
        AckOutcome::Acknowledged => (StatusCode::OK, "acknowledged"),
        AckOutcome::AlreadyRead => (StatusCode::OK, "already_read"),
        AckOutcome::NotFound => (StatusCode::NOT_FOUND, "not_found"),
    };
    (status, Json(json!({ "notification_id": id, "outcome": outcome })))
}

async fn clear_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    state.source.clear_notifications();
    StatusCode::NO_CONTENT
}

fn build_health_response(state: &ServerState) -> HealthResponse {
    let snapshot = state.source.snapshot();
    let polled = &snapshot.polled;
    let stale_resources = [
        ("orders", polled.orders.is_stale()),
        ("stats", polled.stats.is_stale()),
        ("portfolio", polled.portfolio.is_stale()),
        ("scanner", polled.scanner.is_stale()),
    ]
    .into_iter()
    .filter_map(|(name, stale)| stale.then_some(name))
    .collect();

    HealthResponse {
        status: snapshot.health,
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        feeds: snapshot.feeds,
        stale_resources,
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Snapshot server errors.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================
