#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Dashboard Sync - Live Data Synchronization Layer
//!
//! Keeps a trading dashboard's live feeds connected and its polled
//! resources fresh, normalizes every upstream payload into a stable model,
//! and holds the results in bounded in-memory stores that a presentation
//! layer reads as snapshots.
//!
//! # Layers (inside -> outside)
//!
//! - **Domain**: records and stores with no I/O
//!   - `event_log`: bounded, newest-first log of order feed events
//!   - `quote`: quote records and the per-symbol quote table
//!   - `order`: order records and the live order board
//!   - `notification`: notification list, read state and toasts
//!   - `feed`: feed identity, connection state and health
//!
//! - **Application**: notification delivery
//!   - `ports`: acknowledgement and cache interfaces
//!   - `services`: the notification service
//!
//! - **Infrastructure**: adapters
//!   - `feed`: WebSocket connection, supervisor, backoff, idle watchdog
//!   - `normalize`: upstream JSON to domain records
//!   - `poll`: interval polling of REST resources
//!   - `rest`, `cache`, `config`, `metrics`, `telemetry`, `http`
//!
//! # Data Flow
//!
//! ```text
//! order feed (WS) ----------> normalize::order --------> event log + order board
//! quote feed per symbol (WS) -> normalize::quote --------> quote table
//! notification feed (WS) ----> normalize::notification -> notification service --> ack (REST)
//! REST orders/stats/portfolio/scanner -> poll scheduler -> polled resources
//!
//!                 all stores --> SyncRuntime::snapshot() --> /snapshot
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Records and in-memory stores.
pub mod domain;

/// Application layer - Notification service and ports.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

/// Runtime wiring of feeds, pollers and stores.
pub mod runtime;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::event_log::{BoundedLog, EventLogEntry, EventPayload};
pub use domain::feed::{ConnectionState, ConnectionStatus, FeedKind, HealthStatus};
pub use domain::notification::{
    AckOutcome, Notification, NotificationCenter, NotificationSnapshot, Severity,
};
pub use domain::order::{OrderEvent, OrderStatus, OrderTracker, OrderType, Side};
pub use domain::quote::{Quote, QuoteRecord, QuoteTable, Symbol};

// Application
pub use application::ports::{AckError, AckPort, CacheError, NotificationCachePort};
pub use application::services::{Delivery, NotificationService};

// Infrastructure config
pub use infrastructure::config::{ConfigError, SyncConfig};

// Snapshot server
pub use infrastructure::http::{SnapshotServer, SnapshotServerError, SnapshotSource};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};

// Runtime
pub use runtime::{DashboardSnapshot, FeedReport, PolledSnapshots, SyncRuntime};
