//! Infrastructure Layer - Adapters for the outside world.
//!
//! WebSocket feeds, REST polling, payload normalization, the local
//! notification cache, and the ambient concerns (configuration, metrics,
//! tracing, the snapshot HTTP server).

/// Notification cache backed by a JSON file.
pub mod cache;

/// Environment-driven configuration.
pub mod config;

/// WebSocket feed plumbing: backoff, connection, supervisor, watchdog.
pub mod feed;

/// Snapshot and health HTTP server.
pub mod http;

/// Prometheus metrics.
pub mod metrics;

/// Upstream payload normalization.
pub mod normalize;

/// Interval polling of REST resources.
pub mod poll;

/// JSON REST client and notification server API.
pub mod rest;

/// Tracing subscriber and OTLP export.
pub mod telemetry;
