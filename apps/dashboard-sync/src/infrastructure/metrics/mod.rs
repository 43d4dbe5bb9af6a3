//! Prometheus Metrics Module
//!
//! Counters and gauges for the sync layer, rendered at `/metrics` on the
//! snapshot server.
//!
//! # Metrics Categories
//!
//! - **Feeds**: messages received, malformed frames, reconnects, give-ups,
//!   connection state
//! - **Polling**: fetch outcomes, durations and skipped ticks
//! - **Notifications**: ingest outcomes and failed acks
//! - **Event log**: evictions
//!
//! Recording is a no-op until `init_metrics` installs the recorder, so
//! library code and tests can record freely.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::domain::feed::FeedKind;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder. Later calls return the same handle.
///
/// # Errors
///
/// Returns `BuildError` if the recorder cannot be installed, for example
/// because another global recorder is already set.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Feeds
    describe_counter!(
        "dashboard_sync_messages_received_total",
        "Total messages received on live feeds"
    );
    describe_counter!(
        "dashboard_sync_malformed_messages_total",
        "Total feed frames discarded because they were not JSON"
    );
    describe_counter!(
        "dashboard_sync_reconnects_total",
        "Total feed reconnection attempts"
    );
    describe_counter!(
        "dashboard_sync_feeds_given_up_total",
        "Total feeds that exhausted their reconnect attempts"
    );
    describe_gauge!(
        "dashboard_sync_feed_connected",
        "Whether a feed transport is open (1) or not (0)"
    );

    // Polling
    describe_counter!(
        "dashboard_sync_poll_fetches_total",
        "Total polled REST fetches by outcome"
    );
    describe_counter!(
        "dashboard_sync_poll_ticks_skipped_total",
        "Total poll ticks skipped because a fetch was still in flight"
    );
    describe_histogram!(
        "dashboard_sync_poll_fetch_seconds",
        "Duration of polled REST fetches"
    );

    // Notifications
    describe_counter!(
        "dashboard_sync_notifications_total",
        "Total notifications received by outcome"
    );
    describe_counter!(
        "dashboard_sync_ack_failures_total",
        "Total notification acknowledgements that failed to reach the server"
    );

    // Event log
    describe_counter!(
        "dashboard_sync_event_log_evictions_total",
        "Total event log entries evicted by newer ones"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Outcome label for polled fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Value refreshed.
    Success,
    /// Fetch failed; prior value kept.
    Failure,
}

impl FetchOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }
}

/// Outcome label for received notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationOutcome {
    /// Added to the list.
    Added,
    /// Already seen; dropped.
    Duplicate,
    /// Not a notification.
    Unrecognized,
}

impl NotificationOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::Duplicate => "duplicate",
            Self::Unrecognized => "unrecognized",
        }
    }
}

fn symbol_label(feed: &FeedKind) -> String {
    match feed {
        FeedKind::Quotes(symbol) => symbol.clone(),
        FeedKind::Orders | FeedKind::Notifications => String::new(),
    }
}

/// Record a message received on a feed.
pub fn record_message_received(feed: &FeedKind) {
    counter!(
        "dashboard_sync_messages_received_total",
        "feed" => feed.label(),
        "symbol" => symbol_label(feed)
    )
    .increment(1);
}

/// Record a frame that could not be decoded.
pub fn record_malformed_message(feed: &FeedKind) {
    counter!(
        "dashboard_sync_malformed_messages_total",
        "feed" => feed.label(),
        "symbol" => symbol_label(feed)
    )
    .increment(1);
}

/// Record a reconnection attempt.
pub fn record_reconnect(feed: &FeedKind) {
    counter!(
        "dashboard_sync_reconnects_total",
        "feed" => feed.label(),
        "symbol" => symbol_label(feed)
    )
    .increment(1);
}

/// Record a feed giving up.
pub fn record_feed_gave_up(feed: &FeedKind) {
    counter!(
        "dashboard_sync_feeds_given_up_total",
        "feed" => feed.label(),
        "symbol" => symbol_label(feed)
    )
    .increment(1);
}

/// Update whether a feed's transport is open.
pub fn set_feed_open(feed: &FeedKind, open: bool) {
    gauge!(
        "dashboard_sync_feed_connected",
        "feed" => feed.label(),
        "symbol" => symbol_label(feed)
    )
    .set(if open { 1.0 } else { 0.0 });
}

/// Record a polled fetch and its duration.
pub fn record_poll_fetch(resource: &'static str, outcome: FetchOutcome, duration: Duration) {
    counter!(
        "dashboard_sync_poll_fetches_total",
        "resource" => resource,
        "outcome" => outcome.as_str()
    )
    .increment(1);
    histogram!(
        "dashboard_sync_poll_fetch_seconds",
        "resource" => resource
    )
    .record(duration.as_secs_f64());
}

/// Record a poll tick skipped because the previous fetch was in flight.
pub fn record_poll_tick_skipped(resource: &'static str) {
    counter!(
        "dashboard_sync_poll_ticks_skipped_total",
        "resource" => resource
    )
    .increment(1);
}

/// Record a received notification.
pub fn record_notification(outcome: NotificationOutcome) {
    counter!(
        "dashboard_sync_notifications_total",
        "outcome" => outcome.as_str()
    )
    .increment(1);
}

/// Record an acknowledgement that failed to reach the server.
pub fn record_ack_failure() {
    counter!("dashboard_sync_ack_failures_total").increment(1);
}

/// Record an event log eviction.
pub fn record_event_log_eviction() {
    counter!("dashboard_sync_event_log_evictions_total").increment(1);
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_labels() {
        assert_eq!(FetchOutcome::Success.as_str(), "success");
        assert_eq!(FetchOutcome::Failure.as_str(), "failure");
        assert_eq!(NotificationOutcome::Added.as_str(), "added");
        assert_eq!(NotificationOutcome::Duplicate.as_str(), "duplicate");
        assert_eq!(NotificationOutcome::Unrecognized.as_str(), "unrecognized");
    }

    #[test]
    fn symbol_label_only_for_quote_feeds() {
        assert_eq!(symbol_label(&FeedKind::Quotes("AAPL".into())), "AAPL");
        assert_eq!(symbol_label(&FeedKind::Orders), "");
    }

    #[test]
    fn recording_without_recorder_is_noop() {
        record_message_received(&FeedKind::Orders);
        set_feed_open(&FeedKind::Notifications, true);
        record_poll_fetch("orders", FetchOutcome::Success, Duration::from_millis(3));
        record_ack_failure();
    }
}
