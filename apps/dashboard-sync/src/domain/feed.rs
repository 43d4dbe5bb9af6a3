//! Feed Identity and Connection State
//!
//! Every live feed (orders, one per quote symbol, notifications) carries a
//! `ConnectionState` that the presentation layer renders as a connectivity
//! indicator.

use std::fmt;

use serde::Serialize;

use super::quote::Symbol;

/// One logical source of live data.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "feed", content = "symbol", rename_all = "snake_case")]
pub enum FeedKind {
    /// Order/event feed from the broker.
    Orders,
    /// Quote feed for one symbol.
    Quotes(Symbol),
    /// Notification feed.
    Notifications,
}

impl FeedKind {
    /// Short label used in logs and metrics.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Orders => "orders",
            Self::Quotes(_) => "quotes",
            Self::Notifications => "notifications",
        }
    }
}

impl fmt::Display for FeedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Quotes(symbol) => write!(f, "quotes:{symbol}"),
            other => f.write_str(other.label()),
        }
    }
}

/// Transport status of a feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// Transport being established.
    Connecting,
    /// Transport open and delivering.
    Open,
    /// Transport closed (waiting to retry, given up, or stopped).
    Closed,
}

/// Connection state published for one feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionState {
    /// Current transport status.
    pub status: ConnectionStatus,
    /// Consecutive close-then-retry cycles since the last successful open.
    pub attempt: u32,
    /// Set once reconnection has been abandoned.
    pub gave_up: bool,
    /// Reason of the most recent close.
    pub last_error: Option<String>,
}

impl ConnectionState {
    /// Whether the feed is currently delivering.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.status == ConnectionStatus::Open
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self {
            status: ConnectionStatus::Closed,
            attempt: 0,
            gave_up: false,
            last_error: None,
        }
    }
}

// =============================================================================
// Health
// =============================================================================

/// Overall health of the sync layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Every feed open and every polled resource fresh.
    Healthy,
    /// Some feeds closed or some resources stale.
    Degraded,
    /// No feed open.
    Unhealthy,
}

impl HealthStatus {
    /// Classify from feed connectivity and resource staleness.
    #[must_use]
    pub const fn classify(open_feeds: usize, total_feeds: usize, stale_resources: usize) -> Self {
        if open_feeds == 0 {
            Self::Unhealthy
        } else if open_feeds >= total_feeds && stale_resources == 0 {
            Self::Healthy
        } else {
            Self::Degraded
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feed_kind_display() {
        assert_eq!(FeedKind::Orders.to_string(), "orders");
        assert_eq!(FeedKind::Quotes("AAPL".to_string()).to_string(), "quotes:AAPL");
        assert_eq!(FeedKind::Notifications.label(), "notifications");
    }

    #[test]
    fn default_state_is_closed() {
        let state = ConnectionState::default();
        assert!(!state.is_open());
        assert_eq!(state.attempt, 0);
        assert!(!state.gave_up);
    }

    #[test]
    fn health_classification() {
        assert_eq!(HealthStatus::classify(5, 5, 0), HealthStatus::Healthy);
        assert_eq!(HealthStatus::classify(5, 5, 1), HealthStatus::Degraded);
        assert_eq!(HealthStatus::classify(2, 5, 0), HealthStatus::Degraded);
        assert_eq!(HealthStatus::classify(0, 5, 0), HealthStatus::Unhealthy);
        assert_eq!(HealthStatus::classify(0, 0, 0), HealthStatus::Unhealthy);
    }

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&ConnectionStatus::Connecting).unwrap(),
            "\"connecting\""
        );
    }
}
