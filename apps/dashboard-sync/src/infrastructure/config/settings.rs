//! Sync Configuration Settings
//!
//! Configuration types for the sync layer, loaded from environment variables.
//! Every value has a default so an empty environment yields a working local
//! setup.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use reqwest::Url;

use crate::domain::event_log::DEFAULT_CAPACITY;
use crate::domain::notification::DEFAULT_TOAST_LIFETIME;
use crate::domain::quote::Symbol;
use crate::infrastructure::feed::backoff::BackoffConfig;
use crate::infrastructure::feed::watchdog::WatchdogConfig;

/// Environment lookup used while parsing.
type Lookup<'a> = &'a dyn Fn(&str) -> Option<String>;

// =============================================================================
// Service URLs
// =============================================================================

/// Base URLs of the upstream collaborators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceUrls {
    /// Broker service (orders feed, orders/stats/portfolio).
    pub broker: Url,
    /// Market data service (quote feeds, scanner).
    pub market_data: Url,
    /// Notification service (feed, acks, backfill).
    pub notification: Url,
}

impl ServiceUrls {
    /// Order/event feed.
    #[must_use]
    pub fn order_feed(&self) -> Url {
        websocket_url(&self.broker, "/ws")
    }

    /// Quote feed for one symbol.
    #[must_use]
    pub fn quote_feed(&self, symbol: &str) -> Url {
        let mut url = websocket_url(&self.market_data, "/ws/nbbo");
        url.query_pairs_mut().append_pair("symbol", symbol);
        url
    }

    /// Notification feed, authenticated by query token.
    #[must_use]
    pub fn notification_feed(&self, token: Option<&str>) -> Url {
        let mut url = websocket_url(&self.notification, "/v1/ws");
        url.query_pairs_mut().append_pair("token", token.unwrap_or_default());
        url
    }

    /// Polled orders list.
    #[must_use]
    pub fn orders(&self) -> Url {
        endpoint(&self.broker, "/orders")
    }

    /// Polled statistics.
    #[must_use]
    pub fn stats(&self) -> Url {
        endpoint(&self.broker, "/stats")
    }

    /// Polled portfolio.
    #[must_use]
    pub fn portfolio(&self) -> Url {
        endpoint(&self.broker, "/portfolio")
    }

    /// Polled scanner results.
    #[must_use]
    pub fn scanner(&self) -> Url {
        endpoint(&self.market_data, "/scanner/technical")
    }

    /// Notification acknowledgement.
    #[must_use]
    pub fn notification_ack(&self) -> Url {
        endpoint(&self.notification, "/v1/notifications/ack")
    }

    /// Recent notifications list.
    #[must_use]
    pub fn notification_list(&self) -> Url {
        endpoint(&self.notification, "/v1/notifications")
    }
}

impl Default for ServiceUrls {
    fn default() -> Self {
        Self {
            broker: local_url(8000),
            market_data: local_url(8002),
            notification: local_url(8003),
        }
    }
}

fn local_url(port: u16) -> Url {
    Url::parse(&format!("http://localhost:{port}/"))
        .unwrap_or_else(|_| unreachable!("localhost URL with a numeric port always parses"))
}

/// `base` with `path` appended to its own path.
fn endpoint(base: &Url, path: &str) -> Url {
    let mut url = base.clone();
    let joined = format!("{}{path}", base.path().trim_end_matches('/'));
    url.set_path(&joined);
    url.set_query(None);
    url
}

/// Like `endpoint`, switching `http`/`https` to `ws`/`wss`.
fn websocket_url(base: &Url, path: &str) -> Url {
    let mut url = endpoint(base, path);
    let scheme = match base.scheme() {
        "https" => "wss",
        "http" => "ws",
        other => other,
    }
    .to_string();
    // All four schemes are "special", so switching between them cannot fail.
    let _ = url.set_scheme(&scheme);
    url
}

// =============================================================================
// Feeds
// =============================================================================

/// Live feed settings.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedSettings {
    /// Symbols with a quote feed.
    pub quote_symbols: Vec<Symbol>,
    /// Token sent once when the order feed opens.
    pub order_handshake: Option<String>,
    /// Token sent once when a quote feed opens.
    pub quote_handshake: Option<String>,
    /// Shared backoff settings.
    pub backoff: BackoffConfig,
    /// Attempt ceiling for the order feed.
    pub order_max_attempts: u32,
    /// Attempt ceiling for each quote feed.
    pub quote_max_attempts: u32,
    /// Attempt ceiling for the notification feed.
    pub notification_max_attempts: u32,
    /// Idle detection.
    pub watchdog: WatchdogConfig,
}

impl Default for FeedSettings {
    fn default() -> Self {
        let backoff = BackoffConfig::default();
        Self {
            quote_symbols: vec!["AAPL".into(), "MSFT".into(), "SPY".into()],
            order_handshake: Some("hello".into()),
            quote_handshake: Some("subscribe".into()),
            order_max_attempts: backoff.max_attempts,
            quote_max_attempts: backoff.max_attempts,
            notification_max_attempts: backoff.max_attempts,
            backoff,
            watchdog: WatchdogConfig::default(),
        }
    }
}

impl FeedSettings {
    /// Backoff for the order feed.
    #[must_use]
    pub fn order_backoff(&self) -> BackoffConfig {
        self.backoff.clone().with_max_attempts(self.order_max_attempts)
    }

    /// Backoff for a quote feed.
    #[must_use]
    pub fn quote_backoff(&self) -> BackoffConfig {
        self.backoff.clone().with_max_attempts(self.quote_max_attempts)
    }

    /// Backoff for the notification feed.
    #[must_use]
    pub fn notification_backoff(&self) -> BackoffConfig {
        self.backoff
            .clone()
            .with_max_attempts(self.notification_max_attempts)
    }
}

// =============================================================================
// Polling
// =============================================================================

/// Poll intervals and request timeout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollSettings {
    /// Orders list interval.
    pub orders: Duration,
    /// Statistics interval.
    pub stats: Duration,
    /// Portfolio interval.
    pub portfolio: Duration,
    /// Scanner interval.
    pub scanner: Duration,
    /// Per-request timeout.
    pub http_timeout: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            orders: Duration::from_secs(5),
            stats: Duration::from_secs(5),
            portfolio: Duration::from_secs(10),
            scanner: Duration::from_secs(30),
            http_timeout: Duration::from_secs(10),
        }
    }
}

// =============================================================================
// Notifications
// =============================================================================

/// Notification delivery settings.
#[derive(Clone, PartialEq, Eq)]
pub struct NotificationSettings {
    /// Opaque token for the feed and REST calls.
    pub token: Option<String>,
    /// Maximum notifications held.
    pub capacity: usize,
    /// Toast display lifetime.
    pub toast_lifetime: Duration,
    /// Local cache file.
    pub cache_path: Option<PathBuf>,
    /// Notifications fetched at startup (0 disables).
    pub backfill_limit: usize,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            token: None,
            capacity: DEFAULT_CAPACITY,
            toast_lifetime: DEFAULT_TOAST_LIFETIME,
            cache_path: None,
            backfill_limit: 20,
        }
    }
}

impl std::fmt::Debug for NotificationSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationSettings")
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("capacity", &self.capacity)
            .field("toast_lifetime", &self.toast_lifetime)
            .field("cache_path", &self.cache_path)
            .field("backfill_limit", &self.backfill_limit)
            .finish()
    }
}

// =============================================================================
// Sync Config
// =============================================================================

/// Complete sync layer configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    /// Upstream base URLs.
    pub services: ServiceUrls,
    /// Live feeds.
    pub feeds: FeedSettings,
    /// Polled resources.
    pub polling: PollSettings,
    /// Notification delivery.
    pub notifications: NotificationSettings,
    /// Event log capacity.
    pub event_log_capacity: usize,
    /// Snapshot/health HTTP port.
    pub snapshot_port: u16,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            services: ServiceUrls::default(),
            feeds: FeedSettings::default(),
            polling: PollSettings::default(),
            notifications: NotificationSettings::default(),
            event_log_capacity: DEFAULT_CAPACITY,
            snapshot_port: 8090,
        }
    }
}

impl SyncConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable cannot be parsed or fails validation.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable cannot be parsed or fails validation.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env: Lookup<'_> = &lookup;
        let defaults = Self::default();

        let services = ServiceUrls {
            broker: parse_env_url(env, "BROKER_BASE_URL", &defaults.services.broker)?,
            market_data: parse_env_url(
                env,
                "MARKET_DATA_BASE_URL",
                &defaults.services.market_data,
            )?,
            notification: parse_env_url(
                env,
                "NOTIFICATION_BASE_URL",
                &defaults.services.notification,
            )?,
        };

        let backoff = BackoffConfig {
            base_delay: parse_env_duration_millis(
                env,
                "RECONNECT_BASE_DELAY_MS",
                defaults.feeds.backoff.base_delay,
            )?,
            max_delay: parse_env_duration_millis(
                env,
                "RECONNECT_MAX_DELAY_MS",
                defaults.feeds.backoff.max_delay,
            )?,
            multiplier: parse_env(env, "RECONNECT_MULTIPLIER", defaults.feeds.backoff.multiplier)?,
            jitter_factor: parse_env(env, "RECONNECT_JITTER", defaults.feeds.backoff.jitter_factor)?,
            max_attempts: parse_env(
                env,
                "RECONNECT_MAX_ATTEMPTS",
                defaults.feeds.backoff.max_attempts,
            )?,
        };
        if !(backoff.multiplier >= 1.0 && backoff.multiplier.is_finite()) {
            return Err(ConfigError::Invalid {
                key: "RECONNECT_MULTIPLIER",
                reason: "must be a finite number of at least 1".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&backoff.jitter_factor) {
            return Err(ConfigError::Invalid {
                key: "RECONNECT_JITTER",
                reason: "must be between 0 and 1".to_string(),
            });
        }

        let feeds = FeedSettings {
            quote_symbols: parse_env_symbols(env, "QUOTE_SYMBOLS", &defaults.feeds.quote_symbols),
            order_handshake: parse_env_optional(env, "ORDER_FEED_HANDSHAKE")
                .or(defaults.feeds.order_handshake),
            quote_handshake: parse_env_optional(env, "QUOTE_FEED_HANDSHAKE")
                .or(defaults.feeds.quote_handshake),
            order_max_attempts: parse_env(env, "ORDER_FEED_MAX_ATTEMPTS", backoff.max_attempts)?,
            quote_max_attempts: parse_env(env, "QUOTE_FEED_MAX_ATTEMPTS", backoff.max_attempts)?,
            notification_max_attempts: parse_env(
                env,
                "NOTIFICATION_FEED_MAX_ATTEMPTS",
                backoff.max_attempts,
            )?,
            watchdog: WatchdogConfig::new(
                parse_env_duration_secs(
                    env,
                    "FEED_PING_INTERVAL_SECS",
                    defaults.feeds.watchdog.ping_interval,
                )?,
                parse_env_duration_secs(
                    env,
                    "FEED_IDLE_TIMEOUT_SECS",
                    defaults.feeds.watchdog.idle_timeout,
                )?,
            ),
            backoff,
        };

        let polling = PollSettings {
            orders: parse_env_interval(env, "POLL_ORDERS_INTERVAL_MS", defaults.polling.orders)?,
            stats: parse_env_interval(env, "POLL_STATS_INTERVAL_MS", defaults.polling.stats)?,
            portfolio: parse_env_interval(
                env,
                "POLL_PORTFOLIO_INTERVAL_MS",
                defaults.polling.portfolio,
            )?,
            scanner: parse_env_interval(env, "POLL_SCANNER_INTERVAL_MS", defaults.polling.scanner)?,
            http_timeout: parse_env_interval(env, "HTTP_TIMEOUT_MS", defaults.polling.http_timeout)?,
        };

        let notifications = NotificationSettings {
            token: parse_env_optional(env, "NOTIFICATION_TOKEN"),
            capacity: parse_env_capacity(
                env,
                "NOTIFICATION_CAPACITY",
                defaults.notifications.capacity,
            )?,
            toast_lifetime: parse_env_duration_millis(
                env,
                "TOAST_LIFETIME_MS",
                defaults.notifications.toast_lifetime,
            )?,
            cache_path: parse_env_optional(env, "NOTIFICATION_CACHE_PATH").map(PathBuf::from),
            backfill_limit: parse_env(
                env,
                "NOTIFICATION_BACKFILL_LIMIT",
                defaults.notifications.backfill_limit,
            )?,
        };

        Ok(Self {
            services,
            feeds,
            polling,
            notifications,
            event_log_capacity: parse_env_capacity(
                env,
                "EVENT_LOG_CAPACITY",
                defaults.event_log_capacity,
            )?,
            snapshot_port: parse_env(env, "SNAPSHOT_PORT", defaults.snapshot_port)?,
        })
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Configuration error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Variable present but not parseable as the expected type.
    #[error("environment variable {key} has invalid value {value:?}")]
    InvalidValue {
        /// Variable name.
        key: &'static str,
        /// Raw value.
        value: String,
    },

    /// Variable parsed but violates a constraint.
    #[error("environment variable {key} {reason}")]
    Invalid {
        /// Variable name.
        key: &'static str,
        /// Violated constraint.
        reason: String,
    },
}

// =============================================================================
// Parsing Helpers
// =============================================================================

fn parse_env_optional(env: Lookup<'_>, key: &str) -> Option<String> {
    env(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_env<T: FromStr>(env: Lookup<'_>, key: &'static str, default: T) -> Result<T, ConfigError> {
    match parse_env_optional(env, key) {
        Some(raw) => raw
            .parse()
            .map_err(|_| ConfigError::InvalidValue { key, value: raw }),
        None => Ok(default),
    }
}

fn parse_env_duration_millis(
    env: Lookup<'_>,
    key: &'static str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    match parse_env_optional(env, key) {
        Some(_) => parse_env::<u64>(env, key, 0).map(Duration::from_millis),
        None => Ok(default),
    }
}

fn parse_env_duration_secs(
    env: Lookup<'_>,
    key: &'static str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    match parse_env_optional(env, key) {
        Some(_) => parse_env::<u64>(env, key, 0).map(Duration::from_secs),
        None => Ok(default),
    }
}

fn parse_env_interval(
    env: Lookup<'_>,
    key: &'static str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    let interval = parse_env_duration_millis(env, key, default)?;
    if interval.is_zero() {
        return Err(ConfigError::Invalid {
            key,
            reason: "must be greater than 0".to_string(),
        });
    }
    Ok(interval)
}

fn parse_env_capacity(
    env: Lookup<'_>,
    key: &'static str,
    default: usize,
) -> Result<usize, ConfigError> {
    let capacity = parse_env(env, key, default)?;
    if capacity == 0 {
        return Err(ConfigError::Invalid {
            key,
            reason: "must be greater than 0".to_string(),
        });
    }
    Ok(capacity)
}

fn parse_env_url(env: Lookup<'_>, key: &'static str, default: &Url) -> Result<Url, ConfigError> {
    let Some(raw) = parse_env_optional(env, key) else {
        return Ok(default.clone());
    };
    let url = Url::parse(&raw).map_err(|_| ConfigError::InvalidValue {
        key,
        value: raw.clone(),
    })?;
    if !matches!(url.scheme(), "http" | "https" | "ws" | "wss") || !url.has_host() {
        return Err(ConfigError::Invalid {
            key,
            reason: "must be an http(s) or ws(s) URL with a host".to_string(),
        });
    }
    Ok(url)
}

fn parse_env_symbols(env: Lookup<'_>, key: &str, default: &[Symbol]) -> Vec<Symbol> {
    let Some(raw) = parse_env_optional(env, key) else {
        return default.to_vec();
    };
    let mut symbols: Vec<Symbol> = Vec::new();
    for symbol in raw.split(',').map(|s| s.trim().to_ascii_uppercase()) {
        if !symbol.is_empty() && !symbols.contains(&symbol) {
            symbols.push(symbol);
        }
    }
    symbols
}
