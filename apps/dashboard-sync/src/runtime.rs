//! Sync Runtime
//!
//! Wires configuration, feeds, pollers and stores together. One
//! `FeedSupervisor` per logical feed, one `PollScheduler` per polled
//! resource, and a single writer per store:
//!
//! - order feed → event log and live order board
//! - quote feed for `SYM` → the `SYM` row of the quote table
//! - notification feed → `NotificationService`
//!
//! Consumers read `SyncRuntime::snapshot()`, a copy of every store.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use reqwest::Url;
use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{AckPort, NoOpNotificationCache, NotificationCachePort};
use crate::application::services::NotificationService;
use crate::domain::event_log::{BoundedLog, EventLogEntry};
use crate::domain::feed::{ConnectionState, FeedKind, HealthStatus};
use crate::domain::notification::{AckOutcome, NotificationSnapshot};
use crate::domain::order::{DEFAULT_TRACKED_ORDERS, OrderEvent, OrderTracker, TrackOutcome};
use crate::domain::quote::{QuoteEntry, QuoteRecord, QuoteTable, Symbol};
use crate::infrastructure::cache::FileNotificationCache;
use crate::infrastructure::config::SyncConfig;
use crate::infrastructure::feed::{
    BackoffConfig, BackoffScheduler, ConnectionConfig, FeedHandler, FeedOutcome, FeedStatus,
    FeedSupervisor,
};
use crate::infrastructure::metrics;
use crate::infrastructure::normalize::{
    carries_quote, normalize_order_list, normalize_order_message, normalize_quote_for,
};
use crate::infrastructure::poll::{PollError, PollScheduler, PolledResource, ResourceSnapshot};
use crate::infrastructure::rest::{NotificationApi, RestClient, RestError};

// =============================================================================
// Snapshot Types
// =============================================================================

/// Connection state of one feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedReport {
    /// Feed name (`orders`, `quotes:AAPL`, `notifications`).
    pub feed: String,
    /// Current state.
    pub state: ConnectionState,
}

/// Polled REST resources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolledSnapshots {
    /// Orders list.
    pub orders: ResourceSnapshot<Vec<OrderEvent>>,
    /// Account statistics.
    pub stats: ResourceSnapshot<Value>,
    /// Portfolio.
    pub portfolio: ResourceSnapshot<Value>,
    /// Scanner results.
    pub scanner: ResourceSnapshot<Value>,
}

impl PolledSnapshots {
    /// Number of resources whose last fetch failed.
    #[must_use]
    pub const fn stale_count(&self) -> usize {
        self.orders.is_stale() as usize
            + self.stats.is_stale() as usize
            + self.portfolio.is_stale() as usize
            + self.scanner.is_stale() as usize
    }
}

/// Copy of every store, for rendering.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardSnapshot {
    /// When the copy was taken.
    pub taken_at: DateTime<Utc>,
    /// Overall health.
    pub health: HealthStatus,
    /// Order feed events, newest first.
    pub events: Vec<EventLogEntry>,
    /// Latest state of each order seen on the order feed, newest first.
    pub live_orders: Vec<OrderEvent>,
    /// Symbol to latest quote.
    pub quotes: BTreeMap<Symbol, QuoteEntry>,
    /// Notification list, unread count and toasts.
    pub notifications: NotificationSnapshot,
    /// Connection state per feed.
    pub feeds: Vec<FeedReport>,
    /// Polled resources.
    pub polled: PolledSnapshots,
}

// =============================================================================
// Feed Handlers
// =============================================================================

/// Order feed writer: event log plus live order board.
struct OrderFeedHandler {
    log: Arc<RwLock<BoundedLog<EventLogEntry>>>,
    board: Arc<RwLock<OrderTracker>>,
}

impl FeedHandler for OrderFeedHandler {
    fn on_message(&mut self, message: Value) {
        let event = normalize_order_message(&message);
        if let Some(diagnostic) = &event.diagnostic {
            tracing::debug!(kind = %event.kind, diagnostic = %diagnostic, "Order feed message kept raw");
        }

        let entry = event.into_entry(Utc::now());
        if let Some(order) = entry.order()
            && self.board.write().apply(order.clone()) == TrackOutcome::Stale
        {
            tracing::debug!(
                order_id = %order.id,
                status = order.status.as_str(),
                "Ignoring out-of-order order event"
            );
        }

        if self.log.write().append(entry).is_some() {
            metrics::record_event_log_eviction();
        }
    }
}

/// Quote feed writer for one symbol.
struct QuoteFeedHandler {
    symbol: Symbol,
    table: Arc<RwLock<QuoteTable>>,
    cancel: CancellationToken,
}

impl FeedHandler for QuoteFeedHandler {
    fn on_message(&mut self, message: Value) {
        if !carries_quote(&message) {
            tracing::trace!(symbol = %self.symbol, "Ignoring quote feed control frame");
            return;
        }

        let record = normalize_quote_for(&message, &self.symbol, Utc::now());
        if let Some(symbol) = record.symbol()
            && !symbol.eq_ignore_ascii_case(&self.symbol)
        {
            tracing::trace!(feed = %self.symbol, symbol, "Ignoring quote for another symbol");
            return;
        }
        if let QuoteRecord::Unavailable { reason, .. } = &record {
            tracing::debug!(symbol = %self.symbol, reason = %reason, "Quote unavailable");
        }

        // Checked under the table lock so a retired feed cannot write after
        // its symbol has been dropped.
        let mut table = self.table.write();
        if self.cancel.is_cancelled() {
            return;
        }
        table.update(&self.symbol, record);
    }

    fn on_state(&mut self, state: &ConnectionState) {
        let mut table = self.table.write();
        if self.cancel.is_cancelled() {
            return;
        }
        table.set_connectivity(&self.symbol, state.is_open());
    }
}

/// Notification feed writer.
struct NotificationFeedHandler {
    service: Arc<NotificationService>,
}

impl FeedHandler for NotificationFeedHandler {
    fn on_message(&mut self, message: Value) {
        self.service.ingest(&message);
    }
}

// =============================================================================
// Runtime
// =============================================================================

struct FeedTask {
    kind: FeedKind,
    status: Arc<FeedStatus>,
    cancel: CancellationToken,
    task: JoinHandle<FeedOutcome>,
}

impl FeedTask {
    fn report(&self) -> FeedReport {
        FeedReport {
            feed: self.kind.to_string(),
            state: self.status.get(),
        }
    }

    async fn join(self) {
        match self.task.await {
            Ok(outcome) => tracing::debug!(feed = %self.kind, ?outcome, "Feed task finished"),
            Err(e) => tracing::warn!(feed = %self.kind, error = %e, "Feed task failed"),
        }
    }
}

#[derive(Default)]
struct FeedSet {
    orders: Option<FeedTask>,
    notifications: Option<FeedTask>,
    quotes: BTreeMap<Symbol, FeedTask>,
    retired: Vec<FeedTask>,
}

impl FeedSet {
    fn reports(&self) -> Vec<FeedReport> {
        self.orders
            .iter()
            .chain(self.quotes.values())
            .chain(self.notifications.iter())
            .map(FeedTask::report)
            .collect()
    }

    fn into_tasks(self) -> impl Iterator<Item = FeedTask> {
        self.orders
            .into_iter()
            .chain(self.quotes.into_values())
            .chain(self.notifications)
            .chain(self.retired)
    }
}

struct Resources {
    orders: Arc<PolledResource<Vec<OrderEvent>>>,
    stats: Arc<PolledResource<Value>>,
    portfolio: Arc<PolledResource<Value>>,
    scanner: Arc<PolledResource<Value>>,
}

impl Resources {
    fn new() -> Self {
        Self {
            orders: Arc::new(PolledResource::new()),
            stats: Arc::new(PolledResource::new()),
            portfolio: Arc::new(PolledResource::new()),
            scanner: Arc::new(PolledResource::new()),
        }
    }

    fn snapshot(&self) -> PolledSnapshots {
        PolledSnapshots {
            orders: self.orders.snapshot(),
            stats: self.stats.snapshot(),
            portfolio: self.portfolio.snapshot(),
            scanner: self.scanner.snapshot(),
        }
    }
}

/// Live data synchronization runtime.
pub struct SyncRuntime {
    config: SyncConfig,
    cancel: CancellationToken,
    started: AtomicBool,
    event_log: Arc<RwLock<BoundedLog<EventLogEntry>>>,
    order_board: Arc<RwLock<OrderTracker>>,
    quotes: Arc<RwLock<QuoteTable>>,
    notifications: Arc<NotificationService>,
    notification_api: Arc<NotificationApi>,
    rest: RestClient,
    resources: Resources,
    feeds: Mutex<FeedSet>,
    pollers: Mutex<Vec<PollScheduler>>,
}

impl SyncRuntime {
    /// Build the runtime. Nothing is connected until `start`.
    ///
    /// # Errors
    ///
    /// Returns `RestError::Client` if an HTTP client cannot be built.
    pub fn new(config: SyncConfig) -> Result<Self, RestError> {
        let rest = RestClient::new(config.polling.http_timeout, None)?;
        let notification_client = RestClient::new(
            config.polling.http_timeout,
            config.notifications.token.clone(),
        )?;
        let notification_api = Arc::new(NotificationApi::new(
            notification_client,
            config.services.notification_ack(),
            config.services.notification_list(),
        ));

        let cache: Arc<dyn NotificationCachePort> = match &config.notifications.cache_path {
            Some(path) => Arc::new(FileNotificationCache::new(path)),
            None => Arc::new(NoOpNotificationCache),
        };
        let notifications = Arc::new(NotificationService::new(
            config.notifications.capacity,
            config.notifications.toast_lifetime,
            Arc::clone(&notification_api) as Arc<dyn AckPort>,
            cache,
        ));

        Ok(Self {
            event_log: Arc::new(RwLock::new(BoundedLog::new(config.event_log_capacity))),
            order_board: Arc::new(RwLock::new(OrderTracker::new(DEFAULT_TRACKED_ORDERS))),
            quotes: Arc::new(RwLock::new(QuoteTable::new())),
            notifications,
            notification_api,
            rest,
            resources: Resources::new(),
            feeds: Mutex::new(FeedSet::default()),
            pollers: Mutex::new(Vec::new()),
            cancel: CancellationToken::new(),
            started: AtomicBool::new(false),
            config,
        })
    }

    /// Configuration in use.
    #[must_use]
    pub const fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Token cancelled on shutdown; other tasks can derive from it.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Notification service shared with the feed.
    #[must_use]
    pub fn notifications(&self) -> Arc<NotificationService> {
        Arc::clone(&self.notifications)
    }

    /// Load cached notifications, start every feed and poller, and request
    /// the notification backfill. Must be called from within a tokio
    /// runtime. Later calls are ignored.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            tracing::warn!("Sync runtime already started");
            return;
        }

        self.notifications.load_cache();
        self.spawn_backfill();

        {
            let mut feeds = self.feeds.lock();
            feeds.orders = Some(self.spawn_order_feed());
            for symbol in &self.config.feeds.quote_symbols {
                feeds
                    .quotes
                    .insert(symbol.clone(), self.spawn_quote_feed(symbol));
            }
            feeds.notifications = Some(self.spawn_notification_feed());
        }
        self.start_pollers();

        tracing::info!(
            symbols = ?self.config.feeds.quote_symbols,
            broker = %self.config.services.broker,
            market_data = %self.config.services.market_data,
            notification = %self.config.services.notification,
            "Sync runtime started"
        );
    }

    /// Replace the quote subscription set.
    ///
    /// Feeds for dropped symbols are stopped and their rows removed; feeds
    /// for new symbols are started. Symbols present in both sets keep their
    /// connection.
    pub fn resubscribe_quotes(&self, symbols: &[Symbol]) {
        let symbols = normalize_symbols(symbols);
        let mut feeds = self.feeds.lock();

        let dropped: Vec<Symbol> = feeds
            .quotes
            .keys()
            .filter(|symbol| !symbols.contains(symbol))
            .cloned()
            .collect();
        for symbol in &dropped {
            if let Some(task) = feeds.quotes.remove(symbol) {
                task.cancel.cancel();
                feeds.retired.push(task);
            }
        }
        feeds.retired.retain(|task| !task.task.is_finished());

        self.quotes.write().retain_symbols(&symbols);

        let mut added = Vec::new();
        for symbol in &symbols {
            if !feeds.quotes.contains_key(symbol) {
                let task = self.spawn_quote_feed(symbol);
                feeds.quotes.insert(symbol.clone(), task);
                added.push(symbol.clone());
            }
        }

        tracing::info!(?added, ?dropped, "Quote subscription updated");
    }

    /// Mark one notification read.
    pub fn acknowledge(&self, id: &str) -> AckOutcome {
        self.notifications.acknowledge(id)
    }

    /// Clear the notification list locally.
    pub fn clear_notifications(&self) {
        self.notifications.clear_all();
    }

    /// Connection state of every running feed.
    #[must_use]
    pub fn feed_reports(&self) -> Vec<FeedReport> {
        self.feeds.lock().reports()
    }

    /// Current health classification.
    #[must_use]
    pub fn health(&self) -> HealthStatus {
        let feeds = self.feed_reports();
        classify(&feeds, &self.resources.snapshot())
    }

    /// Copy of every store.
    #[must_use]
    pub fn snapshot(&self) -> DashboardSnapshot {
        let feeds = self.feed_reports();
        let polled = self.resources.snapshot();

        DashboardSnapshot {
            taken_at: Utc::now(),
            health: classify(&feeds, &polled),
            events: self.event_log.read().snapshot(),
            live_orders: self.order_board.read().snapshot(),
            quotes: self.quotes.read().snapshot(),
            notifications: self.notifications.snapshot(),
            feeds,
            polled,
        }
    }

    /// Cancel every task and wait up to `timeout` for them to finish.
    pub async fn shutdown(&self, timeout: Duration) {
        self.cancel.cancel();

        let feeds = std::mem::take(&mut *self.feeds.lock());
        let pollers = std::mem::take(&mut *self.pollers.lock());

        let join_all = async {
            for task in feeds.into_tasks() {
                task.join().await;
            }
            for poller in pollers {
                poller.join().await;
            }
            self.notifications.flush().await;
        };

        if tokio::time::timeout(timeout, join_all).await.is_err() {
            tracing::warn!(
                timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                "Shutdown timed out; abandoning remaining tasks"
            );
        } else {
            tracing::info!("Sync runtime stopped");
        }
    }

    // -------------------------------------------------------------------------
    // Feeds
    // -------------------------------------------------------------------------

    fn spawn_feed<H: FeedHandler>(
        &self,
        config: ConnectionConfig,
        backoff: BackoffConfig,
        handler: H,
        cancel: CancellationToken,
    ) -> FeedTask {
        let kind = config.kind.clone();
        let supervisor = FeedSupervisor::new(
            config.with_watchdog(self.config.feeds.watchdog.clone()),
            BackoffScheduler::new(backoff),
            handler,
            cancel.clone(),
        );
        let status = supervisor.status();
        let task = tokio::spawn(supervisor.run());

        FeedTask {
            kind,
            status,
            cancel,
            task,
        }
    }

    fn spawn_order_feed(&self) -> FeedTask {
        let config = with_handshake(
            ConnectionConfig::new(FeedKind::Orders, self.config.services.order_feed()),
            self.config.feeds.order_handshake.as_deref(),
        );
        let handler = OrderFeedHandler {
            log: Arc::clone(&self.event_log),
            board: Arc::clone(&self.order_board),
        };
        self.spawn_feed(
            config,
            self.config.feeds.order_backoff(),
            handler,
            self.cancel.child_token(),
        )
    }

    fn spawn_quote_feed(&self, symbol: &str) -> FeedTask {
        let config = with_handshake(
            ConnectionConfig::new(
                FeedKind::Quotes(symbol.to_string()),
                self.config.services.quote_feed(symbol),
            ),
            self.config.feeds.quote_handshake.as_deref(),
        );
        let cancel = self.cancel.child_token();
        let handler = QuoteFeedHandler {
            symbol: symbol.to_string(),
            table: Arc::clone(&self.quotes),
            cancel: cancel.clone(),
        };
        self.spawn_feed(config, self.config.feeds.quote_backoff(), handler, cancel)
    }

    fn spawn_notification_feed(&self) -> FeedTask {
        let config = ConnectionConfig::new(
            FeedKind::Notifications,
            self.config
                .services
                .notification_feed(self.config.notifications.token.as_deref()),
        );
        let handler = NotificationFeedHandler {
            service: Arc::clone(&self.notifications),
        };
        self.spawn_feed(
            config,
            self.config.feeds.notification_backoff(),
            handler,
            self.cancel.child_token(),
        )
    }

    fn spawn_backfill(&self) {
        let limit = self.config.notifications.backfill_limit;
        if limit == 0 {
            return;
        }

        let api = Arc::clone(&self.notification_api);
        let service = Arc::clone(&self.notifications);
        let cancel = self.cancel.child_token();
        tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {}
                result = api.fetch_recent(limit) => match result {
                    Ok(page) => {
                        let added = service.backfill(&page.notifications);
                        tracing::info!(added, has_more = page.has_more, "Notification backfill complete");
                    }
                    Err(e) => tracing::warn!(error = %e, "Notification backfill failed"),
                },
            }
        });
    }

    // -------------------------------------------------------------------------
    // Polling
    // -------------------------------------------------------------------------

    fn start_pollers(&self) {
        let services = &self.config.services;
        let polling = &self.config.polling;

        let client = self.rest.clone();
        let orders_url = services.orders();
        let orders = PollScheduler::start(
            "orders",
            move || {
                let client = client.clone();
                let url = orders_url.clone();
                async move {
                    let body: Value = client.get_json(&url).await?;
                    orders_from_body(&body)
                }
            },
            polling.orders,
            Arc::clone(&self.resources.orders),
            &self.cancel,
        );

        let mut pollers = self.pollers.lock();
        pollers.push(orders);
        pollers.push(self.poll_json("stats", services.stats(), polling.stats, &self.resources.stats));
        pollers.push(self.poll_json(
            "portfolio",
            services.portfolio(),
            polling.portfolio,
            &self.resources.portfolio,
        ));
        pollers.push(self.poll_json(
            "scanner",
            services.scanner(),
            polling.scanner,
            &self.resources.scanner,
        ));
    }

    fn poll_json(
        &self,
        name: &'static str,
        url: Url,
        interval: Duration,
        resource: &Arc<PolledResource<Value>>,
    ) -> PollScheduler {
        let client = self.rest.clone();
        PollScheduler::start(
            name,
            move || {
                let client = client.clone();
                let url = url.clone();
                async move {
                    Ok::<_, PollError>(client.get_json::<Value>(&url).await?)
                }
            },
            interval,
            Arc::clone(resource),
            &self.cancel,
        )
    }
}

impl std::fmt::Debug for SyncRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncRuntime")
            .field("config", &self.config)
            .field("started", &self.started.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl Drop for SyncRuntime {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn with_handshake(config: ConnectionConfig, handshake: Option<&str>) -> ConnectionConfig {
    match handshake {
        Some(token) => config.with_handshake(token),
        None => config,
    }
}

fn classify(feeds: &[FeedReport], polled: &PolledSnapshots) -> HealthStatus {
    let open = feeds.iter().filter(|report| report.state.is_open()).count();
    HealthStatus::classify(open, feeds.len(), polled.stale_count())
}

fn orders_from_body(body: &Value) -> Result<Vec<OrderEvent>, PollError> {
    let is_list = body.is_array() || body.get("orders").is_some_and(Value::is_array);
    if !is_list {
        return Err(PollError::Shape(
            "expected an array or {\"orders\": [...]}".to_string(),
        ));
    }
    Ok(normalize_order_list(body))
}

fn normalize_symbols(symbols: &[Symbol]) -> Vec<Symbol> {
    let mut normalized: Vec<Symbol> = Vec::new();
    for symbol in symbols.iter().map(|s| s.trim().to_ascii_uppercase()) {
        if !symbol.is_empty() && !normalized.contains(&symbol) {
            normalized.push(symbol);
        }
    }
    normalized
}
