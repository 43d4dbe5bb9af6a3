//! Stream Connection
//!
//! Owns exactly one WebSocket transport to one feed URL. Opening spawns a
//! dedicated reader task; everything the transport produces comes back to
//! the owner as `ConnectionEvent`s on an mpsc channel, in delivery order.
//!
//! A connection never reconnects itself. On any close it emits `Closed` and
//! exits; the owning `FeedSupervisor` decides what happens next.
//!
//! # Protocol
//!
//! - On open, the configured handshake token (if any) is sent once as a
//!   text frame.
//! - Text and binary frames are decoded as JSON. A frame that fails to
//!   decode is logged and dropped; the connection keeps reading.
//! - Pings are answered with pongs.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use super::codec::JsonCodec;
use super::watchdog::{ActivityState, IdleWatchdog, WatchdogConfig, WatchdogEvent};
use crate::domain::feed::{ConnectionStatus, FeedKind};
use crate::infrastructure::metrics;

/// Buffer between the reader task and the owner.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

// =============================================================================
// Error Type
// =============================================================================

/// Errors raised by a stream connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// `open` was called on a connection that was already opened.
    #[error("connection already opened")]
    AlreadyOpened,

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Handshake token could not be sent.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// No inbound frame within the idle timeout.
    #[error("idle timeout after {0:?}")]
    IdleTimeout(std::time::Duration),

    /// Server sent a close frame.
    #[error("server closed the connection")]
    ServerClosed,

    /// Stream ended without a close frame.
    #[error("stream ended")]
    StreamEnded,

    /// Owner stopped listening.
    #[error("event channel closed")]
    ChannelClosed,
}

// =============================================================================
// Events
// =============================================================================

/// What happened on the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEventKind {
    /// Transport open and handshake sent.
    Opened,
    /// One decoded inbound message.
    Message(Value),
    /// Transport closed; the connection is finished.
    Closed {
        /// Human-readable close reason.
        reason: String,
    },
}

/// Event tagged with the connection generation that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionEvent {
    /// Generation of the producing connection.
    pub generation: u64,
    /// Event payload.
    pub kind: ConnectionEventKind,
}

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for one feed connection.
#[derive(Clone)]
pub struct ConnectionConfig {
    /// Feed this connection serves.
    pub kind: FeedKind,
    /// WebSocket URL.
    pub url: String,
    /// Token sent once after the transport opens.
    pub handshake: Option<String>,
    /// Idle detection.
    pub watchdog: WatchdogConfig,
}

impl ConnectionConfig {
    /// Create a configuration without handshake or watchdog.
    #[must_use]
    pub fn new(kind: FeedKind, url: impl Into<String>) -> Self {
        Self {
            kind,
            url: url.into(),
            handshake: None,
            watchdog: WatchdogConfig::default(),
        }
    }

    /// Send `token` after opening.
    #[must_use]
    pub fn with_handshake(mut self, token: impl Into<String>) -> Self {
        self.handshake = Some(token.into());
        self
    }

    /// Use the given idle watchdog settings.
    #[must_use]
    pub const fn with_watchdog(mut self, watchdog: WatchdogConfig) -> Self {
        self.watchdog = watchdog;
        self
    }

    /// URL safe to log: query, fragment and credentials removed.
    #[must_use]
    pub fn display_url(&self) -> String {
        redact_url(&self.url)
    }
}

impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("kind", &self.kind)
            .field("url", &self.display_url())
            .field("handshake", &self.handshake.as_ref().map(|_| "[REDACTED]"))
            .field("watchdog", &self.watchdog)
            .finish()
    }
}

/// Strip everything from `url` that can carry a secret.
fn redact_url(url: &str) -> String {
    match reqwest::Url::parse(url) {
        Ok(mut parsed) => {
            parsed.set_query(None);
            parsed.set_fragment(None);
            let _ = parsed.set_username("");
            let _ = parsed.set_password(None);
            parsed.to_string()
        }
        Err(_) => "[unparseable url]".to_string(),
    }
}

// =============================================================================
// Stream Connection
// =============================================================================

/// One transport to one feed.
///
/// # Example
///
/// ```rust,no_run
/// use dashboard_sync::domain::feed::FeedKind;
/// use dashboard_sync::infrastructure::feed::connection::{
///     ConnectionConfig, ConnectionEventKind, StreamConnection,
/// };
///
/// async fn example() {
///     let config = ConnectionConfig::new(FeedKind::Orders, "ws://localhost:8000/ws")
///         .with_handshake("hello");
///     let mut connection = StreamConnection::new(config, 1);
///     let mut events = connection.open().expect("fresh connection");
///
///     while let Some(event) = events.recv().await {
///         match event.kind {
///             ConnectionEventKind::Message(value) => println!("{value}"),
///             ConnectionEventKind::Closed { .. } => break,
///             ConnectionEventKind::Opened => {}
///         }
///     }
///     connection.close();
/// }
/// ```
pub struct StreamConnection {
    config: ConnectionConfig,
    generation: u64,
    status: Arc<RwLock<ConnectionStatus>>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl StreamConnection {
    /// Create an unopened connection.
    #[must_use]
    pub fn new(config: ConnectionConfig, generation: u64) -> Self {
        Self {
            config,
            generation,
            status: Arc::new(RwLock::new(ConnectionStatus::Closed)),
            cancel: CancellationToken::new(),
            task: None,
        }
    }

    /// Spawn the reader task and return its event stream.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionError::AlreadyOpened` on a second call.
    pub fn open(&mut self) -> Result<mpsc::Receiver<ConnectionEvent>, ConnectionError> {
        if self.task.is_some() || self.cancel.is_cancelled() {
            return Err(ConnectionError::AlreadyOpened);
        }

        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        *self.status.write() = ConnectionStatus::Connecting;

        let reader = Reader {
            config: self.config.clone(),
            emitter: Emitter {
                generation: self.generation,
                event_tx,
                cancel: self.cancel.clone(),
            },
            status: Arc::clone(&self.status),
            codec: JsonCodec::new(),
        };
        self.task = Some(tokio::spawn(reader.run()));
        Ok(event_rx)
    }

    /// Stop the transport.
    ///
    /// The reader produces nothing after this returns. Events already
    /// queued on the receiver belong to a dead connection and are the
    /// owner's to discard.
    pub fn close(&mut self) {
        self.cancel.cancel();
        *self.status.write() = ConnectionStatus::Closed;
    }

    /// Current transport status.
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        *self.status.read()
    }

    /// Generation tag carried by this connection's events.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Feed served by this connection.
    #[must_use]
    pub const fn kind(&self) -> &FeedKind {
        &self.config.kind
    }
}

impl Drop for StreamConnection {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// =============================================================================
// Reader Task
// =============================================================================

struct Emitter {
    generation: u64,
    event_tx: mpsc::Sender<ConnectionEvent>,
    cancel: CancellationToken,
}

impl Emitter {
    /// Deliver an event unless the connection has been closed.
    async fn emit(&self, kind: ConnectionEventKind) -> Result<(), ConnectionError> {
        let event = ConnectionEvent {
            generation: self.generation,
            kind,
        };
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(ConnectionError::ChannelClosed),
            sent = self.event_tx.send(event) => sent.map_err(|_| ConnectionError::ChannelClosed),
        }
    }
}

struct Reader {
    config: ConnectionConfig,
    emitter: Emitter,
    status: Arc<RwLock<ConnectionStatus>>,
    codec: JsonCodec,
}

impl Reader {
    async fn run(self) {
        let result = tokio::select! {
            biased;
            () = self.emitter.cancel.cancelled() => Ok(()),
            result = self.connect_and_read() => result,
        };

        *self.status.write() = ConnectionStatus::Closed;
        metrics::set_feed_open(&self.config.kind, false);

        if self.emitter.cancel.is_cancelled() {
            tracing::debug!(feed = %self.config.kind, "Connection closed by owner");
            return;
        }

        let reason = match result {
            Ok(()) => "closed".to_string(),
            Err(ConnectionError::ChannelClosed) => return,
            Err(e) => e.to_string(),
        };
        tracing::warn!(feed = %self.config.kind, reason = %reason, "Feed connection closed");
        let _ = self.emitter.emit(ConnectionEventKind::Closed { reason }).await;
    }

    async fn connect_and_read(&self) -> Result<(), ConnectionError> {
        tracing::info!(
            feed = %self.config.kind,
            url = %self.config.display_url(),
            "Connecting to feed"
        );

        let (ws_stream, _response) = tokio_tungstenite::connect_async(&self.config.url).await?;
        let (mut write, mut read) = ws_stream.split();

        if let Some(token) = &self.config.handshake {
            write
                .send(Message::Text(token.clone().into()))
                .await
                .map_err(|e| ConnectionError::Handshake(e.to_string()))?;
        }

        *self.status.write() = ConnectionStatus::Open;
        metrics::set_feed_open(&self.config.kind, true);
        tracing::info!(feed = %self.config.kind, "Feed connected");
        self.emitter.emit(ConnectionEventKind::Opened).await?;

        // Set up idle watchdog
        let activity = Arc::new(ActivityState::new());
        let (watchdog_tx, mut watchdog_rx) = mpsc::channel::<WatchdogEvent>(4);
        let watchdog_cancel = self.emitter.cancel.child_token();
        let _watchdog_guard = watchdog_cancel.clone().drop_guard();
        if self.config.watchdog.is_enabled() {
            tokio::spawn(
                IdleWatchdog::new(
                    self.config.watchdog.clone(),
                    Arc::clone(&activity),
                    watchdog_tx,
                    watchdog_cancel,
                )
                .run(),
            );
        } else {
            drop(watchdog_tx);
        }

        loop {
            tokio::select! {
                Some(event) = watchdog_rx.recv() => match event {
                    WatchdogEvent::SendPing => {
                        write.send(Message::Ping(Vec::new().into())).await?;
                    }
                    WatchdogEvent::Idle { silent_for } => {
                        let _ = write.send(Message::Close(None)).await;
                        return Err(ConnectionError::IdleTimeout(silent_for));
                    }
                },
                msg = read.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        activity.record();
                        self.handle_frame(self.codec.decode(text.as_str())).await?;
                    }
                    Some(Ok(Message::Binary(bytes))) => {
                        activity.record();
                        self.handle_frame(self.codec.decode_binary(&bytes)).await?;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        activity.record();
                        write.send(Message::Pong(data)).await?;
                    }
                    Some(Ok(Message::Pong(_))) => {
                        activity.record();
                    }
                    Some(Ok(Message::Close(frame))) => {
                        tracing::info!(feed = %self.config.kind, frame = ?frame, "Server sent close frame");
                        return Err(ConnectionError::ServerClosed);
                    }
                    Some(Ok(Message::Frame(_))) => {}
                    Some(Err(e)) => return Err(e.into()),
                    None => return Err(ConnectionError::StreamEnded),
                },
            }
        }
    }

    async fn handle_frame(
        &self,
        decoded: Result<Value, super::codec::CodecError>,
    ) -> Result<(), ConnectionError> {
        match decoded {
            Ok(value) => {
                metrics::record_message_received(&self.config.kind);
                self.emitter.emit(ConnectionEventKind::Message(value)).await
            }
            Err(e) => {
                metrics::record_malformed_message(&self.config.kind);
                tracing::warn!(feed = %self.config.kind, error = %e, "Dropping malformed message");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn config_builder() {
        let config = ConnectionConfig::new(FeedKind::Orders, "ws://localhost:8000/ws")
            .with_handshake("hello")
            .with_watchdog(WatchdogConfig::new(
                Duration::from_secs(5),
                Duration::from_secs(30),
            ));

        assert_eq!(config.handshake.as_deref(), Some("hello"));
        assert!(config.watchdog.is_enabled());
    }

    #[test]
    fn debug_hides_query_token_and_handshake() {
        let config = ConnectionConfig::new(
            FeedKind::Notifications,
            "ws://user:pw@127.0.0.1:9/v1/ws?token=s3cret-token",
        )
        .with_handshake("handshake-secret");

        let debug = format!("{config:?}");

        assert!(!debug.contains("s3cret-token"));
        assert!(!debug.contains("handshake-secret"));
        assert!(!debug.contains("pw@"));
        assert!(debug.contains("ws://127.0.0.1:9/v1/ws"));
    }

    #[test]
    fn display_url_keeps_path() {
        let config = ConnectionConfig::new(
            FeedKind::Quotes("AAPL".to_string()),
            "wss://data.example.com/ws/nbbo?symbol=AAPL",
        );
        assert_eq!(config.display_url(), "wss://data.example.com/ws/nbbo");
        assert_eq!(
            ConnectionConfig::new(FeedKind::Orders, "not a url").display_url(),
            "[unparseable url]"
        );
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<parking_lot::Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn connecting_never_logs_feed_token() {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let mut connection = StreamConnection::new(
            ConnectionConfig::new(
                FeedKind::Notifications,
                "ws://127.0.0.1:1/v1/ws?token=s3cret-token",
            )
            .with_handshake("s3cret-token"),
            1,
        );
        let mut events = connection.open().unwrap();
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("should receive event")
            .expect("channel should not close first");
        assert!(matches!(event.kind, ConnectionEventKind::Closed { .. }));

        let output = String::from_utf8(logs.0.lock().clone()).unwrap();
        assert!(output.contains("Connecting to feed"), "logs: {output}");
        assert!(output.contains("ws://127.0.0.1:1/v1/ws"));
        assert!(!output.contains("s3cret-token"), "logs: {output}");
    }

    #[test]
    fn new_connection_is_closed() {
        let connection =
            StreamConnection::new(ConnectionConfig::new(FeedKind::Notifications, "ws://x"), 7);
        assert_eq!(connection.status(), ConnectionStatus::Closed);
        assert_eq!(connection.generation(), 7);
        assert_eq!(connection.kind(), &FeedKind::Notifications);
    }

    #[tokio::test]
    async fn open_twice_fails() {
        let mut connection = StreamConnection::new(
            ConnectionConfig::new(FeedKind::Orders, "ws://127.0.0.1:1/ws"),
            1,
        );
        let _events = connection.open().unwrap();

        assert!(matches!(
            connection.open(),
            Err(ConnectionError::AlreadyOpened)
        ));
        connection.close();
    }

    #[tokio::test]
    async fn refused_connection_reports_closed() {
        let mut connection = StreamConnection::new(
            ConnectionConfig::new(FeedKind::Orders, "ws://127.0.0.1:1/ws"),
            3,
        );
        let mut events = connection.open().unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("should receive event")
            .expect("channel should not close first");

        assert_eq!(event.generation, 3);
        assert!(matches!(event.kind, ConnectionEventKind::Closed { .. }));
        assert_eq!(connection.status(), ConnectionStatus::Closed);
    }

    #[tokio::test]
    async fn closed_connection_emits_nothing() {
        let mut connection = StreamConnection::new(
            ConnectionConfig::new(FeedKind::Orders, "ws://127.0.0.1:1/ws"),
            1,
        );
        let mut events = connection.open().unwrap();
        connection.close();

        let next = tokio::time::timeout(Duration::from_secs(2), events.recv()).await;
        assert!(matches!(next, Ok(None)), "no event after close: {next:?}");
    }
}
