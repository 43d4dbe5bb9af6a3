//! Feed Supervisor
//!
//! Owner of one logical feed. It opens a fresh `StreamConnection` for each
//! attempt and hands decoded messages, in order, to the feed's single
//! writer (`FeedHandler`). After every close it asks the backoff scheduler
//! whether and when to retry. It publishes `ConnectionState` for snapshots.
//!
//! Events from any connection other than the current one are dropped, so a
//! late message from a closed connection can never reach a store.

use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::backoff::{BackoffScheduler, ReconnectDecision};
use super::connection::{ConnectionConfig, ConnectionEvent, ConnectionEventKind, StreamConnection};
use crate::domain::feed::{ConnectionState, ConnectionStatus, FeedKind};
use crate::infrastructure::metrics;

// =============================================================================
// Handler
// =============================================================================

/// Single writer fed by one feed.
pub trait FeedHandler: Send + 'static {
    /// Handle one decoded message.
    fn on_message(&mut self, message: Value);

    /// Observe a connection state change.
    fn on_state(&mut self, _state: &ConnectionState) {}
}

impl<F> FeedHandler for F
where
    F: FnMut(Value) + Send + 'static,
{
    fn on_message(&mut self, message: Value) {
        self(message);
    }
}

// =============================================================================
// Shared Status
// =============================================================================

/// Connection state of one feed, readable from anywhere.
#[derive(Debug, Default)]
pub struct FeedStatus {
    state: RwLock<ConnectionState>,
}

impl FeedStatus {
    /// Create a closed status.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the current state.
    #[must_use]
    pub fn get(&self) -> ConnectionState {
        self.state.read().clone()
    }

    fn update(&self, f: impl FnOnce(&mut ConnectionState)) -> ConnectionState {
        let mut state = self.state.write();
        f(&mut state);
        state.clone()
    }
}

/// Why a supervisor stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedOutcome {
    /// Shut down by its owner.
    Cancelled,
    /// Backoff ceiling reached; no further reconnects.
    GaveUp {
        /// Consecutive closes observed.
        attempts: u32,
    },
}

// =============================================================================
// Supervisor
// =============================================================================

enum PumpEnd {
    Cancelled,
    Closed(String),
}

/// Reconnecting owner of one feed.
pub struct FeedSupervisor<H> {
    config: ConnectionConfig,
    backoff: BackoffScheduler,
    handler: H,
    status: Arc<FeedStatus>,
    cancel: CancellationToken,
}

impl<H: FeedHandler> FeedSupervisor<H> {
    /// Create a supervisor.
    #[must_use]
    pub fn new(
        config: ConnectionConfig,
        backoff: BackoffScheduler,
        handler: H,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            backoff,
            handler,
            status: Arc::new(FeedStatus::new()),
            cancel,
        }
    }

    /// Shared status handle.
    #[must_use]
    pub fn status(&self) -> Arc<FeedStatus> {
        Arc::clone(&self.status)
    }

    /// Feed being supervised.
    #[must_use]
    pub const fn kind(&self) -> &FeedKind {
        &self.config.kind
    }

    /// Keep the feed connected until cancelled or the backoff gives up.
    pub async fn run(mut self) -> FeedOutcome {
        let mut generation: u64 = 0;
        let mut attempt: u32 = 0;

        loop {
            generation += 1;
            self.publish(|state| {
                state.status = ConnectionStatus::Connecting;
            });

            let mut connection = StreamConnection::new(self.config.clone(), generation);
            let reason = match connection.open() {
                Ok(events) => match self.pump(generation, events, &mut attempt).await {
                    PumpEnd::Cancelled => {
                        connection.close();
                        self.publish(|state| state.status = ConnectionStatus::Closed);
                        tracing::info!(feed = %self.config.kind, "Feed stopped");
                        return FeedOutcome::Cancelled;
                    }
                    PumpEnd::Closed(reason) => reason,
                },
                Err(e) => e.to_string(),
            };
            connection.close();

            match self.backoff.on_close(attempt) {
                ReconnectDecision::Retry { delay, attempt: next } => {
                    attempt = next;
                    self.publish(|state| {
                        state.status = ConnectionStatus::Closed;
                        state.attempt = next;
                        state.last_error = Some(reason.clone());
                    });
                    metrics::record_reconnect(&self.config.kind);
                    tracing::info!(
                        feed = %self.config.kind,
                        attempt = next,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        reason = %reason,
                        "Reconnecting feed"
                    );

                    tokio::select! {
                        () = self.cancel.cancelled() => {
                            tracing::info!(feed = %self.config.kind, "Feed stopped during backoff");
                            return FeedOutcome::Cancelled;
                        }
                        () = tokio::time::sleep(delay) => {}
                    }
                }
                ReconnectDecision::GiveUp { attempts } => {
                    self.publish(|state| {
                        state.status = ConnectionStatus::Closed;
                        state.attempt = attempts;
                        state.gave_up = true;
                        state.last_error = Some(reason.clone());
                    });
                    metrics::record_feed_gave_up(&self.config.kind);
                    tracing::error!(
                        feed = %self.config.kind,
                        attempts,
                        reason = %reason,
                        "Feed reconnect attempts exhausted; giving up"
                    );
                    return FeedOutcome::GaveUp { attempts };
                }
            }
        }
    }

    /// Deliver events from the current connection until it closes.
    async fn pump(
        &mut self,
        generation: u64,
        mut events: mpsc::Receiver<ConnectionEvent>,
        attempt: &mut u32,
    ) -> PumpEnd {
        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return PumpEnd::Cancelled,
                event = events.recv() => {
                    let Some(event) = event else {
                        return PumpEnd::Closed("event channel closed".to_string());
                    };
                    if event.generation != generation {
                        tracing::trace!(
                            feed = %self.config.kind,
                            stale = event.generation,
                            current = generation,
                            "Dropping event from stale connection"
                        );
                        continue;
                    }

                    match event.kind {
                        ConnectionEventKind::Opened => {
                            *attempt = 0;
                            self.publish(|state| {
                                state.status = ConnectionStatus::Open;
                                state.attempt = 0;
                                state.last_error = None;
                            });
                        }
                        ConnectionEventKind::Message(message) => self.handler.on_message(message),
                        ConnectionEventKind::Closed { reason } => return PumpEnd::Closed(reason),
                    }
                }
            }
        }
    }

    fn publish(&mut self, f: impl FnOnce(&mut ConnectionState)) {
        let state = self.status.update(f);
        self.handler.on_state(&state);
    }
}
