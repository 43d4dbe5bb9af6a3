//! Idle Watchdog
//!
//! Detects a transport that stays open but stops delivering. While enabled
//! the watchdog asks the reader task to ping on a fixed interval and
//! reports the connection idle once no inbound frame has arrived within the
//! idle timeout. The reader then closes the connection and the supervisor
//! reconnects through the backoff scheduler.
//!
//! Disabled by default (`idle_timeout` of zero).

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Configuration for idle detection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchdogConfig {
    /// Interval between keepalive pings.
    pub ping_interval: Duration,
    /// Silence after which the connection is considered stalled (zero disables).
    pub idle_timeout: Duration,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(15),
            idle_timeout: Duration::ZERO,
        }
    }
}

impl WatchdogConfig {
    /// Create a configuration.
    #[must_use]
    pub const fn new(ping_interval: Duration, idle_timeout: Duration) -> Self {
        Self {
            ping_interval,
            idle_timeout,
        }
    }

    /// Whether a watchdog should run at all.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        !self.idle_timeout.is_zero()
    }

    fn tick_interval(&self) -> Duration {
        let interval = self.ping_interval.min(self.idle_timeout);
        if interval.is_zero() {
            self.idle_timeout
        } else {
            interval
        }
    }
}

/// Events emitted by the watchdog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchdogEvent {
    /// Send a keepalive ping.
    SendPing,
    /// Nothing received for longer than the idle timeout.
    Idle {
        /// How long the connection has been silent.
        silent_for: Duration,
    },
}

/// Last-activity clock shared between the reader task and the watchdog.
#[derive(Debug)]
pub struct ActivityState {
    last_activity: RwLock<Instant>,
}

impl Default for ActivityState {
    fn default() -> Self {
        Self::new()
    }
}

impl ActivityState {
    /// Start the clock now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            last_activity: RwLock::new(Instant::now()),
        }
    }

    /// Record an inbound frame.
    pub fn record(&self) {
        *self.last_activity.write() = Instant::now();
    }

    /// Time since the last inbound frame.
    #[must_use]
    pub fn silent_for(&self) -> Duration {
        self.last_activity.read().elapsed()
    }
}

/// Background task watching one connection.
pub struct IdleWatchdog {
    config: WatchdogConfig,
    state: Arc<ActivityState>,
    event_tx: mpsc::Sender<WatchdogEvent>,
    cancel: CancellationToken,
}

impl IdleWatchdog {
    /// Create a watchdog.
    #[must_use]
    pub const fn new(
        config: WatchdogConfig,
        state: Arc<ActivityState>,
        event_tx: mpsc::Sender<WatchdogEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            state,
            event_tx,
            cancel,
        }
    }

    /// Run until cancelled or the connection goes idle.
    pub async fn run(self) {
        if !self.config.is_enabled() {
            return;
        }

        let mut interval = tokio::time::interval(self.config.tick_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick completes immediately; nothing to check yet.
        interval.tick().await;

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::debug!("Idle watchdog cancelled");
                    break;
                }
                _ = interval.tick() => {
                    if self.check_and_ping().await.is_err() {
                        break;
                    }
                }
            }
        }
    }

    /// Returns `Err(())` when the loop should exit.
    async fn check_and_ping(&self) -> Result<(), ()> {
        let silent_for = self.state.silent_for();
        if silent_for > self.config.idle_timeout {
            tracing::warn!(
                silent_ms = u64::try_from(silent_for.as_millis()).unwrap_or(u64::MAX),
                timeout_ms = u64::try_from(self.config.idle_timeout.as_millis()).unwrap_or(u64::MAX),
                "Feed idle timeout"
            );
            let _ = self.event_tx.send(WatchdogEvent::Idle { silent_for }).await;
            return Err(());
        }

        if self.event_tx.send(WatchdogEvent::SendPing).await.is_err() {
            tracing::debug!("Watchdog channel closed");
            return Err(());
        }
        Ok(())
    }
}
