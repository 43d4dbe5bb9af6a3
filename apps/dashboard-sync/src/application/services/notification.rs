//! Notification Service
//!
//! Owns the `NotificationCenter` and is its only writer. Adds what the
//! domain state machine leaves out: payload normalization, toast timers,
//! upstream acknowledgement through `AckPort`, and persistence through
//! `NotificationCachePort`.
//!
//! Constructed once by the runtime and shared by `Arc`.
//!
//! # Persistence
//!
//! Each mutation snapshots the list under the same write guard and hands it
//! to a write-behind task. The task stores only the newest snapshot on the
//! blocking pool, so the cache always ends on the latest list and disk I/O
//! never runs on the executor.

use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::watch;

use crate::application::ports::{AckPort, NotificationCachePort};
use crate::domain::notification::{
    AckOutcome, IngestOutcome, Notification, NotificationCenter, NotificationSnapshot,
};
use crate::infrastructure::metrics::{self, NotificationOutcome};
use crate::infrastructure::normalize::{NotificationInput, normalize_notification};

/// What happened to one message from the notification feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// New notification added and toasted.
    Added,
    /// Already seen; dropped.
    Duplicate,
    /// Keepalive.
    Heartbeat,
    /// Not a notification; dropped.
    Ignored,
}

/// List snapshot waiting to be stored.
#[derive(Debug, Clone)]
struct CacheWrite {
    version: u64,
    items: Arc<[Notification]>,
}

/// Notification delivery service.
pub struct NotificationService {
    center: RwLock<NotificationCenter>,
    toast_lifetime: Duration,
    ack: Arc<dyn AckPort>,
    cache: Arc<dyn NotificationCachePort>,
    pending: watch::Sender<CacheWrite>,
    stored: Arc<watch::Sender<u64>>,
    background_writer: bool,
}

impl NotificationService {
    /// Create a service with an empty center.
    ///
    /// Inside a tokio runtime the cache is written by a background task.
    /// Without one, writes happen inline.
    #[must_use]
    pub fn new(
        capacity: usize,
        toast_lifetime: Duration,
        ack: Arc<dyn AckPort>,
        cache: Arc<dyn NotificationCachePort>,
    ) -> Self {
        let (pending, pending_rx) = watch::channel(CacheWrite {
            version: 0,
            items: Arc::from(Vec::new()),
        });
        let stored = Arc::new(watch::Sender::new(0));

        let background_writer = match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(write_behind(
                    Arc::clone(&cache),
                    pending_rx,
                    Arc::clone(&stored),
                ));
                true
            }
            Err(_) => false,
        };

        Self {
            center: RwLock::new(NotificationCenter::new(capacity, toast_lifetime)),
            toast_lifetime,
            ack,
            cache,
            pending,
            stored,
            background_writer,
        }
    }

    /// Merge the cached list into the center. Returns how many were added.
    ///
    /// A corrupt or unreadable cache is logged and skipped.
    pub fn load_cache(&self) -> usize {
        match self.cache.load() {
            Ok(cached) => {
                let added = self.center.write().restore(cached);
                tracing::info!(restored = added, "Loaded notification cache");
                added
            }
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring unreadable notification cache");
                0
            }
        }
    }

    /// Handle one message from the notification feed.
    ///
    /// Must be called from within a tokio runtime; the toast's expiry is
    /// scheduled on a timer.
    pub fn ingest(self: &Arc<Self>, value: &Value) -> Delivery {
        let now = Utc::now();
        let notification = match normalize_notification(value, now) {
            NotificationInput::Notification(notification) => notification,
            NotificationInput::Heartbeat => {
                tracing::trace!("Notification feed heartbeat");
                return Delivery::Heartbeat;
            }
            NotificationInput::Unrecognized { reason } => {
                metrics::record_notification(NotificationOutcome::Unrecognized);
                tracing::debug!(reason = %reason, "Ignoring notification feed message");
                return Delivery::Ignored;
            }
        };

        let id = notification.id.clone();
        let outcome = {
            let mut center = self.center.write();
            let outcome = center.ingest(notification, now);
            if matches!(outcome, IngestOutcome::Added { .. }) {
                self.persist(&center);
            }
            outcome
        };
        match outcome {
            IngestOutcome::Added { toast_id } => {
                metrics::record_notification(NotificationOutcome::Added);
                tracing::debug!(notification_id = %id, "Notification received");
                if let Some(toast_id) = toast_id {
                    self.schedule_toast_expiry(toast_id);
                }
                Delivery::Added
            }
            IngestOutcome::Duplicate => {
                metrics::record_notification(NotificationOutcome::Duplicate);
                tracing::debug!(notification_id = %id, "Dropping duplicate notification");
                Delivery::Duplicate
            }
        }
    }

    /// Merge notifications fetched at startup. No toasts are raised.
    ///
    /// Returns how many were new.
    pub fn backfill(&self, values: &[Value]) -> usize {
        let now = Utc::now();
        let notifications: Vec<Notification> = values
            .iter()
            .filter_map(|value| match normalize_notification(value, now) {
                NotificationInput::Notification(notification) => Some(notification),
                NotificationInput::Heartbeat | NotificationInput::Unrecognized { .. } => None,
            })
            .collect();

        let mut center = self.center.write();
        let added = center.restore(notifications);
        if added > 0 {
            self.persist(&center);
        }
        added
    }

    /// Mark one notification read and tell the server, once.
    ///
    /// Must be called from within a tokio runtime when the outcome is
    /// `Acknowledged`.
    pub fn acknowledge(&self, id: &str) -> AckOutcome {
        let outcome = {
            let mut center = self.center.write();
            let outcome = center.acknowledge(id);
            if outcome == AckOutcome::Acknowledged {
                self.persist(&center);
            }
            outcome
        };
        if outcome == AckOutcome::Acknowledged {
            self.send_ack(id.to_string());
        }
        outcome
    }

    /// Drop every notification locally. Nothing is sent upstream.
    pub fn clear_all(&self) {
        let mut center = self.center.write();
        center.clear_all();
        self.persist(&center);
    }

    /// Wait until every change made so far has been handed to the cache.
    pub async fn flush(&self) {
        let target = self.pending.borrow().version;
        let mut stored = self.stored.subscribe();
        if stored.wait_for(|version| *version >= target).await.is_err() {
            tracing::debug!("Notification cache writer stopped before flush");
        }
    }

    /// Hide one toast.
    pub fn dismiss_toast(&self, toast_id: u64) -> bool {
        self.center.write().dismiss_toast(toast_id)
    }

    /// Copy of the center. Toasts past their lifetime are left out even if
    /// their timer has not fired yet.
    #[must_use]
    pub fn snapshot(&self) -> NotificationSnapshot {
        let now = Utc::now();
        let mut snapshot = self.center.read().snapshot();
        snapshot.toasts.retain(|toast| toast.expires_at > now);
        snapshot
    }

    /// Unread count.
    #[must_use]
    pub fn unread(&self) -> usize {
        self.center.read().unread()
    }

    fn send_ack(&self, id: String) {
        let ack = Arc::clone(&self.ack);
        tokio::spawn(async move {
            match ack.acknowledge(&id).await {
                Ok(()) => tracing::debug!(notification_id = %id, "Notification acknowledged"),
                Err(e) => {
                    metrics::record_ack_failure();
                    tracing::warn!(
                        notification_id = %id,
                        error = %e,
                        "Failed to acknowledge notification; read state kept locally"
                    );
                }
            }
        });
    }

    fn schedule_toast_expiry(self: &Arc<Self>, toast_id: u64) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let service: Weak<Self> = Arc::downgrade(self);
        let lifetime = self.toast_lifetime;
        handle.spawn(async move {
            tokio::time::sleep(lifetime).await;
            if let Some(service) = service.upgrade() {
                service.center.write().dismiss_toast(toast_id);
            }
        });
    }

    /// Queue the list for storage. Called with the center's write guard
    /// held so queued snapshots follow mutation order.
    fn persist(&self, center: &NotificationCenter) {
        let items: Arc<[Notification]> = Arc::from(center.items());
        let mut version = 0;
        self.pending.send_modify(|write| {
            write.version += 1;
            write.items = Arc::clone(&items);
            version = write.version;
        });

        if !self.background_writer {
            store_logged(self.cache.as_ref(), &items);
            self.stored.send_replace(version);
        }
    }
}

/// Store the newest queued list until the service is dropped.
async fn write_behind(
    cache: Arc<dyn NotificationCachePort>,
    mut pending: watch::Receiver<CacheWrite>,
    stored: Arc<watch::Sender<u64>>,
) {
    while pending.changed().await.is_ok() {
        let CacheWrite { version, items } = pending.borrow_and_update().clone();
        let cache = Arc::clone(&cache);
        if let Err(e) =
            tokio::task::spawn_blocking(move || store_logged(cache.as_ref(), &items)).await
        {
            tracing::warn!(error = %e, "Notification cache write task failed");
        }
        stored.send_replace(version);
    }
}

fn store_logged(cache: &dyn NotificationCachePort, items: &[Notification]) {
    if let Err(e) = cache.store(items) {
        tracing::warn!(error = %e, "Failed to write notification cache");
    }
}

impl std::fmt::Debug for NotificationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let center = self.center.read();
        f.debug_struct("NotificationService")
            .field("notifications", &center.len())
            .field("unread", &center.unread())
            .field("toast_lifetime", &self.toast_lifetime)
            .finish_non_exhaustive()
    }
}
