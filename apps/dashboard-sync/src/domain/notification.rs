//! Notification Center
//!
//! Read/unread state machine for user-visible notifications. Each
//! notification moves `received -> read` exactly once. The list is
//! bounded like the event log, deduplicated by id, and every fresh arrival
//! raises a short-lived toast.
//!
//! This type holds no I/O. Outbound acks and toast timers live in
//! `application::services::notification`.

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use super::event_log::DEFAULT_CAPACITY;

/// Default toast display lifetime.
pub const DEFAULT_TOAST_LIFETIME: Duration = Duration::from_secs(5);

/// Recently seen ids are remembered for this many times the list capacity.
const SEEN_ID_FACTOR: usize = 4;

// =============================================================================
// Notification
// =============================================================================

/// Notification severity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational.
    Low,
    /// Default severity.
    #[default]
    Medium,
    /// Needs attention.
    High,
    /// Needs immediate attention.
    Critical,
}

impl Severity {
    /// Map an upstream priority or severity label.
    ///
    /// `normal` is medium and `urgent` is critical.
    #[must_use]
    pub fn from_label(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "low" | "info" => Some(Self::Low),
            "medium" | "normal" => Some(Self::Medium),
            "high" | "warning" => Some(Self::High),
            "critical" | "urgent" => Some(Self::Critical),
            _ => None,
        }
    }

    /// Lowercase label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user-visible notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Notification id used for dedupe and acks.
    pub id: String,
    /// Title line.
    pub title: String,
    /// Body text.
    pub message: String,
    /// Severity.
    pub severity: Severity,
    /// Extra upstream fields (e.g. `cta_url`, `channel`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Map<String, serde_json::Value>>,
    /// Creation or arrival time.
    pub timestamp: DateTime<Utc>,
    /// Whether the user has acknowledged it.
    #[serde(default)]
    pub read: bool,
}

/// Transient popup raised for a fresh notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Toast {
    /// Toast id, unique within one center.
    pub id: u64,
    /// Notification the toast announces.
    pub notification_id: String,
    /// Title line.
    pub title: String,
    /// Severity.
    pub severity: Severity,
    /// When the toast removes itself.
    pub expires_at: DateTime<Utc>,
}

// =============================================================================
// Outcomes
// =============================================================================

/// Result of ingesting one notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Added to the list. Carries the toast raised for it, if any.
    Added {
        /// Id of the toast raised for the notification.
        toast_id: Option<u64>,
    },
    /// Id already seen; nothing changed.
    Duplicate,
}

/// Result of acknowledging one notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// Flipped to read. The caller owes the origin service one ack.
    Acknowledged,
    /// Already read; nothing changed.
    AlreadyRead,
    /// Not in the list.
    NotFound,
}

/// Point-in-time copy of the center.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationSnapshot {
    /// Notifications, newest first.
    pub items: Vec<Notification>,
    /// Unread count.
    pub unread: usize,
    /// Live toasts, newest first.
    pub toasts: Vec<Toast>,
}

// =============================================================================
// Center
// =============================================================================

/// Bounded, deduplicated notification list with read state and toasts.
#[derive(Debug, Clone)]
pub struct NotificationCenter {
    items: VecDeque<Notification>,
    capacity: usize,
    unread: usize,
    seen_order: VecDeque<String>,
    seen: HashSet<String>,
    toasts: VecDeque<Toast>,
    next_toast_id: u64,
    toast_lifetime: TimeDelta,
}

impl NotificationCenter {
    /// Create an empty center.
    #[must_use]
    pub fn new(capacity: usize, toast_lifetime: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
            unread: 0,
            seen_order: VecDeque::new(),
            seen: HashSet::new(),
            toasts: VecDeque::new(),
            next_toast_id: 1,
            toast_lifetime: TimeDelta::from_std(toast_lifetime)
                .unwrap_or_else(|_| TimeDelta::seconds(5)),
        }
    }

    /// Add a freshly received notification and raise a toast for it.
    ///
    /// A notification that arrives already read is listed without a toast.
    pub fn ingest(&mut self, notification: Notification, now: DateTime<Utc>) -> IngestOutcome {
        if !self.remember(&notification.id) {
            return IngestOutcome::Duplicate;
        }
        if notification.read {
            self.push_front(notification);
            return IngestOutcome::Added { toast_id: None };
        }

        let toast = Toast {
            id: self.next_toast_id,
            notification_id: notification.id.clone(),
            title: notification.title.clone(),
            severity: notification.severity,
            expires_at: now + self.toast_lifetime,
        };
        self.next_toast_id += 1;
        let toast_id = toast.id;
        self.toasts.push_front(toast);

        self.push_front(notification);
        IngestOutcome::Added {
            toast_id: Some(toast_id),
        }
    }

    /// Merge previously known notifications (cache or backfill) without toasts.
    ///
    /// The list is re-sorted newest first and trimmed to capacity.
    pub fn restore(&mut self, notifications: Vec<Notification>) -> usize {
        let mut added = 0;
        for notification in notifications {
            if self.remember(&notification.id) {
                self.items.push_back(notification);
                added += 1;
            }
        }

        self.items
            .make_contiguous()
            .sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        self.items.truncate(self.capacity);
        self.unread = self.items.iter().filter(|n| !n.read).count();
        added
    }

    /// Mark a notification read.
    pub fn acknowledge(&mut self, id: &str) -> AckOutcome {
        let Some(notification) = self.items.iter_mut().find(|n| n.id == id) else {
            return AckOutcome::NotFound;
        };
        if notification.read {
            return AckOutcome::AlreadyRead;
        }

        notification.read = true;
        self.unread = self.unread.saturating_sub(1);
        self.toasts.retain(|toast| toast.notification_id != id);
        AckOutcome::Acknowledged
    }

    /// Drop every notification and toast locally. Seen ids are kept so a
    /// redelivered notification does not reappear.
    pub fn clear_all(&mut self) {
        self.items.clear();
        self.toasts.clear();
        self.unread = 0;
    }

    /// Remove one toast. Returns whether it was still showing.
    pub fn dismiss_toast(&mut self, toast_id: u64) -> bool {
        let before = self.toasts.len();
        self.toasts.retain(|toast| toast.id != toast_id);
        self.toasts.len() != before
    }

    /// Remove toasts whose lifetime has passed.
    pub fn expire_toasts(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.toasts.len();
        self.toasts.retain(|toast| toast.expires_at > now);
        before - self.toasts.len()
    }

    /// Unread count.
    #[must_use]
    pub const fn unread(&self) -> usize {
        self.unread
    }

    /// Number of notifications held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the list is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Look up one notification.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Notification> {
        self.items.iter().find(|n| n.id == id)
    }

    /// Copy of the list, newest first.
    #[must_use]
    pub fn items(&self) -> Vec<Notification> {
        self.items.iter().cloned().collect()
    }

    /// Copy of the whole center.
    #[must_use]
    pub fn snapshot(&self) -> NotificationSnapshot {
        NotificationSnapshot {
            items: self.items(),
            unread: self.unread,
            toasts: self.toasts.iter().cloned().collect(),
        }
    }

    fn push_front(&mut self, notification: Notification) {
        if !notification.read {
            self.unread += 1;
        }
        self.items.push_front(notification);

        if self.items.len() > self.capacity
            && let Some(evicted) = self.items.pop_back()
            && !evicted.read
        {
            self.unread = self.unread.saturating_sub(1);
        }
    }

    /// Record an id as seen. Returns `false` if it already was.
    fn remember(&mut self, id: &str) -> bool {
        if self.seen.contains(id) {
            return false;
        }

        let limit = self.capacity * SEEN_ID_FACTOR;
        while self.seen_order.len() >= limit {
            if let Some(oldest) = self.seen_order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.seen.insert(id.to_string());
        self.seen_order.push_back(id.to_string());
        true
    }
}

impl Default for NotificationCenter {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_TOAST_LIFETIME)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn notification(id: &str) -> Notification {
        Notification {
            id: id.to_string(),
            title: format!("title {id}"),
            message: "body".to_string(),
            severity: Severity::Medium,
            payload: None,
            timestamp: Utc::now(),
            read: false,
        }
    }

    #[test]
    fn ingest_adds_unread_and_toast() {
        let mut center = NotificationCenter::default();
        let outcome = center.ingest(notification("n-1"), Utc::now());

        assert_eq!(outcome, IngestOutcome::Added { toast_id: Some(1) });
        assert_eq!(center.unread(), 1);
        let snapshot = center.snapshot();
        assert_eq!(snapshot.toasts.len(), 1);
        assert_eq!(snapshot.toasts[0].notification_id, "n-1");
    }

    #[test]
    fn already_read_notification_raises_no_toast() {
        let mut center = NotificationCenter::default();
        let mut read = notification("n-1");
        read.read = true;

        assert_eq!(
            center.ingest(read, Utc::now()),
            IngestOutcome::Added { toast_id: None }
        );
        assert_eq!(center.len(), 1);
        assert_eq!(center.unread(), 0);
        assert!(center.snapshot().toasts.is_empty());

        assert_eq!(
            center.ingest(notification("n-2"), Utc::now()),
            IngestOutcome::Added { toast_id: Some(1) }
        );
    }

    #[test]
    fn duplicate_ids_are_dropped() {
        let mut center = NotificationCenter::default();
        center.ingest(notification("n-1"), Utc::now());

        assert_eq!(
            center.ingest(notification("n-1"), Utc::now()),
            IngestOutcome::Duplicate
        );
        assert_eq!(center.len(), 1);
        assert_eq!(center.unread(), 1);
    }

    #[test]
    fn bounded_to_capacity_newest_first() {
        let mut center = NotificationCenter::default();
        for i in 1..=101 {
            center.ingest(notification(&format!("n-{i}")), Utc::now());
        }

        let snapshot = center.snapshot();
        assert_eq!(snapshot.items.len(), 100);
        assert_eq!(snapshot.items[0].id, "n-101");
        assert!(snapshot.items.iter().all(|n| n.id != "n-1"));
        assert_eq!(snapshot.unread, 100);
    }

    #[test]
    fn acknowledge_is_idempotent() {
        let mut center = NotificationCenter::default();
        center.ingest(notification("n-1"), Utc::now());
        center.ingest(notification("n-2"), Utc::now());

        assert_eq!(center.acknowledge("n-1"), AckOutcome::Acknowledged);
        let after_first = center.unread();
        assert_eq!(center.acknowledge("n-1"), AckOutcome::AlreadyRead);

        assert!(center.get("n-1").unwrap().read);
        assert_eq!(center.unread(), after_first);
        assert_eq!(after_first, 1);
    }

    #[test]
    fn acknowledge_unknown_id() {
        let mut center = NotificationCenter::default();
        assert_eq!(center.acknowledge("missing"), AckOutcome::NotFound);
        assert_eq!(center.unread(), 0);
    }

    #[test]
    fn acknowledge_dismisses_toast() {
        let mut center = NotificationCenter::default();
        center.ingest(notification("n-1"), Utc::now());
        center.acknowledge("n-1");

        assert!(center.snapshot().toasts.is_empty());
    }

    #[test]
    fn clear_all_resets_state() {
        let mut center = NotificationCenter::default();
        for i in 0..10 {
            center.ingest(notification(&format!("n-{i}")), Utc::now());
        }
        for i in 0..7 {
            center.acknowledge(&format!("n-{i}"));
        }
        assert_eq!(center.unread(), 3);

        center.clear_all();

        assert!(center.is_empty());
        assert_eq!(center.unread(), 0);
        assert!(center.snapshot().toasts.is_empty());
    }

    #[test]
    fn cleared_ids_do_not_reappear() {
        let mut center = NotificationCenter::default();
        center.ingest(notification("n-1"), Utc::now());
        center.clear_all();

        assert_eq!(
            center.ingest(notification("n-1"), Utc::now()),
            IngestOutcome::Duplicate
        );
    }

    #[test]
    fn toasts_expire_after_lifetime() {
        let mut center = NotificationCenter::new(10, Duration::from_secs(5));
        let now = Utc::now();
        center.ingest(notification("n-1"), now);

        assert_eq!(center.expire_toasts(now + TimeDelta::seconds(4)), 0);
        assert_eq!(center.expire_toasts(now + TimeDelta::seconds(5)), 1);
        assert!(center.snapshot().toasts.is_empty());
        assert_eq!(center.len(), 1);
    }

    #[test]
    fn dismiss_toast_by_id() {
        let mut center = NotificationCenter::default();
        let IngestOutcome::Added { toast_id: Some(id) } =
            center.ingest(notification("n-1"), Utc::now())
        else {
            panic!("expected toast");
        };

        assert!(center.dismiss_toast(id));
        assert!(!center.dismiss_toast(id));
    }

    #[test]
    fn restore_sorts_and_counts_unread() {
        let mut center = NotificationCenter::new(3, DEFAULT_TOAST_LIFETIME);
        let base = Utc::now();
        let mut older = notification("old");
        older.timestamp = base - TimeDelta::minutes(10);
        older.read = true;
        let mut newer = notification("new");
        newer.timestamp = base;
        let mut middle = notification("mid");
        middle.timestamp = base - TimeDelta::minutes(5);

        let added = center.restore(vec![older, newer, middle.clone(), middle]);

        assert_eq!(added, 3);
        let ids: Vec<_> = center.items().into_iter().map(|n| n.id).collect();
        assert_eq!(ids, vec!["new", "mid", "old"]);
        assert_eq!(center.unread(), 2);
        assert!(center.snapshot().toasts.is_empty());
    }

    #[test_case("normal", Some(Severity::Medium) ; "normal is medium")]
    #[test_case("URGENT", Some(Severity::Critical) ; "urgent is critical")]
    #[test_case("high", Some(Severity::High) ; "high")]
    #[test_case("low", Some(Severity::Low) ; "low")]
    #[test_case("sideways", None ; "unknown label")]
    fn severity_labels(raw: &str, expected: Option<Severity>) {
        assert_eq!(Severity::from_label(raw), expected);
    }
}
