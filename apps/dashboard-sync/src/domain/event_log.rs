//! Bounded Event Log
//!
//! Fixed-capacity ring buffer of normalized feed events. Reads are
//! newest-first; once the buffer is full every append evicts the oldest
//! entry. Dropping old entries is the backpressure policy for the
//! unbounded order feed.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::order::OrderEvent;

/// Default capacity of the event log and the notification list.
pub const DEFAULT_CAPACITY: usize = 100;

// =============================================================================
// Bounded Log
// =============================================================================

/// Fixed-capacity, newest-first buffer.
///
/// Entries are never handed out mutably once appended.
#[derive(Debug, Clone)]
pub struct BoundedLog<T> {
    entries: VecDeque<T>,
    capacity: usize,
}

impl<T: Clone> BoundedLog<T> {
    /// Create an empty log holding at most `capacity` entries.
    ///
    /// A capacity of zero is raised to one.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append an entry, evicting and returning the oldest one when full.
    pub fn append(&mut self, entry: T) -> Option<T> {
        let evicted = if self.entries.len() >= self.capacity {
            self.entries.pop_back()
        } else {
            None
        };
        self.entries.push_front(entry);
        evicted
    }

    /// Copy of the current contents, newest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<T> {
        self.entries.iter().cloned().collect()
    }

    /// Iterate newest first without copying.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter()
    }

    /// Number of entries currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the log holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum number of entries retained.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<T: Clone> Default for BoundedLog<T> {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// =============================================================================
// Event Log Entries
// =============================================================================

/// Payload of an order feed event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "payload_type", content = "payload", rename_all = "snake_case")]
pub enum EventPayload {
    /// Payload recognized as an order.
    Order(OrderEvent),
    /// Payload kept as received.
    Raw(serde_json::Value),
}

/// One entry of the event log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventLogEntry {
    /// Upstream event type (e.g. `order_update`), or `unknown`.
    pub kind: String,
    /// Normalized payload.
    #[serde(flatten)]
    pub payload: EventPayload,
    /// When the message was received.
    pub received_at: DateTime<Utc>,
}

impl EventLogEntry {
    /// Order carried by this entry, if any.
    #[must_use]
    pub const fn order(&self) -> Option<&OrderEvent> {
        match &self.payload {
            EventPayload::Order(order) => Some(order),
            EventPayload::Raw(_) => None,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn append_below_capacity_keeps_everything() {
        let mut log = BoundedLog::new(3);
        assert!(log.append(1).is_none());
        assert!(log.append(2).is_none());

        assert_eq!(log.snapshot(), vec![2, 1]);
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn append_at_capacity_evicts_oldest() {
        let mut log = BoundedLog::new(3);
        for i in 1..=3 {
            log.append(i);
        }

        assert_eq!(log.append(4), Some(1));
        assert_eq!(log.snapshot(), vec![4, 3, 2]);
    }

    #[test]
    fn zero_capacity_is_raised_to_one() {
        let mut log = BoundedLog::new(0);
        log.append("a");
        log.append("b");

        assert_eq!(log.capacity(), 1);
        assert_eq!(log.snapshot(), vec!["b"]);
    }

    #[test]
    fn default_capacity_is_one_hundred() {
        let mut log = BoundedLog::default();
        for i in 0..150 {
            log.append(i);
        }

        assert_eq!(log.len(), DEFAULT_CAPACITY);
        assert_eq!(log.iter().next(), Some(&149));
        assert_eq!(log.iter().last(), Some(&50));
    }

    #[test]
    fn raw_entry_serializes_with_payload_type() {
        let entry = EventLogEntry {
            kind: "heartbeat".to_string(),
            payload: EventPayload::Raw(serde_json::json!({"type": "heartbeat"})),
            received_at: Utc::now(),
        };

        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["kind"], "heartbeat");
        assert_eq!(json["payload_type"], "raw");
        assert_eq!(json["payload"]["type"], "heartbeat");
        assert!(entry.order().is_none());
    }

    proptest! {
        #[test]
        fn snapshot_is_newest_entries_in_reverse(
            capacity in 1usize..40,
            values in prop::collection::vec(any::<u32>(), 0..200),
        ) {
            let mut log = BoundedLog::new(capacity);
            for value in &values {
                log.append(*value);
            }

            let snapshot = log.snapshot();
            prop_assert!(snapshot.len() <= capacity);

            let expected: Vec<u32> = values.iter().rev().take(capacity).copied().collect();
            prop_assert_eq!(snapshot, expected);
        }
    }
}
