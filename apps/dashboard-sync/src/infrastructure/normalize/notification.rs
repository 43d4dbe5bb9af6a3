//! Notification Normalization
//!
//! Handles the live in-app payload
//! (`{"type":"notification","notification_id":..,"priority":..,"cta_url":..}`),
//! the stored form returned by the REST list (`{"id":..,"read_at":..,"created_at":..}`),
//! `{"data": {...}}` envelopes and `{"type":"heartbeat"}` keepalives.
//!
//! Fields that are not part of the model are kept in `payload`.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use super::{field, string_field, timestamp_field};
use crate::domain::notification::{Notification, Severity};

const DEFAULT_TITLE: &str = "Notification";
const MAX_ENVELOPE_DEPTH: usize = 4;

const ID_FIELDS: &[&str] = &["notification_id", "id"];
const TITLE_FIELDS: &[&str] = &["title", "subject"];
const MESSAGE_FIELDS: &[&str] = &["message", "body"];
const SEVERITY_FIELDS: &[&str] = &["priority", "severity"];
const TIME_FIELDS: &[&str] = &["timestamp", "created_at", "createdAt"];
const READ_FIELDS: &[&str] = &["read", "read_at"];

/// Keys consumed into model fields; everything else lands in `payload`.
const MODEL_KEYS: &[&str] = &[
    "type",
    "notification_id",
    "id",
    "title",
    "subject",
    "message",
    "body",
    "priority",
    "severity",
    "timestamp",
    "created_at",
    "createdAt",
    "read",
    "read_at",
];

/// A notification feed message after normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum NotificationInput {
    /// A notification to deliver.
    Notification(Notification),
    /// Keepalive; counts as activity only.
    Heartbeat,
    /// Nothing usable.
    Unrecognized {
        /// Why the payload was rejected.
        reason: String,
    },
}

/// Known notification payload shapes.
enum NotificationShape<'a> {
    Heartbeat,
    /// `{data: {...}}`
    Enveloped(&'a Value),
    /// Live in-app delivery.
    Live(&'a Map<String, Value>),
    /// Stored record from the REST list or local cache.
    Stored(&'a Map<String, Value>),
    Unrecognized(&'static str),
}

impl<'a> NotificationShape<'a> {
    fn classify(value: &'a Value) -> Self {
        let Some(object) = value.as_object() else {
            return Self::Unrecognized("payload is not an object");
        };

        let kind = string_field(object, &["type"]).map(|k| k.to_ascii_lowercase());
        if kind.as_deref() == Some("heartbeat") {
            return Self::Heartbeat;
        }
        if let Some(data) = object.get("data").filter(|d| d.is_object()) {
            return Self::Enveloped(data);
        }
        if kind.as_deref() == Some("notification") || object.contains_key("notification_id") {
            return Self::Live(object);
        }
        if object.contains_key("id")
            && (field(object, TITLE_FIELDS).is_some() || field(object, MESSAGE_FIELDS).is_some())
        {
            return Self::Stored(object);
        }
        if kind.is_none()
            && (field(object, TITLE_FIELDS).is_some() || field(object, MESSAGE_FIELDS).is_some())
        {
            return Self::Live(object);
        }
        Self::Unrecognized("no notification fields")
    }
}

/// Normalize one notification feed message or stored record.
#[must_use]
pub fn normalize_notification(value: &Value, received_at: DateTime<Utc>) -> NotificationInput {
    normalize(value, received_at, 0)
}

fn normalize(value: &Value, received_at: DateTime<Utc>, depth: usize) -> NotificationInput {
    match NotificationShape::classify(value) {
        NotificationShape::Heartbeat => NotificationInput::Heartbeat,
        NotificationShape::Enveloped(data) => {
            if depth >= MAX_ENVELOPE_DEPTH {
                return NotificationInput::Unrecognized {
                    reason: "envelope nested too deeply".to_string(),
                };
            }
            normalize(data, received_at, depth + 1)
        }
        NotificationShape::Live(object) | NotificationShape::Stored(object) => {
            NotificationInput::Notification(build(object, received_at))
        }
        NotificationShape::Unrecognized(reason) => NotificationInput::Unrecognized {
            reason: reason.to_string(),
        },
    }
}

fn build(object: &Map<String, Value>, received_at: DateTime<Utc>) -> Notification {
    let id = string_field(object, ID_FIELDS).unwrap_or_else(|| {
        let synthesized = uuid::Uuid::new_v4().to_string();
        tracing::warn!(
            notification_id = %synthesized,
            "Notification without id; it cannot be deduplicated"
        );
        synthesized
    });

    let severity = string_field(object, SEVERITY_FIELDS)
        .and_then(|label| Severity::from_label(&label))
        .unwrap_or_default();

    let extra: Map<String, Value> = object
        .iter()
        .filter(|(key, _)| !MODEL_KEYS.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    Notification {
        id,
        title: string_field(object, TITLE_FIELDS).unwrap_or_else(|| DEFAULT_TITLE.to_string()),
        message: string_field(object, MESSAGE_FIELDS).unwrap_or_default(),
        severity,
        payload: (!extra.is_empty()).then_some(extra),
        timestamp: timestamp_field(object, TIME_FIELDS).unwrap_or(received_at),
        read: is_read(object),
    }
}

fn is_read(object: &Map<String, Value>) -> bool {
    match field(object, READ_FIELDS) {
        Some(Value::Bool(read)) => *read,
        Some(Value::String(read_at)) => !read_at.trim().is_empty(),
        Some(Value::Null) | None => false,
        Some(_) => true,
    }
}
