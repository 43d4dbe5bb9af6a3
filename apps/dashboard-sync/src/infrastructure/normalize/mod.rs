//! Payload Normalization
//!
//! Pure functions turning upstream JSON into domain types. Each submodule
//! classifies its input into a tagged union of known shapes first and then
//! extracts fields, so an unknown shape ends up in an explicit
//! `Unrecognized` arm rather than a half-filled record.
//!
//! Every function here is total: any `serde_json::Value` produces a result.

pub mod notification;
pub mod order;
pub mod quote;

use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde_json::{Map, Value};

pub use notification::{NotificationInput, normalize_notification};
pub use order::{NormalizedEvent, normalize_order_list, normalize_order_message, normalize_order_object};
pub use quote::{carries_quote, normalize_quote, normalize_quote_for};

/// Epoch values above this are taken as milliseconds.
const EPOCH_MILLIS_THRESHOLD: f64 = 1.0e12;

/// First non-null field among `names`.
pub(crate) fn field<'a>(object: &'a Map<String, Value>, names: &[&str]) -> Option<&'a Value> {
    names
        .iter()
        .filter_map(|name| object.get(*name))
        .find(|value| !value.is_null())
}

/// Non-empty string field.
pub(crate) fn string_field(object: &Map<String, Value>, names: &[&str]) -> Option<String> {
    match field(object, names)? {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Non-negative decimal from a JSON number or numeric string.
pub(crate) fn decimal(value: &Value) -> Option<Decimal> {
    let parsed = match value {
        Value::Number(n) => parse_decimal(&n.to_string()),
        Value::String(s) => parse_decimal(s.trim()),
        _ => None,
    }?;
    (!parsed.is_sign_negative() || parsed.is_zero()).then_some(parsed)
}

/// Why a present price value yields no decimal. `None` when it parses.
pub(crate) fn decimal_rejection(value: &Value) -> Option<&'static str> {
    if decimal(value).is_some() {
        return None;
    }
    let numeric = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match numeric {
        Some(n) if n.is_finite() && n < 0.0 => Some("negative price"),
        Some(n) if n.is_finite() => Some("price out of range"),
        _ => Some("unparseable price"),
    }
}

/// Signed decimal, for fields like percent change.
pub(crate) fn signed_decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => parse_decimal(&n.to_string()),
        Value::String(s) => parse_decimal(s.trim()),
        _ => None,
    }
}

fn parse_decimal(raw: &str) -> Option<Decimal> {
    if raw.is_empty() {
        return None;
    }
    Decimal::from_str(raw)
        .or_else(|_| Decimal::from_scientific(raw))
        .ok()
}

/// Non-negative whole number. Fractional values are truncated.
pub(crate) fn quantity(value: &Value) -> Option<u64> {
    if let Some(n) = value.as_u64() {
        return Some(n);
    }
    let d = decimal(value)?;
    d.trunc().to_u64()
}

pub(crate) fn decimal_field(object: &Map<String, Value>, names: &[&str]) -> Option<Decimal> {
    field(object, names).and_then(decimal)
}

pub(crate) fn quantity_field(object: &Map<String, Value>, names: &[&str]) -> Option<u64> {
    field(object, names).and_then(quantity)
}

/// Timestamp from RFC 3339, a naive ISO string (taken as UTC), or epoch
/// seconds / milliseconds.
pub(crate) fn timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            if let Ok(parsed) = DateTime::parse_from_rfc3339(s) {
                return Some(parsed.with_timezone(&Utc));
            }
            if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
                return Some(naive.and_utc());
            }
            s.parse::<f64>().ok().and_then(epoch)
        }
        Value::Number(n) => n.as_f64().and_then(epoch),
        _ => None,
    }
}

pub(crate) fn timestamp_field(object: &Map<String, Value>, names: &[&str]) -> Option<DateTime<Utc>> {
    field(object, names).and_then(timestamp)
}

#[allow(clippy::cast_possible_truncation)]
fn epoch(raw: f64) -> Option<DateTime<Utc>> {
    if !raw.is_finite() || raw < 0.0 {
        return None;
    }
    if raw >= EPOCH_MILLIS_THRESHOLD {
        // Out-of-range values saturate and are then rejected by chrono.
        return DateTime::from_timestamp_millis(raw as i64);
    }
    let micros = (raw * 1_000_000.0).round() as i64;
    DateTime::from_timestamp_micros(micros)
}
