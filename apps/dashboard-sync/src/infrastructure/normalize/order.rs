//! Order Normalization
//!
//! The broker publishes `{"type": "order_update" | "order_triggered", "data": {...}}`
//! on its feed and plain order objects (or `{"orders": [...]}`) from the REST
//! list. Field names arrive in snake_case or camelCase.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use super::{decimal_field, field, quantity_field, string_field, timestamp_field};
use crate::domain::event_log::{EventLogEntry, EventPayload};
use crate::domain::order::{OrderError, OrderEvent, OrderFields, OrderStatus, OrderType, Side};

/// Event kind used when a payload does not name one.
pub const UNKNOWN_KIND: &str = "unknown";

/// Event kind given to bare order objects.
pub const BARE_ORDER_KIND: &str = "order_update";

const ID_FIELDS: &[&str] = &["id", "order_id", "orderId"];
const SYMBOL_FIELDS: &[&str] = &["symbol"];
const SIDE_FIELDS: &[&str] = &["side"];
const ORDER_TYPE_FIELDS: &[&str] = &["order_type", "orderType", "type"];
const QTY_FIELDS: &[&str] = &["qty", "quantity"];
const FILLED_FIELDS: &[&str] = &["filled_qty", "filledQty", "filled_quantity", "filledQuantity"];
const STATUS_FIELDS: &[&str] = &["status"];
const LIMIT_FIELDS: &[&str] = &["limit_price", "limitPrice"];
const STOP_FIELDS: &[&str] = &["stop_price", "stopPrice"];
const AVG_FIELDS: &[&str] = &["avg_price", "avgPrice", "filled_avg_price", "avgFillPrice"];
const CREATED_FIELDS: &[&str] = &["created_at", "createdAt", "timestamp"];

/// Why an object is not a valid order.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OrderParseError {
    /// Payload is not a JSON object.
    #[error("order payload is not an object")]
    NotAnObject,

    /// Required field absent.
    #[error("missing field {0}")]
    Missing(&'static str),

    /// Field present but not understood.
    #[error("invalid {field}: {value}")]
    Invalid {
        /// Field name.
        field: &'static str,
        /// Offending value.
        value: String,
    },

    /// Fields parsed but violate order invariants.
    #[error(transparent)]
    Order(#[from] OrderError),
}

/// One order feed message after normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedEvent {
    /// Upstream event type.
    pub kind: String,
    /// Order, or the payload as received.
    pub payload: EventPayload,
    /// Why the payload was kept raw.
    pub diagnostic: Option<String>,
}

impl NormalizedEvent {
    /// Turn into an event log entry.
    #[must_use]
    pub fn into_entry(self, received_at: DateTime<Utc>) -> EventLogEntry {
        EventLogEntry {
            kind: self.kind,
            payload: self.payload,
            received_at,
        }
    }

    fn raw(kind: String, value: Value, diagnostic: impl Into<String>) -> Self {
        Self {
            kind,
            payload: EventPayload::Raw(value),
            diagnostic: Some(diagnostic.into()),
        }
    }
}

/// Known order feed message shapes.
enum OrderMessageShape<'a> {
    /// `{type, data: {...}}`
    Wrapped { kind: String, data: &'a Value },
    /// An order object on its own.
    Bare(&'a Map<String, Value>),
    /// `{type}` with no order body.
    Typed { kind: String },
    Unrecognized(&'static str),
}

impl<'a> OrderMessageShape<'a> {
    fn classify(value: &'a Value) -> Self {
        let Some(object) = value.as_object() else {
            return Self::Unrecognized("payload is not an object");
        };

        if let Some(data) = field(object, &["data"]) {
            return Self::Wrapped {
                kind: kind_of(object),
                data,
            };
        }
        if field(object, ID_FIELDS).is_some() {
            return Self::Bare(object);
        }
        if string_field(object, &["type"]).is_some() {
            return Self::Typed {
                kind: kind_of(object),
            };
        }
        Self::Unrecognized("no order fields")
    }
}

fn kind_of(object: &Map<String, Value>) -> String {
    string_field(object, &["type"]).unwrap_or_else(|| UNKNOWN_KIND.to_string())
}

/// Normalize one order feed message.
#[must_use]
pub fn normalize_order_message(value: &Value) -> NormalizedEvent {
    match OrderMessageShape::classify(value) {
        OrderMessageShape::Wrapped { kind, data } => match normalize_order_object(data) {
            Ok(order) => NormalizedEvent {
                kind,
                payload: EventPayload::Order(order),
                diagnostic: None,
            },
            Err(e) => NormalizedEvent::raw(kind, data.clone(), e.to_string()),
        },
        OrderMessageShape::Bare(_) => match normalize_order_object(value) {
            Ok(order) => NormalizedEvent {
                kind: BARE_ORDER_KIND.to_string(),
                payload: EventPayload::Order(order),
                diagnostic: None,
            },
            Err(e) => NormalizedEvent::raw(BARE_ORDER_KIND.to_string(), value.clone(), e.to_string()),
        },
        OrderMessageShape::Typed { kind } => {
            NormalizedEvent::raw(kind, value.clone(), "message carries no order body")
        }
        OrderMessageShape::Unrecognized(reason) => {
            NormalizedEvent::raw(UNKNOWN_KIND.to_string(), value.clone(), reason)
        }
    }
}

/// Parse one order object.
///
/// # Errors
///
/// Returns `OrderParseError` naming the first field that is missing or
/// invalid, or the violated order invariant.
pub fn normalize_order_object(value: &Value) -> Result<OrderEvent, OrderParseError> {
    let object = value.as_object().ok_or(OrderParseError::NotAnObject)?;

    let id = string_field(object, ID_FIELDS).ok_or(OrderParseError::Missing("id"))?;
    let symbol = string_field(object, SYMBOL_FIELDS)
        .ok_or(OrderParseError::Missing("symbol"))?
        .to_ascii_uppercase();

    let side_raw = string_field(object, SIDE_FIELDS).ok_or(OrderParseError::Missing("side"))?;
    let side = Side::parse(&side_raw).ok_or(OrderParseError::Invalid {
        field: "side",
        value: side_raw,
    })?;

    let status_raw =
        string_field(object, STATUS_FIELDS).ok_or(OrderParseError::Missing("status"))?;
    let status = OrderStatus::parse(&status_raw).ok_or(OrderParseError::Invalid {
        field: "status",
        value: status_raw,
    })?;

    let order_type = string_field(object, ORDER_TYPE_FIELDS)
        .map_or(OrderType::Unknown, |raw| OrderType::parse(&raw));

    let qty = required_quantity(object, QTY_FIELDS, "qty")?;
    let filled_qty = match field(object, FILLED_FIELDS) {
        Some(_) => required_quantity(object, FILLED_FIELDS, "filled_qty")?,
        None => 0,
    };

    let created_at = match field(object, CREATED_FIELDS) {
        Some(raw) => timestamp_field(object, CREATED_FIELDS).ok_or_else(|| {
            OrderParseError::Invalid {
                field: "created_at",
                value: raw.to_string(),
            }
        })?,
        None => return Err(OrderParseError::Missing("created_at")),
    };

    Ok(OrderEvent::new(OrderFields {
        id,
        symbol,
        side,
        order_type,
        qty,
        filled_qty,
        status,
        limit_price: decimal_field(object, LIMIT_FIELDS),
        stop_price: decimal_field(object, STOP_FIELDS),
        avg_price: decimal_field(object, AVG_FIELDS),
        created_at,
    })?)
}

fn required_quantity(
    object: &Map<String, Value>,
    names: &[&str],
    label: &'static str,
) -> Result<u64, OrderParseError> {
    let raw = field(object, names).ok_or(OrderParseError::Missing(label))?;
    quantity_field(object, names).ok_or_else(|| OrderParseError::Invalid {
        field: label,
        value: raw.to_string(),
    })
}

/// Parse a polled orders list: a bare array or `{"orders": [...]}`.
///
/// Items that are not valid orders are skipped.
#[must_use]
pub fn normalize_order_list(value: &Value) -> Vec<OrderEvent> {
    let items = match value {
        Value::Array(items) => items.as_slice(),
        Value::Object(object) => match object.get("orders") {
            Some(Value::Array(items)) => items.as_slice(),
            _ => return Vec::new(),
        },
        _ => return Vec::new(),
    };

    items
        .iter()
        .filter_map(|item| match normalize_order_object(item) {
            Ok(order) => Some(order),
            Err(e) => {
                tracing::debug!(error = %e, "Skipping invalid order in list");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use serde_json::json;
    use std::str::FromStr;
    use test_case::test_case;

    fn broker_order() -> Value {
        json!({
            "id": "ord-1",
            "symbol": "aapl",
            "side": "BUY",
            "order_type": "LIMIT",
            "qty": 100,
            "filled_qty": 40,
            "leaves_qty": 60,
            "status": "PARTIAL",
            "limit_price": 189.5,
            "avg_price": 189.45,
            "tif": "DAY",
            "created_at": 1_709_294_400.5
        })
    }

    #[test]
    fn wrapped_order_update() {
        let event = normalize_order_message(&json!({"type": "order_update", "data": broker_order()}));

        assert_eq!(event.kind, "order_update");
        assert!(event.diagnostic.is_none());
        let EventPayload::Order(order) = event.payload else {
            panic!("expected order payload");
        };
        assert_eq!(order.id, "ord-1");
        assert_eq!(order.symbol, "AAPL");
        assert_eq!(order.side, Side::Buy);
        assert_eq!(order.order_type, OrderType::Limit);
        assert_eq!(order.qty, 100);
        assert_eq!(order.filled_qty, 40);
        assert_eq!(order.status, OrderStatus::Partial);
        assert_eq!(order.limit_price, Some(Decimal::from_str("189.5").unwrap()));
        assert_eq!(order.created_at.timestamp_millis(), 1_709_294_400_500);
    }

    #[test]
    fn triggered_pending_order() {
        let mut data = broker_order();
        data["status"] = json!("PENDING");
        data["order_type"] = json!("STOP");
        let event = normalize_order_message(&json!({"type": "order_triggered", "data": data}));

        assert_eq!(event.kind, "order_triggered");
        let order = event.payload_order();
        assert_eq!(order.status, OrderStatus::StopPending);
        assert_eq!(order.order_type, OrderType::Stop);
    }

    #[test]
    fn camel_case_bare_order() {
        let payload = json!({
            "orderId": "ord-2",
            "symbol": "MSFT",
            "side": "sell",
            "orderType": "stop_limit",
            "quantity": "10",
            "filledQty": 0,
            "status": "new",
            "stopPrice": "400",
            "createdAt": "2024-03-01T12:00:00Z"
        });
        let event = normalize_order_message(&payload);

        assert_eq!(event.kind, BARE_ORDER_KIND);
        let order = event.payload_order();
        assert_eq!(order.id, "ord-2");
        assert_eq!(order.side, Side::Sell);
        assert_eq!(order.order_type, OrderType::StopLimit);
        assert_eq!(order.qty, 10);
        assert_eq!(order.stop_price, Some(Decimal::from(400)));
    }

    #[test]
    fn overfilled_order_is_kept_raw() {
        let mut data = broker_order();
        data["filled_qty"] = json!(150);
        let event = normalize_order_message(&json!({"type": "order_update", "data": data.clone()}));

        assert_eq!(event.payload, EventPayload::Raw(data));
        assert!(event.diagnostic.unwrap().contains("exceeds"));
    }

    #[test_case("id" ; "id")]
    #[test_case("symbol" ; "symbol")]
    #[test_case("side" ; "side")]
    #[test_case("status" ; "status")]
    #[test_case("qty" ; "qty")]
    #[test_case("created_at" ; "created_at")]
    fn missing_required_field(name: &'static str) {
        let mut data = broker_order();
        data.as_object_mut().unwrap().remove(name);
        let err = normalize_order_object(&data).unwrap_err();
        assert_eq!(err, OrderParseError::Missing(name));
    }

    #[test]
    fn unknown_status_is_invalid() {
        let mut data = broker_order();
        data["status"] = json!("EXPLODED");
        assert!(matches!(
            normalize_order_object(&data),
            Err(OrderParseError::Invalid { field: "status", .. })
        ));
    }

    #[test]
    fn typed_message_without_body() {
        let event = normalize_order_message(&json!({"type": "connected"}));
        assert_eq!(event.kind, "connected");
        assert!(matches!(event.payload, EventPayload::Raw(_)));
        assert!(event.diagnostic.is_some());
    }

    #[test_case(json!(42) ; "number")]
    #[test_case(json!(null) ; "null")]
    #[test_case(json!({"hello": "world"}) ; "foreign object")]
    fn unrecognized_messages(payload: Value) {
        let event = normalize_order_message(&payload);
        assert_eq!(event.kind, UNKNOWN_KIND);
        assert_eq!(event.payload, EventPayload::Raw(payload));
    }

    #[test]
    fn order_list_shapes() {
        let bad = json!({"id": "x"});
        let array = json!([broker_order(), bad.clone()]);
        let wrapped = json!({"orders": [broker_order(), bad]});

        assert_eq!(normalize_order_list(&array).len(), 1);
        assert_eq!(normalize_order_list(&wrapped).len(), 1);
        assert!(normalize_order_list(&json!({"count": 3})).is_empty());
        assert!(normalize_order_list(&json!("orders")).is_empty());
    }

    #[test]
    fn entry_keeps_kind_and_payload() {
        let received_at = Utc::now();
        let entry = normalize_order_message(&json!({"type": "order_update", "data": broker_order()}))
            .into_entry(received_at);
        assert_eq!(entry.kind, "order_update");
        assert_eq!(entry.received_at, received_at);
        assert!(entry.order().is_some());
    }

    impl NormalizedEvent {
        fn payload_order(self) -> OrderEvent {
            match self.payload {
                EventPayload::Order(order) => order,
                EventPayload::Raw(raw) => panic!("expected order, got raw {raw}: {:?}", self.diagnostic),
            }
        }
    }
}
