//! Quote Normalization
//!
//! Upstream quote payloads come in several shapes:
//!
//! ```text
//! {"type":"market_data","symbol":"AAPL","data":{"price":..,"nbbo":{"bid":..,"ask":..,"bid_sz":..,"ask_sz":..}}}
//! {"symbol":"AAPL","bid":99.95,"ask":100.05}
//! {"S":"AAPL","bp":"99.95","ap":"100.05"}
//! {"symbol":"AAPL","price":100.0}
//! ```
//!
//! Nested `nbbo` values win over flat ones. A side that is missing is
//! synthesized around the reference price using a fixed 0.1% spread.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::{Map, Value};

use super::{
    decimal_field, decimal_rejection, field, quantity_field, signed_decimal, string_field,
    timestamp_field,
};
use crate::domain::quote::{Quote, QuoteRecord};

/// Half of the synthesized spread, as a fraction of the reference price.
const SYNTHETIC_HALF_SPREAD: Decimal = Decimal::from_parts(5, 0, 0, false, 4);

/// Envelopes nested deeper than this are rejected.
const MAX_ENVELOPE_DEPTH: usize = 4;

const SYMBOL_FIELDS: &[&str] = &["symbol", "sym", "ticker", "S"];
const BID_FIELDS: &[&str] = &["bid", "bid_price", "bidPrice", "bp"];
const ASK_FIELDS: &[&str] = &["ask", "ask_price", "askPrice", "ap"];
const BID_SIZE_FIELDS: &[&str] = &["bid_sz", "bid_size", "bidSize", "bs"];
const ASK_SIZE_FIELDS: &[&str] = &["ask_sz", "ask_size", "askSize", "as"];
const PRICE_FIELDS: &[&str] = &["price", "last", "last_price", "lastPrice", "p"];
const CHANGE_FIELDS: &[&str] = &["change_percent", "changePercent", "change_pct"];
const VOLUME_FIELDS: &[&str] = &["volume", "v"];
const TIME_FIELDS: &[&str] = &["timestamp", "as_of", "time", "t"];

/// Known quote payload shapes.
enum QuoteShape<'a> {
    /// `{type?, symbol?, data: {...}}`
    Enveloped {
        symbol: Option<String>,
        data: &'a Value,
    },
    /// Body with a nested `nbbo` object.
    Nbbo {
        body: &'a Map<String, Value>,
        nbbo: &'a Map<String, Value>,
    },
    /// Body with bid/ask at the top level.
    Flat(&'a Map<String, Value>),
    /// Body with only a last price.
    PriceOnly(&'a Map<String, Value>),
    Unrecognized(&'static str),
}

impl<'a> QuoteShape<'a> {
    fn classify(value: &'a Value) -> Self {
        let Some(body) = value.as_object() else {
            return Self::Unrecognized("payload is not an object");
        };

        if let Some(data) = body.get("data").filter(|d| d.is_object()) {
            return Self::Enveloped {
                symbol: string_field(body, SYMBOL_FIELDS),
                data,
            };
        }
        if let Some(nbbo) = body.get("nbbo").and_then(Value::as_object) {
            return Self::Nbbo { body, nbbo };
        }
        if field(body, BID_FIELDS).is_some() || field(body, ASK_FIELDS).is_some() {
            return Self::Flat(body);
        }
        if field(body, PRICE_FIELDS).is_some() {
            return Self::PriceOnly(body);
        }
        Self::Unrecognized("no price fields")
    }
}

/// Message types that carry quotes. Any other `type` marks a control frame
/// (subscription ack, error) that must not touch the quote table.
const QUOTE_TYPES: &[&str] = &["market_data", "quote", "nbbo"];

/// Whether a quote feed message is meant to update the quote table.
#[must_use]
pub fn carries_quote(value: &Value) -> bool {
    value
        .get("type")
        .and_then(Value::as_str)
        .is_none_or(|kind| QUOTE_TYPES.iter().any(|t| kind.eq_ignore_ascii_case(t)))
}

/// Normalize a quote payload. The symbol must be carried by the payload.
#[must_use]
pub fn normalize_quote(value: &Value, received_at: DateTime<Utc>) -> QuoteRecord {
    normalize(value, None, received_at, 0)
}

/// Normalize a quote payload from a feed subscribed to `symbol`.
///
/// `symbol` is used when the payload does not name one.
#[must_use]
pub fn normalize_quote_for(value: &Value, symbol: &str, received_at: DateTime<Utc>) -> QuoteRecord {
    normalize(value, Some(symbol.to_string()), received_at, 0)
}

fn normalize(
    value: &Value,
    inherited: Option<String>,
    received_at: DateTime<Utc>,
    depth: usize,
) -> QuoteRecord {
    match QuoteShape::classify(value) {
        QuoteShape::Enveloped { symbol, data } => {
            if depth >= MAX_ENVELOPE_DEPTH {
                return unavailable(symbol.or(inherited), "envelope nested too deeply");
            }
            normalize(data, symbol.or(inherited), received_at, depth + 1)
        }
        QuoteShape::Nbbo { body, nbbo } => {
            let fields = QuoteFields {
                bid: decimal_field(nbbo, BID_FIELDS).or_else(|| decimal_field(body, BID_FIELDS)),
                ask: decimal_field(nbbo, ASK_FIELDS).or_else(|| decimal_field(body, ASK_FIELDS)),
                bid_size: quantity_field(nbbo, BID_SIZE_FIELDS)
                    .or_else(|| quantity_field(body, BID_SIZE_FIELDS)),
                ask_size: quantity_field(nbbo, ASK_SIZE_FIELDS)
                    .or_else(|| quantity_field(body, ASK_SIZE_FIELDS)),
                rejection: price_rejection(&[nbbo, body]),
                ..QuoteFields::from_body(body)
            };
            fields.build(string_field(body, SYMBOL_FIELDS).or(inherited), received_at)
        }
        QuoteShape::Flat(body) | QuoteShape::PriceOnly(body) => QuoteFields {
            bid: decimal_field(body, BID_FIELDS),
            ask: decimal_field(body, ASK_FIELDS),
            bid_size: quantity_field(body, BID_SIZE_FIELDS),
            ask_size: quantity_field(body, ASK_SIZE_FIELDS),
            rejection: price_rejection(&[body]),
            ..QuoteFields::from_body(body)
        }
        .build(string_field(body, SYMBOL_FIELDS).or(inherited), received_at),
        QuoteShape::Unrecognized(reason) => {
            let symbol = value
                .as_object()
                .and_then(|body| string_field(body, SYMBOL_FIELDS))
                .or(inherited);
            unavailable(symbol, reason)
        }
    }
}

#[derive(Default)]
struct QuoteFields {
    bid: Option<Decimal>,
    ask: Option<Decimal>,
    bid_size: Option<u64>,
    ask_size: Option<u64>,
    price: Option<Decimal>,
    change_percent: Option<Decimal>,
    volume: Option<u64>,
    as_of: Option<DateTime<Utc>>,
    /// Set when a price field was present but unusable.
    rejection: Option<&'static str>,
}

impl QuoteFields {
    fn from_body(body: &Map<String, Value>) -> Self {
        Self {
            price: decimal_field(body, PRICE_FIELDS),
            change_percent: field(body, CHANGE_FIELDS).and_then(signed_decimal),
            volume: quantity_field(body, VOLUME_FIELDS),
            as_of: timestamp_field(body, TIME_FIELDS),
            ..Self::default()
        }
    }

    fn build(self, symbol: Option<String>, received_at: DateTime<Utc>) -> QuoteRecord {
        let Some(symbol) = symbol else {
            return unavailable(None, "missing symbol");
        };

        let (bid, ask) = match (self.bid, self.ask, self.price) {
            (Some(bid), Some(ask), _) => (bid, ask),
            (Some(bid), None, reference) => {
                let reference = reference.unwrap_or(bid);
                match half_spread(reference).and_then(|half| reference.checked_add(half)) {
                    Some(ask) => (bid, ask),
                    None => return unavailable(Some(symbol), "price out of range"),
                }
            }
            (None, Some(ask), reference) => {
                let reference = reference.unwrap_or(ask);
                match half_spread(reference).and_then(|half| reference.checked_sub(half)) {
                    Some(bid) => (bid, ask),
                    None => return unavailable(Some(symbol), "price out of range"),
                }
            }
            (None, None, Some(price)) => match half_spread(price)
                .and_then(|half| Some((price.checked_sub(half)?, price.checked_add(half)?)))
            {
                Some(sides) => sides,
                None => return unavailable(Some(symbol), "price out of range"),
            },
            (None, None, None) => {
                let reason = self.rejection.unwrap_or("no price information");
                return unavailable(Some(symbol), reason);
            }
        };

        if bid > ask {
            return unavailable(Some(symbol), format!("crossed quote: bid {bid} > ask {ask}"));
        }

        let price = match self.price {
            Some(price) => price,
            None => match bid.checked_add(ask).and_then(|sum| sum.checked_div(Decimal::TWO)) {
                Some(mid) => mid,
                None => return unavailable(Some(symbol), "price out of range"),
            },
        };

        QuoteRecord::Available(Quote {
            symbol,
            bid,
            ask,
            bid_size: self.bid_size.unwrap_or(0),
            ask_size: self.ask_size.unwrap_or(0),
            price,
            change_percent: self.change_percent.unwrap_or(Decimal::ZERO),
            volume: self.volume,
            as_of: self.as_of.unwrap_or(received_at),
        })
    }
}

fn price_rejection(maps: &[&Map<String, Value>]) -> Option<&'static str> {
    maps.iter()
        .flat_map(|map| {
            [BID_FIELDS, ASK_FIELDS, PRICE_FIELDS]
                .into_iter()
                .filter_map(|names| field(map, names))
        })
        .find_map(decimal_rejection)
}

fn half_spread(reference: Decimal) -> Option<Decimal> {
    reference.checked_mul(SYNTHETIC_HALF_SPREAD)
}

fn unavailable(symbol: Option<String>, reason: impl Into<String>) -> QuoteRecord {
    QuoteRecord::Unavailable {
        symbol,
        reason: reason.into(),
    }
}
