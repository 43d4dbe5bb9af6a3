//! Order Events
//!
//! Canonical order record produced from the order feed and the polled
//! orders list, plus the live order board that folds feed events into the
//! latest known state per order.

use std::collections::{HashMap, VecDeque};
use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

/// Default number of orders tracked by the live order board.
pub const DEFAULT_TRACKED_ORDERS: usize = 500;

// =============================================================================
// Enums
// =============================================================================

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Side {
    /// Buy order.
    Buy,
    /// Sell order.
    Sell,
}

impl Side {
    /// Parse an upstream side string (case-insensitive).
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "BUY" | "B" => Some(Self::Buy),
            "SELL" | "S" => Some(Self::Sell),
            _ => None,
        }
    }
}

/// Order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    /// Market order.
    Market,
    /// Limit order.
    Limit,
    /// Stop order.
    Stop,
    /// Stop-limit order.
    StopLimit,
    /// Trailing stop order.
    TrailingStop,
    /// Trailing stop-limit order.
    TrailingStopLimit,
    /// One-cancels-other order.
    Oco,
    /// Bracket order.
    Bracket,
    /// Type not known to this client.
    Unknown,
}

impl OrderType {
    /// Parse an upstream order type; anything unrecognized is `Unknown`.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().replace(['-', ' '], "_").as_str() {
            "MARKET" => Self::Market,
            "LIMIT" => Self::Limit,
            "STOP" => Self::Stop,
            "STOP_LIMIT" => Self::StopLimit,
            "TRAILING_STOP" => Self::TrailingStop,
            "TRAILING_STOP_LIMIT" => Self::TrailingStopLimit,
            "OCO" => Self::Oco,
            "BRACKET" => Self::Bracket,
            _ => Self::Unknown,
        }
    }
}

/// Order status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Accepted, working.
    New,
    /// Partially filled.
    Partial,
    /// Completely filled.
    Filled,
    /// Rejected by the broker.
    Rejected,
    /// Canceled.
    Canceled,
    /// Conditional order waiting for its trigger.
    StopPending,
    /// Trigger hit; about to become a working order.
    Triggered,
}

impl OrderStatus {
    /// Parse an upstream status string.
    ///
    /// `PENDING` (conditional orders) is folded into `StopPending`.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "NEW" | "ACCEPTED" => Some(Self::New),
            "PARTIAL" | "PARTIALLY_FILLED" => Some(Self::Partial),
            "FILLED" => Some(Self::Filled),
            "REJECTED" => Some(Self::Rejected),
            "CANCELED" | "CANCELLED" => Some(Self::Canceled),
            "STOP_PENDING" | "PENDING" => Some(Self::StopPending),
            "TRIGGERED" => Some(Self::Triggered),
            _ => None,
        }
    }

    /// Whether no further transition is possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Filled | Self::Rejected | Self::Canceled)
    }

    /// Position along the forward path `StopPending -> Triggered -> New -> Partial -> Filled`.
    const fn rank(self) -> u8 {
        match self {
            Self::StopPending => 0,
            Self::Triggered => 1,
            Self::New => 2,
            Self::Partial => 3,
            Self::Filled | Self::Rejected | Self::Canceled => 4,
        }
    }

    /// Whether moving from `self` to `next` respects status monotonicity.
    ///
    /// Terminal statuses accept nothing. `Canceled` and `Rejected` are
    /// reachable from any live status. Otherwise the status may only stay
    /// put or move forward.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            Self::Canceled | Self::Rejected => true,
            _ => next.rank() >= self.rank(),
        }
    }

    /// Upstream string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::Partial => "PARTIAL",
            Self::Filled => "FILLED",
            Self::Rejected => "REJECTED",
            Self::Canceled => "CANCELED",
            Self::StopPending => "STOP_PENDING",
            Self::Triggered => "TRIGGERED",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Order Event
// =============================================================================

/// Canonical order record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderEvent {
    /// Broker order id.
    pub id: String,
    /// Instrument symbol.
    pub symbol: String,
    /// Buy or sell.
    pub side: Side,
    /// Order type.
    pub order_type: OrderType,
    /// Ordered quantity.
    pub qty: u64,
    /// Filled quantity, never above `qty`.
    pub filled_qty: u64,
    /// Current status.
    pub status: OrderStatus,
    /// Limit price.
    pub limit_price: Option<Decimal>,
    /// Stop price.
    pub stop_price: Option<Decimal>,
    /// Average fill price.
    pub avg_price: Option<Decimal>,
    /// When the broker created the order.
    pub created_at: DateTime<Utc>,
}

/// Fields required to build an [`OrderEvent`].
#[derive(Debug, Clone)]
pub struct OrderFields {
    /// Broker order id.
    pub id: String,
    /// Instrument symbol.
    pub symbol: String,
    /// Buy or sell.
    pub side: Side,
    /// Order type.
    pub order_type: OrderType,
    /// Ordered quantity.
    pub qty: u64,
    /// Filled quantity.
    pub filled_qty: u64,
    /// Current status.
    pub status: OrderStatus,
    /// Limit price.
    pub limit_price: Option<Decimal>,
    /// Stop price.
    pub stop_price: Option<Decimal>,
    /// Average fill price.
    pub avg_price: Option<Decimal>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl OrderEvent {
    /// Build an order, enforcing `filled_qty <= qty` and non-empty identity.
    ///
    /// # Errors
    ///
    /// Returns `OrderError` if the id or symbol is empty or the fill
    /// quantity exceeds the order quantity.
    pub fn new(fields: OrderFields) -> Result<Self, OrderError> {
        if fields.id.trim().is_empty() {
            return Err(OrderError::MissingId);
        }
        if fields.symbol.trim().is_empty() {
            return Err(OrderError::MissingSymbol);
        }
        if fields.filled_qty > fields.qty {
            return Err(OrderError::Overfilled {
                filled: fields.filled_qty,
                qty: fields.qty,
            });
        }

        Ok(Self {
            id: fields.id,
            symbol: fields.symbol,
            side: fields.side,
            order_type: fields.order_type,
            qty: fields.qty,
            filled_qty: fields.filled_qty,
            status: fields.status,
            limit_price: fields.limit_price,
            stop_price: fields.stop_price,
            avg_price: fields.avg_price,
            created_at: fields.created_at,
        })
    }

    /// Quantity still open.
    #[must_use]
    pub const fn leaves_qty(&self) -> u64 {
        self.qty.saturating_sub(self.filled_qty)
    }
}

/// Order validation errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OrderError {
    /// Order id missing or blank.
    #[error("order id is missing")]
    MissingId,

    /// Symbol missing or blank.
    #[error("order symbol is missing")]
    MissingSymbol,

    /// More filled than ordered.
    #[error("filled quantity {filled} exceeds order quantity {qty}")]
    Overfilled {
        /// Filled quantity.
        filled: u64,
        /// Ordered quantity.
        qty: u64,
    },
}

// =============================================================================
// Live Order Board
// =============================================================================

/// Result of applying an order event to the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackOutcome {
    /// First event seen for this order.
    Inserted,
    /// Existing order advanced.
    Updated,
    /// Event would move the order backwards and was ignored.
    Stale,
}

/// Latest known state of each order seen on the order feed.
///
/// Bounded by insertion order; the oldest order is forgotten first.
#[derive(Debug, Clone)]
pub struct OrderTracker {
    orders: HashMap<String, OrderEvent>,
    arrival: VecDeque<String>,
    capacity: usize,
}

impl OrderTracker {
    /// Create an empty board tracking at most `capacity` orders.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            orders: HashMap::new(),
            arrival: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Fold an event into the board.
    pub fn apply(&mut self, event: OrderEvent) -> TrackOutcome {
        if let Some(current) = self.orders.get_mut(&event.id) {
            let forward = current.status == event.status
                || current.status.can_transition_to(event.status);
            if !forward || event.filled_qty < current.filled_qty {
                return TrackOutcome::Stale;
            }
            *current = event;
            return TrackOutcome::Updated;
        }

        if self.arrival.len() >= self.capacity
            && let Some(oldest) = self.arrival.pop_front()
        {
            self.orders.remove(&oldest);
        }
        self.arrival.push_back(event.id.clone());
        self.orders.insert(event.id.clone(), event);
        TrackOutcome::Inserted
    }

    /// Look up one order.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&OrderEvent> {
        self.orders.get(id)
    }

    /// Copy of all tracked orders, most recently first seen first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<OrderEvent> {
        self.arrival
            .iter()
            .rev()
            .filter_map(|id| self.orders.get(id).cloned())
            .collect()
    }

    /// Number of tracked orders.
    #[must_use]
    pub fn len(&self) -> usize {
        self.orders.len()
    }

    /// Whether no orders are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }
}

impl Default for OrderTracker {
    fn default() -> Self {
        Self::new(DEFAULT_TRACKED_ORDERS)
    }
}

// =============================================================================
// Tests
// =============================================================================
