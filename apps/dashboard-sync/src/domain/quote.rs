//! Quotes and the Quote Table
//!
//! `QuoteRecord` is either a priced quote satisfying `bid <= ask` or an
//! explicit `Unavailable` marker. Missing prices are never represented as
//! zero since zero is a legitimate price.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

/// Instrument symbol.
pub type Symbol = String;

// =============================================================================
// Quote Record
// =============================================================================

/// A priced top-of-book quote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Quote {
    /// Instrument symbol.
    pub symbol: Symbol,
    /// Best bid.
    pub bid: Decimal,
    /// Best ask, never below `bid`.
    pub ask: Decimal,
    /// Size at the bid.
    pub bid_size: u64,
    /// Size at the ask.
    pub ask_size: u64,
    /// Last or reference price.
    pub price: Decimal,
    /// Percent change on the session.
    pub change_percent: Decimal,
    /// Session volume, when reported.
    pub volume: Option<u64>,
    /// Quote time.
    pub as_of: DateTime<Utc>,
}

impl Quote {
    /// Ask minus bid.
    #[must_use]
    pub fn spread(&self) -> Decimal {
        self.ask - self.bid
    }
}

/// Normalized quote for one symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum QuoteRecord {
    /// Priced quote.
    Available(Quote),
    /// No usable price information.
    Unavailable {
        /// Symbol, if the payload carried one.
        symbol: Option<Symbol>,
        /// Why the payload could not be priced.
        reason: String,
    },
}

impl QuoteRecord {
    /// Symbol carried by the record, if any.
    #[must_use]
    pub fn symbol(&self) -> Option<&str> {
        match self {
            Self::Available(quote) => Some(&quote.symbol),
            Self::Unavailable { symbol, .. } => symbol.as_deref(),
        }
    }

    /// The priced quote, if available.
    #[must_use]
    pub const fn as_quote(&self) -> Option<&Quote> {
        match self {
            Self::Available(quote) => Some(quote),
            Self::Unavailable { .. } => None,
        }
    }

    /// Whether the record carries a price.
    #[must_use]
    pub const fn is_available(&self) -> bool {
        matches!(self, Self::Available(_))
    }
}

// =============================================================================
// Quote Table
// =============================================================================

/// One row of the quote table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuoteEntry {
    /// Latest record, absent until the first message arrives.
    pub record: Option<QuoteRecord>,
    /// Whether the symbol's feed is currently open.
    pub connected: bool,
}

/// Symbol to latest quote, last write wins.
#[derive(Debug, Clone, Default)]
pub struct QuoteTable {
    entries: HashMap<Symbol, QuoteEntry>,
}

impl QuoteTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the record for `symbol`.
    pub fn update(&mut self, symbol: &str, record: QuoteRecord) {
        self.entry(symbol).record = Some(record);
    }

    /// Record whether the feed for `symbol` is open.
    pub fn set_connectivity(&mut self, symbol: &str, connected: bool) {
        self.entry(symbol).connected = connected;
    }

    /// Whether the feed for `symbol` is open.
    #[must_use]
    pub fn connectivity(&self, symbol: &str) -> bool {
        self.entries.get(symbol).is_some_and(|entry| entry.connected)
    }

    /// Latest record for `symbol`.
    #[must_use]
    pub fn get(&self, symbol: &str) -> Option<&QuoteRecord> {
        self.entries.get(symbol).and_then(|entry| entry.record.as_ref())
    }

    /// Drop every symbol outside `symbols`. Used on resubscription.
    pub fn retain_symbols(&mut self, symbols: &[Symbol]) {
        let keep: HashSet<&str> = symbols.iter().map(String::as_str).collect();
        self.entries.retain(|symbol, _| keep.contains(symbol.as_str()));
    }

    /// Copy of the table, ordered by symbol.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<Symbol, QuoteEntry> {
        self.entries
            .iter()
            .map(|(symbol, entry)| (symbol.clone(), entry.clone()))
            .collect()
    }

    /// Number of symbols in the table.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn entry(&mut self, symbol: &str) -> &mut QuoteEntry {
        self.entries
            .entry(symbol.to_string())
            .or_insert(QuoteEntry {
                record: None,
                connected: false,
            })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn quote(symbol: &str, bid: i64, ask: i64) -> QuoteRecord {
        QuoteRecord::Available(Quote {
            symbol: symbol.to_string(),
            bid: Decimal::new(bid, 2),
            ask: Decimal::new(ask, 2),
            bid_size: 100,
            ask_size: 200,
            price: Decimal::new((bid + ask) / 2, 2),
            change_percent: Decimal::ZERO,
            volume: None,
            as_of: Utc::now(),
        })
    }

    #[test]
    fn aapl_quote_spread() {
        let mut table = QuoteTable::new();
        table.update("AAPL", quote("AAPL", 9995, 10005));

        let snapshot = table.snapshot();
        let entry = snapshot["AAPL"].record.as_ref().unwrap().as_quote().unwrap();
        assert_eq!(entry.bid, Decimal::new(9995, 2));
        assert_eq!(entry.ask, Decimal::new(10005, 2));
        assert_eq!(entry.spread(), Decimal::new(10, 2));
    }

    #[test]
    fn connectivity_defaults_to_false() {
        let mut table = QuoteTable::new();
        assert!(!table.connectivity("MSFT"));

        table.set_connectivity("MSFT", true);
        assert!(table.connectivity("MSFT"));
        assert!(table.get("MSFT").is_none());
    }

    #[test]
    fn update_keeps_connectivity() {
        let mut table = QuoteTable::new();
        table.set_connectivity("SPY", true);
        table.update("SPY", quote("SPY", 100, 101));

        assert!(table.connectivity("SPY"));
    }

    #[test]
    fn snapshot_is_detached_copy() {
        let mut table = QuoteTable::new();
        table.update("AAPL", quote("AAPL", 100, 101));
        let before = table.snapshot();

        table.update("AAPL", quote("AAPL", 200, 201));

        let kept = before["AAPL"].record.as_ref().unwrap().as_quote().unwrap();
        assert_eq!(kept.bid, Decimal::new(100, 2));
    }

    #[test]
    fn retain_symbols_drops_others() {
        let mut table = QuoteTable::new();
        table.update("AAPL", quote("AAPL", 100, 101));
        table.update("MSFT", quote("MSFT", 100, 101));

        table.retain_symbols(&["MSFT".to_string(), "SPY".to_string()]);

        assert_eq!(table.len(), 1);
        assert!(table.get("AAPL").is_none());
        assert!(table.get("MSFT").is_some());
    }

    #[test]
    fn unavailable_record_serializes_state() {
        let record = QuoteRecord::Unavailable {
            symbol: Some("TSLA".to_string()),
            reason: "no price fields".to_string(),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["state"], "unavailable");
        assert_eq!(record.symbol(), Some("TSLA"));
        assert!(!record.is_available());
    }

    proptest! {
        #[test]
        fn last_write_wins_per_symbol(
            updates in prop::collection::vec((0usize..4, 1i64..1_000_000), 1..100),
        ) {
            let symbols = ["AAPL", "MSFT", "SPY", "QQQ"];
            let mut table = QuoteTable::new();
            let mut expected: HashMap<&str, QuoteRecord> = HashMap::new();

            for (index, bid) in updates {
                let record = quote(symbols[index], bid, bid + 1);
                table.update(symbols[index], record.clone());
                expected.insert(symbols[index], record);
            }

            let snapshot = table.snapshot();
            for (symbol, record) in expected {
                prop_assert_eq!(snapshot[symbol].record.as_ref(), Some(&record));
            }
        }
    }
}
