//! Market Data Types
//!
//! Symbols, quote ticks, and option discovery results exchanged between the
//! gateway adapters, the REST facade, and the stream hub.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Maximum accepted symbol length.
pub const MAX_SYMBOL_LEN: usize = 15;

// =============================================================================
// Symbol
// =============================================================================

/// A validated, upper-cased ticker symbol.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    /// Parse and normalize a raw symbol.
    ///
    /// # Errors
    ///
    /// Returns `SymbolError` if the symbol is empty, too long, or contains
    /// characters outside `[A-Z0-9.-]`.
    pub fn parse(raw: &str) -> Result<Self, SymbolError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(SymbolError::Empty);
        }
        if trimmed.len() > MAX_SYMBOL_LEN {
            return Err(SymbolError::TooLong(MAX_SYMBOL_LEN));
        }

        let normalized = trimmed.to_ascii_uppercase();
        if let Some(c) = normalized
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '.' || *c == '-'))
        {
            return Err(SymbolError::InvalidChar(c));
        }

        Ok(Self(normalized))
    }

    /// Get the symbol as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Symbol {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Symbol validation error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SymbolError {
    /// Symbol was blank.
    #[error("symbol cannot be empty")]
    Empty,
    /// Symbol exceeded the maximum length.
    #[error("symbol cannot exceed {0} characters")]
    TooLong(usize),
    /// Symbol contained an unsupported character.
    #[error("symbol contains invalid character '{0}'")]
    InvalidChar(char),
}

// =============================================================================
// Tick
// =============================================================================

/// A single quote update for a symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tick {
    /// Symbol the quote belongs to.
    pub symbol: Symbol,
    /// Best bid.
    pub bid: Option<Decimal>,
    /// Best ask.
    pub ask: Option<Decimal>,
    /// Last traded price.
    pub last: Option<Decimal>,
    /// Session volume.
    pub volume: Option<Decimal>,
    /// Session high.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub high: Option<Decimal>,
    /// Session low.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub low: Option<Decimal>,
    /// Prior close.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub close: Option<Decimal>,
    /// Time the tick was observed.
    pub timestamp: DateTime<Utc>,
}

impl Tick {
    /// Create an empty tick for a symbol.
    #[must_use]
    pub const fn empty(symbol: Symbol, timestamp: DateTime<Utc>) -> Self {
        Self {
            symbol,
            bid: None,
            ask: None,
            last: None,
            volume: None,
            high: None,
            low: None,
            close: None,
            timestamp,
        }
    }

    /// Whether two ticks carry the same prices and volume.
    ///
    /// Timestamps are ignored so a re-polled unchanged quote compares equal.
    #[must_use]
    pub fn same_quote(&self, other: &Self) -> bool {
        self.symbol == other.symbol
            && self.bid == other.bid
            && self.ask == other.ask
            && self.last == other.last
            && self.volume == other.volume
    }

    /// Whether the tick carries any price at all.
    #[must_use]
    pub const fn has_prices(&self) -> bool {
        self.bid.is_some() || self.ask.is_some() || self.last.is_some()
    }
}

// =============================================================================
// Options
// =============================================================================

/// Option discovery result for an underlying.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionSearch {
    /// Underlying symbol.
    pub symbol: Symbol,
    /// Gateway contract id of the underlying.
    pub conid: i64,
    /// Listed expiry months in gateway notation (e.g. `JAN26`).
    pub expiry_months: Vec<String>,
}

/// Strikes listed for one underlying and expiry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionChain {
    /// Underlying symbol.
    pub symbol: Symbol,
    /// Requested expiry.
    pub expiry: NaiveDate,
    /// Call strikes.
    pub calls: Vec<Decimal>,
    /// Put strikes.
    pub puts: Vec<Decimal>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_is_normalized() {
        let symbol = Symbol::parse(" aapl ").unwrap();
        assert_eq!(symbol.as_str(), "AAPL");
        assert_eq!(Symbol::parse("brk.b").unwrap().as_str(), "BRK.B");
    }

    #[test]
    fn symbol_rejects_bad_input() {
        assert_eq!(Symbol::parse("   "), Err(SymbolError::Empty));
        assert_eq!(
            Symbol::parse("ABCDEFGHIJKLMNOP"),
            Err(SymbolError::TooLong(MAX_SYMBOL_LEN))
        );
        assert_eq!(Symbol::parse("AA PL"), Err(SymbolError::InvalidChar(' ')));
        assert_eq!(Symbol::parse("AAPL$"), Err(SymbolError::InvalidChar('$')));
    }

    #[test]
    fn symbol_deserializes_through_validation() {
        let symbol: Symbol = serde_json::from_str("\"msft\"").unwrap();
        assert_eq!(symbol.as_str(), "MSFT");
        assert!(serde_json::from_str::<Symbol>("\"\"").is_err());
    }

    #[test]
    fn same_quote_ignores_timestamp() {
        let symbol = Symbol::parse("AAPL").unwrap();
        let mut a = Tick::empty(symbol, Utc::now());
        a.bid = Some(Decimal::new(18940, 2));
        a.ask = Some(Decimal::new(18960, 2));
        let mut b = a.clone();
        b.timestamp = a.timestamp + chrono::Duration::seconds(5);
        assert!(a.same_quote(&b));

        b.last = Some(Decimal::new(18950, 2));
        assert!(!a.same_quote(&b));
    }

    #[test]
    fn empty_tick_has_no_prices() {
        let tick = Tick::empty(Symbol::parse("SPY").unwrap(), Utc::now());
        assert!(!tick.has_prices());
    }
}
