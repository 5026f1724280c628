//! Subscription Book
//!
//! Tracks which WebSocket connections are subscribed to which symbols.
//!
//! # Design
//!
//! The book keeps two indexes that always agree:
//! - symbol to subscriber set, plus the last published tick per symbol
//! - connection to its symbol set
//!
//! A symbol entry exists exactly while its subscriber set is non-empty.
//! The first subscriber of a symbol activates it (the caller starts a
//! quote worker) and the last one to leave deactivates it (the caller
//! stops the worker). The book itself holds no locks; the stream hub
//! owns it behind a single mutex.

use std::collections::{BTreeSet, HashMap, HashSet};

use chrono::{DateTime, Utc};

use crate::domain::market::{Symbol, Tick};

// =============================================================================
// Types
// =============================================================================

/// Unique identifier for a WebSocket connection.
pub type ConnectionId = u64;

/// Per-symbol subscription state.
#[derive(Debug, Clone)]
pub struct SubscriptionEntry {
    /// Subscribed symbol.
    pub symbol: Symbol,
    /// Connections subscribed to the symbol. Never empty.
    pub subscriber_ids: BTreeSet<ConnectionId>,
    /// Last tick fanned out, used for duplicate suppression.
    pub last_tick: Option<Tick>,
    /// When the last tick was fanned out.
    pub last_published_at: Option<DateTime<Utc>>,
}

impl SubscriptionEntry {
    fn new(symbol: Symbol) -> Self {
        Self {
            symbol,
            subscriber_ids: BTreeSet::new(),
            last_tick: None,
            last_published_at: None,
        }
    }
}

/// Result of a subscribe request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeOutcome {
    /// First subscriber; the symbol needs a worker.
    Activated,
    /// Joined an already active symbol.
    Joined,
    /// The connection was already subscribed.
    AlreadySubscribed,
}

/// Result of an unsubscribe request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnsubscribeOutcome {
    /// Last subscriber left; the symbol's worker must stop.
    Deactivated,
    /// Other subscribers remain.
    Left,
    /// The connection was not subscribed.
    NotSubscribed,
}

/// What to do with a tick offered to the book.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickDisposition {
    /// New quote; deliver to these connections.
    Fresh(Vec<ConnectionId>),
    /// Same quote as the last one published.
    Duplicate,
    /// Nobody is subscribed to the symbol anymore.
    Inactive,
}

// =============================================================================
// Subscription Book
// =============================================================================

/// Symbol and connection subscription indexes.
#[derive(Debug, Default)]
pub struct SubscriptionBook {
    entries: HashMap<Symbol, SubscriptionEntry>,
    connections: HashMap<ConnectionId, HashSet<Symbol>>,
}

impl SubscriptionBook {
    /// Create an empty book.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe a connection to a symbol.
    pub fn subscribe(&mut self, connection: ConnectionId, symbol: &Symbol) -> SubscribeOutcome {
        let symbols = self.connections.entry(connection).or_default();
        if !symbols.insert(symbol.clone()) {
            return SubscribeOutcome::AlreadySubscribed;
        }

        let entry = self
            .entries
            .entry(symbol.clone())
            .or_insert_with(|| SubscriptionEntry::new(symbol.clone()));
        let first = entry.subscriber_ids.is_empty();
        entry.subscriber_ids.insert(connection);

        if first {
            SubscribeOutcome::Activated
        } else {
            SubscribeOutcome::Joined
        }
    }

    /// Unsubscribe a connection from a symbol.
    pub fn unsubscribe(&mut self, connection: ConnectionId, symbol: &Symbol) -> UnsubscribeOutcome {
        let Some(symbols) = self.connections.get_mut(&connection) else {
            return UnsubscribeOutcome::NotSubscribed;
        };
        if !symbols.remove(symbol) {
            return UnsubscribeOutcome::NotSubscribed;
        }
        if symbols.is_empty() {
            self.connections.remove(&connection);
        }

        self.detach(connection, symbol)
    }

    /// Remove every subscription held by a connection.
    ///
    /// Returns the symbols that lost their last subscriber.
    pub fn remove_connection(&mut self, connection: ConnectionId) -> Vec<Symbol> {
        let Some(symbols) = self.connections.remove(&connection) else {
            return vec![];
        };

        let mut deactivated: Vec<Symbol> = symbols
            .into_iter()
            .filter(|symbol| self.detach(connection, symbol) == UnsubscribeOutcome::Deactivated)
            .collect();
        deactivated.sort();
        deactivated
    }

    /// Offer a tick for fan-out.
    ///
    /// Identical quotes are suppressed. A fresh tick becomes the symbol's
    /// last tick and the current subscriber list is returned.
    pub fn record_tick(&mut self, tick: Tick) -> TickDisposition {
        let Some(entry) = self.entries.get_mut(&tick.symbol) else {
            return TickDisposition::Inactive;
        };

        if entry
            .last_tick
            .as_ref()
            .is_some_and(|last| last.same_quote(&tick))
        {
            return TickDisposition::Duplicate;
        }

        entry.last_published_at = Some(tick.timestamp);
        entry.last_tick = Some(tick);
        TickDisposition::Fresh(entry.subscriber_ids.iter().copied().collect())
    }

    /// Connections subscribed to a symbol.
    #[must_use]
    pub fn subscribers(&self, symbol: &Symbol) -> Vec<ConnectionId> {
        self.entries
            .get(symbol)
            .map(|entry| entry.subscriber_ids.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Symbols a connection is subscribed to, sorted.
    #[must_use]
    pub fn symbols_for(&self, connection: ConnectionId) -> Vec<Symbol> {
        let mut symbols: Vec<Symbol> = self
            .connections
            .get(&connection)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default();
        symbols.sort();
        symbols
    }

    /// Symbols with at least one subscriber, sorted.
    #[must_use]
    pub fn active_symbols(&self) -> Vec<Symbol> {
        let mut symbols: Vec<Symbol> = self.entries.keys().cloned().collect();
        symbols.sort();
        symbols
    }

    /// Entry for a symbol, if active.
    #[must_use]
    pub fn entry(&self, symbol: &Symbol) -> Option<&SubscriptionEntry> {
        self.entries.get(symbol)
    }

    /// Book statistics.
    #[must_use]
    pub fn stats(&self) -> SubscriptionStats {
        SubscriptionStats {
            symbol_count: self.entries.len(),
            connection_count: self.connections.len(),
        }
    }

    fn detach(&mut self, connection: ConnectionId, symbol: &Symbol) -> UnsubscribeOutcome {
        let Some(entry) = self.entries.get_mut(symbol) else {
            return UnsubscribeOutcome::NotSubscribed;
        };
        entry.subscriber_ids.remove(&connection);

        if entry.subscriber_ids.is_empty() {
            self.entries.remove(symbol);
            UnsubscribeOutcome::Deactivated
        } else {
            UnsubscribeOutcome::Left
        }
    }
}

/// Subscription counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriptionStats {
    /// Active symbols.
    pub symbol_count: usize,
    /// Connections holding at least one subscription.
    pub connection_count: usize,
}

// =============================================================================
// Tests
// =============================================================================
