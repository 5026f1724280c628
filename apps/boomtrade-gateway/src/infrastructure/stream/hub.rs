//! Stream Hub
//!
//! Owns the subscription book, the connection registry and one worker per
//! active symbol. Workers publish ticks through the hub, which deduplicates
//! them and fans each fresh tick out to every subscriber exactly once.
//!
//! # Locking
//!
//! The book and the worker table sit behind one mutex. Acknowledgements
//! are queued while it is held so they always precede the first tick of a
//! new subscription. Tick fan-out happens after the lock is released.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::protocol::{
    CLOSE_GOING_AWAY, CLOSE_POLICY, OVERFLOW_REASON, SHUTDOWN_REASON, ServerMessage,
};
use super::registry::{CloseReason, ConnectionRegistry, DeliveryError, Registration};
use super::worker::SymbolWorker;
use crate::application::ports::QuoteSource;
use crate::domain::market::{Symbol, Tick};
use crate::domain::session::SessionState;
use crate::domain::subscription::{
    ConnectionId, SubscribeOutcome, SubscriptionBook, SubscriptionStats, TickDisposition,
    UnsubscribeOutcome,
};
use crate::infrastructure::metrics::{self, DropReason};

// =============================================================================
// Configuration
// =============================================================================

/// Stream hub settings.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Minimum interval between fan-outs per symbol.
    pub min_interval: Duration,
    /// Per-connection send buffer capacity.
    pub client_buffer: usize,
    /// How long a worker polls before trying push delivery again.
    pub push_retry: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_secs(1),
            client_buffer: 64,
            push_retry: Duration::from_secs(30),
        }
    }
}

/// Hub errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum HubError {
    /// The hub no longer accepts connections or subscriptions.
    #[error("stream hub is shutting down")]
    ShuttingDown,
}

// =============================================================================
// Stream Hub
// =============================================================================

struct HubState {
    book: SubscriptionBook,
    workers: HashMap<Symbol, CancellationToken>,
    accepting: bool,
}

struct HubShared {
    state: Mutex<HubState>,
    registry: ConnectionRegistry,
    tracker: TaskTracker,
    cancel: CancellationToken,
    quotes: Arc<dyn QuoteSource>,
    session: watch::Receiver<SessionState>,
    config: HubConfig,
}

/// Market data fan-out hub. Cheap to clone.
#[derive(Clone)]
pub struct StreamHub {
    shared: Arc<HubShared>,
}

impl StreamHub {
    /// Create a hub fed by `quotes`, gated on `session`.
    #[must_use]
    pub fn new(
        config: HubConfig,
        quotes: Arc<dyn QuoteSource>,
        session: watch::Receiver<SessionState>,
    ) -> Self {
        Self {
            shared: Arc::new(HubShared {
                state: Mutex::new(HubState {
                    book: SubscriptionBook::new(),
                    workers: HashMap::new(),
                    accepting: true,
                }),
                registry: ConnectionRegistry::new(config.client_buffer),
                tracker: TaskTracker::new(),
                cancel: CancellationToken::new(),
                quotes,
                session,
                config,
            }),
        }
    }

    /// Register a new client connection.
    ///
    /// # Errors
    ///
    /// Returns `HubError::ShuttingDown` once shutdown has begun.
    pub fn connect(&self) -> Result<Registration, HubError> {
        let state = self.shared.state.lock();
        if !state.accepting {
            return Err(HubError::ShuttingDown);
        }
        let registration = self.shared.registry.register();
        drop(state);

        metrics::set_ws_clients(self.shared.registry.len());
        tracing::debug!(connection_id = registration.id, "Client connected");
        Ok(registration)
    }

    /// Subscribe a connection to a symbol.
    ///
    /// Queues the `subscribed` acknowledgement, followed by the symbol's
    /// last tick when joining an active symbol. The first subscriber
    /// starts the symbol's worker.
    ///
    /// # Errors
    ///
    /// Returns `HubError::ShuttingDown` once shutdown has begun.
    pub fn subscribe(
        &self,
        connection: ConnectionId,
        symbol: &Symbol,
    ) -> Result<SubscribeOutcome, HubError> {
        let mut state = self.shared.state.lock();
        if !state.accepting {
            return Err(HubError::ShuttingDown);
        }

        let outcome = state.book.subscribe(connection, symbol);
        let mut queued = self.queue(
            connection,
            &ServerMessage::Subscribed {
                symbol: symbol.clone(),
            },
        );

        match outcome {
            SubscribeOutcome::Activated => {
                let cancel = self.shared.cancel.child_token();
                state.workers.insert(symbol.clone(), cancel.clone());
                let worker = SymbolWorker::new(
                    symbol.clone(),
                    self.clone(),
                    Arc::clone(&self.shared.quotes),
                    self.shared.session.clone(),
                    cancel,
                    &self.shared.config,
                );
                self.shared.tracker.spawn(worker.run());
                tracing::info!(%symbol, "Symbol activated");
            }
            SubscribeOutcome::Joined => {
                if let Some(tick) = state.book.entry(symbol).and_then(|e| e.last_tick.clone()) {
                    queued = queued.and_then(|()| self.queue(connection, &ServerMessage::Tick(tick)));
                }
            }
            SubscribeOutcome::AlreadySubscribed => {}
        }

        metrics::set_active_symbols(state.workers.len());
        drop(state);

        if let Err(e) = queued {
            self.handle_delivery_failure(connection, e);
        }
        tracing::debug!(connection_id = connection, %symbol, ?outcome, "Subscribed");
        Ok(outcome)
    }

    /// Unsubscribe a connection from a symbol. The last subscriber stops
    /// the symbol's worker.
    pub fn unsubscribe(&self, connection: ConnectionId, symbol: &Symbol) -> UnsubscribeOutcome {
        let mut state = self.shared.state.lock();
        let outcome = state.book.unsubscribe(connection, symbol);
        if outcome == UnsubscribeOutcome::Deactivated {
            Self::stop_worker(&mut state, symbol);
        }
        let queued = self.queue(
            connection,
            &ServerMessage::Unsubscribed {
                symbol: symbol.clone(),
            },
        );
        metrics::set_active_symbols(state.workers.len());
        drop(state);

        if let Err(e) = queued {
            self.handle_delivery_failure(connection, e);
        }

        tracing::debug!(connection_id = connection, %symbol, ?outcome, "Unsubscribed");
        outcome
    }

    /// Remove a connection and all its subscriptions.
    pub fn disconnect(&self, connection: ConnectionId) {
        let mut state = self.shared.state.lock();
        let deactivated = state.book.remove_connection(connection);
        for symbol in &deactivated {
            Self::stop_worker(&mut state, symbol);
        }
        metrics::set_active_symbols(state.workers.len());
        drop(state);

        if self.shared.registry.unregister(connection) {
            metrics::set_ws_clients(self.shared.registry.len());
            tracing::debug!(connection_id = connection, "Client disconnected");
        }
    }

    fn stop_worker(state: &mut HubState, symbol: &Symbol) {
        if let Some(cancel) = state.workers.remove(symbol) {
            cancel.cancel();
            tracing::info!(%symbol, "Symbol deactivated");
        }
    }

    /// Queue a message for one connection. A full buffer drops the
    /// connection.
    pub fn send_to(&self, connection: ConnectionId, message: &ServerMessage) {
        if let Err(e) = self.queue(connection, message) {
            self.handle_delivery_failure(connection, e);
        }
    }

    // Never takes the state lock.
    fn queue(&self, connection: ConnectionId, message: &ServerMessage) -> Result<(), DeliveryError> {
        match message.to_json() {
            Ok(json) => self.shared.registry.deliver(connection, Arc::from(json)),
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode server message");
                Ok(())
            }
        }
    }

    /// Offer a tick for fan-out. Returns the number of connections it was
    /// queued for.
    pub fn publish(&self, tick: Tick) -> usize {
        let disposition = self.shared.state.lock().book.record_tick(tick.clone());

        let recipients = match disposition {
            TickDisposition::Fresh(recipients) => recipients,
            TickDisposition::Duplicate => {
                metrics::record_tick_deduplicated();
                return 0;
            }
            TickDisposition::Inactive => return 0,
        };

        let symbol = tick.symbol.clone();
        let json: Arc<str> = match ServerMessage::Tick(tick).to_json() {
            Ok(json) => Arc::from(json),
            Err(e) => {
                tracing::error!(%symbol, error = %e, "Failed to encode tick");
                return 0;
            }
        };

        let mut delivered = 0;
        for connection in recipients {
            match self.shared.registry.deliver(connection, Arc::clone(&json)) {
                Ok(()) => delivered += 1,
                Err(e) => self.handle_delivery_failure(connection, e),
            }
        }

        metrics::record_ticks_delivered(delivered as u64);
        delivered
    }

    fn handle_delivery_failure(&self, connection: ConnectionId, error: DeliveryError) {
        match error {
            DeliveryError::Full => {
                tracing::warn!(connection_id = connection, "Send buffer overflow, dropping client");
                self.shared.registry.close_now(
                    connection,
                    CloseReason {
                        code: CLOSE_POLICY,
                        reason: OVERFLOW_REASON,
                    },
                );
                metrics::record_connection_dropped(DropReason::Overflow);
            }
            DeliveryError::Closed => {
                tracing::debug!(connection_id = connection, "Client went away");
                metrics::record_connection_dropped(DropReason::Closed);
            }
        }
        self.disconnect(connection);
    }

    /// Spawn a connection-scoped task that shutdown waits for.
    pub fn track<F>(&self, task: F) -> tokio::task::JoinHandle<F::Output>
    where
        F: std::future::Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.shared.tracker.spawn(task)
    }

    /// Stop accepting, notify and close every client, stop every worker,
    /// then wait for tracked tasks to finish.
    pub async fn shutdown(&self) {
        let workers: Vec<CancellationToken> = {
            let mut state = self.shared.state.lock();
            state.accepting = false;
            state.workers.drain().map(|(_, cancel)| cancel).collect()
        };

        let farewell: Option<Arc<str>> = ServerMessage::Shutdown.to_json().ok().map(Arc::from);
        let going_away = CloseReason {
            code: CLOSE_GOING_AWAY,
            reason: SHUTDOWN_REASON,
        };
        let ids = self.shared.registry.ids();
        tracing::info!(clients = ids.len(), symbols = workers.len(), "Stream hub shutting down");

        for id in ids {
            match &farewell {
                Some(text) => self
                    .shared
                    .registry
                    .close_after_pending(id, Arc::clone(text), going_away),
                None => self.shared.registry.close_now(id, going_away),
            }
            metrics::record_connection_dropped(DropReason::Shutdown);
        }

        for cancel in workers {
            cancel.cancel();
        }
        self.shared.cancel.cancel();

        self.shared.tracker.close();
        self.shared.tracker.wait().await;
        metrics::set_active_symbols(0);
        tracing::info!("Stream hub stopped");
    }

    /// Whether the hub still accepts connections.
    #[must_use]
    pub fn is_accepting(&self) -> bool {
        self.shared.state.lock().accepting
    }

    /// Whether a symbol currently has a worker.
    #[must_use]
    pub fn is_active(&self, symbol: &Symbol) -> bool {
        self.shared.state.lock().workers.contains_key(symbol)
    }

    /// Subscription counts.
    #[must_use]
    pub fn stats(&self) -> SubscriptionStats {
        self.shared.state.lock().book.stats()
    }

    /// Number of registered connections.
    #[must_use]
    pub fn client_count(&self) -> usize {
        self.shared.registry.len()
    }
}
