//! Symbol Worker
//!
//! One task per active symbol. While the gateway session is ready it
//! prefers a push stream and falls back to polling snapshots; either way
//! ticks reach the hub at most once per minimum interval.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::hub::{HubConfig, StreamHub};
use crate::application::ports::QuoteSource;
use crate::domain::market::{Symbol, Tick};
use crate::domain::session::SessionState;
use crate::infrastructure::metrics::{self, TickSource};

/// Quote pump for a single symbol.
pub struct SymbolWorker {
    symbol: Symbol,
    hub: StreamHub,
    quotes: Arc<dyn QuoteSource>,
    session: watch::Receiver<SessionState>,
    cancel: CancellationToken,
    min_interval: Duration,
    push_retry: Duration,
}

impl SymbolWorker {
    /// Create a worker. It does nothing until `run` is awaited.
    #[must_use]
    pub fn new(
        symbol: Symbol,
        hub: StreamHub,
        quotes: Arc<dyn QuoteSource>,
        session: watch::Receiver<SessionState>,
        cancel: CancellationToken,
        config: &HubConfig,
    ) -> Self {
        Self {
            symbol,
            hub,
            quotes,
            session,
            cancel,
            min_interval: config.min_interval,
            push_retry: config.push_retry,
        }
    }

    /// Pump quotes until cancelled.
    pub async fn run(mut self) {
        tracing::debug!(symbol = %self.symbol, "Symbol worker started");

        while self.wait_until_ready().await {
            if let Some(rx) = self.quotes.open_push(&self.symbol).await {
                tracing::debug!(symbol = %self.symbol, "Streaming from push feed");
                self.stream(rx).await;
                // A cancelled worker may already have a successor for the
                // same symbol; the dropped receiver lets the feed clean up.
                if !self.cancel.is_cancelled() {
                    self.quotes.close_push(&self.symbol).await;
                }
            } else {
                self.poll(self.push_retry).await;
            }
        }

        tracing::debug!(symbol = %self.symbol, "Symbol worker stopped");
    }

    /// Block until the session is ready. Returns false when cancelled.
    async fn wait_until_ready(&mut self) -> bool {
        loop {
            if self.cancel.is_cancelled() {
                return false;
            }
            if self.session.borrow_and_update().is_ready() {
                return true;
            }
            tokio::select! {
                () = self.cancel.cancelled() => return false,
                changed = self.session.changed() => {
                    if changed.is_err() {
                        return false;
                    }
                }
            }
        }
    }

    fn ready(&self) -> bool {
        self.session.borrow().is_ready()
    }

    /// Poll snapshots every `min_interval` for up to `window`, or until
    /// the session stops being ready.
    async fn poll(&self, window: Duration) {
        let deadline = Instant::now() + window;
        let mut interval = tokio::time::interval(self.min_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return,
                _ = interval.tick() => {}
            }
            if !self.ready() {
                return;
            }

            let result = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return,
                result = self.quotes.snapshot(&self.symbol) => result,
            };
            match result {
                Ok(tick) => {
                    metrics::record_tick_received(TickSource::Poll);
                    self.hub.publish(tick);
                }
                Err(e) => {
                    tracing::debug!(symbol = %self.symbol, error = %e, "Snapshot failed");
                }
            }

            if Instant::now() >= deadline {
                return;
            }
        }
    }

    /// Forward push updates, keeping only the latest tick within each
    /// `min_interval` window.
    async fn stream(&mut self, mut rx: mpsc::Receiver<Tick>) {
        let mut pending: Option<Tick> = None;
        let mut last_sent: Option<Instant> = None;
        let flush = tokio::time::sleep(Duration::ZERO);
        tokio::pin!(flush);

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return,
                changed = self.session.changed() => {
                    if changed.is_err() || !self.session.borrow_and_update().is_ready() {
                        return;
                    }
                }
                () = &mut flush, if pending.is_some() => {
                    if let Some(tick) = pending.take() {
                        self.hub.publish(tick);
                        last_sent = Some(Instant::now());
                    }
                }
                update = rx.recv() => {
                    let Some(tick) = update else {
                        tracing::debug!(symbol = %self.symbol, "Push stream closed, falling back to polling");
                        return;
                    };
                    metrics::record_tick_received(TickSource::Push);
                    if pending.replace(tick).is_none() {
                        let now = Instant::now();
                        let due = last_sent.map_or(now, |at| (at + self.min_interval).max(now));
                        flush.as_mut().reset(due);
                    }
                }
            }
        }
    }
}
