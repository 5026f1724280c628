//! Stream hub fan-out through real symbol workers.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use boomtrade_gateway::infrastructure::stream::protocol::{CLOSE_GOING_AWAY, CLOSE_POLICY};
use boomtrade_gateway::infrastructure::stream::{Outbound, Registration};
use boomtrade_gateway::{GatewayError, HubConfig, QuoteSource, SessionState, StreamHub, Symbol, Tick};
use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde_json::Value;
use tokio::sync::{mpsc, watch};

/// Returns a new price on every poll and counts polls per symbol.
#[derive(Default)]
struct CountingQuotes {
    polls: Mutex<HashMap<Symbol, u32>>,
}

impl CountingQuotes {
    fn polls(&self, symbol: &str) -> u32 {
        self.polls
            .lock()
            .get(&Symbol::parse(symbol).unwrap())
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl QuoteSource for CountingQuotes {
    async fn snapshot(&self, symbol: &Symbol) -> Result<Tick, GatewayError> {
        let n = {
            let mut polls = self.polls.lock();
            let n = polls.entry(symbol.clone()).or_default();
            *n += 1;
            *n
        };
        let mut tick = Tick::empty(symbol.clone(), Utc::now());
        tick.last = Some(Decimal::from(n));
        Ok(tick)
    }

    async fn open_push(&self, _symbol: &Symbol) -> Option<mpsc::Receiver<Tick>> {
        None
    }

    async fn close_push(&self, _symbol: &Symbol) {}
}

fn hub(buffer: usize) -> (StreamHub, Arc<CountingQuotes>, watch::Sender<SessionState>) {
    let quotes = Arc::new(CountingQuotes::default());
    let (session_tx, session_rx) = watch::channel(SessionState::Authenticated);
    let hub = StreamHub::new(
        HubConfig {
            min_interval: Duration::from_secs(1),
            client_buffer: buffer,
            push_retry: Duration::from_secs(30),
        },
        Arc::clone(&quotes) as Arc<dyn QuoteSource>,
        session_rx,
    );
    (hub, quotes, session_tx)
}

fn sym(s: &str) -> Symbol {
    Symbol::parse(s).unwrap()
}

fn drain(reg: &mut Registration) -> Vec<Value> {
    let mut frames = Vec::new();
    while let Ok(Outbound::Text(text)) = reg.outbound.try_recv() {
        frames.push(serde_json::from_str(&text).unwrap());
    }
    frames
}

fn ticks(frames: &[Value]) -> Vec<String> {
    frames
        .iter()
        .filter(|f| f["type"] == "tick")
        .map(|f| f["last"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test(start_paused = true)]
async fn every_subscriber_gets_each_tick_exactly_once() {
    let (hub, _quotes, _session) = hub(64);
    let mut regs: Vec<Registration> = (0..5).map(|_| hub.connect().unwrap()).collect();
    for reg in &regs {
        hub.subscribe(reg.id, &sym("AAPL")).unwrap();
    }

    tokio::time::sleep(Duration::from_millis(2500)).await;

    let expected = vec!["1".to_string(), "2".to_string(), "3".to_string()];
    for reg in &mut regs {
        let frames = drain(reg);
        assert_eq!(frames[0]["type"], "subscribed");
        assert_eq!(ticks(&frames), expected);
    }
}

#[tokio::test(start_paused = true)]
async fn one_worker_per_symbol_regardless_of_subscribers() {
    let (hub, quotes, _session) = hub(64);
    let a = hub.connect().unwrap();
    let b = hub.connect().unwrap();
    hub.subscribe(a.id, &sym("AAPL")).unwrap();
    hub.subscribe(b.id, &sym("AAPL")).unwrap();
    hub.subscribe(b.id, &sym("MSFT")).unwrap();

    tokio::time::sleep(Duration::from_millis(4500)).await;

    assert_eq!(quotes.polls("AAPL"), 5);
    assert_eq!(quotes.polls("MSFT"), 5);
    assert_eq!(hub.stats().symbol_count, 2);
}

#[tokio::test(start_paused = true)]
async fn polling_continues_until_last_subscriber_leaves() {
    let (hub, quotes, _session) = hub(64);
    let a = hub.connect().unwrap();
    let b = hub.connect().unwrap();
    hub.subscribe(a.id, &sym("AAPL")).unwrap();
    hub.subscribe(b.id, &sym("AAPL")).unwrap();
    tokio::time::sleep(Duration::from_millis(1500)).await;

    hub.disconnect(a.id);
    let before = quotes.polls("AAPL");
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(quotes.polls("AAPL") > before);

    hub.unsubscribe(b.id, &sym("AAPL"));
    tokio::time::sleep(Duration::from_millis(1)).await;
    let stopped = quotes.polls("AAPL");
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(quotes.polls("AAPL"), stopped);
    assert_eq!(hub.stats().symbol_count, 0);
}

#[tokio::test(start_paused = true)]
async fn subscribe_then_unsubscribe_leaves_no_entry() {
    let (hub, quotes, _session) = hub(64);
    let reg = hub.connect().unwrap();

    hub.subscribe(reg.id, &sym("NVDA")).unwrap();
    hub.unsubscribe(reg.id, &sym("NVDA"));
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(hub.stats().symbol_count, 0);
    assert!(!hub.is_active(&sym("NVDA")));
    assert!(quotes.polls("NVDA") <= 1);
}

#[tokio::test(start_paused = true)]
async fn slow_subscriber_does_not_block_others() {
    let (hub, _quotes, _session) = hub(4);
    let mut slow = hub.connect().unwrap();
    let mut fast = hub.connect().unwrap();
    hub.subscribe(slow.id, &sym("AAPL")).unwrap();
    hub.subscribe(fast.id, &sym("AAPL")).unwrap();

    let mut fast_ticks = Vec::new();
    for _ in 0..8 {
        tokio::time::sleep(Duration::from_secs(1)).await;
        fast_ticks.extend(ticks(&drain(&mut fast)));
    }

    assert!(fast_ticks.len() >= 8, "fast client got {fast_ticks:?}");
    assert_eq!(slow.close.try_recv().unwrap().code, CLOSE_POLICY);
    assert_eq!(hub.client_count(), 1);
    assert_eq!(hub.stats().connection_count, 1);
}

#[tokio::test(start_paused = true)]
async fn workers_idle_while_session_not_ready() {
    let (hub, quotes, session) = hub(64);
    session.send_replace(SessionState::Down);
    let reg = hub.connect().unwrap();
    hub.subscribe(reg.id, &sym("AAPL")).unwrap();

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(quotes.polls("AAPL"), 0);

    session.send_replace(SessionState::Stale);
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(quotes.polls("AAPL"), 2);
}

#[tokio::test(start_paused = true)]
async fn shutdown_closes_clients_and_stops_polling() {
    let (hub, quotes, _session) = hub(64);
    let mut reg = hub.connect().unwrap();
    hub.subscribe(reg.id, &sym("AAPL")).unwrap();
    tokio::time::sleep(Duration::from_millis(1500)).await;

    hub.shutdown().await;
    let polls = quotes.polls("AAPL");

    let mut last_text = None;
    let mut close = None;
    while let Ok(frame) = reg.outbound.try_recv() {
        match frame {
            Outbound::Text(text) => last_text = Some(text),
            Outbound::Close(reason) => close = Some(reason),
        }
    }
    let last: Value = serde_json::from_str(&last_text.unwrap()).unwrap();
    assert_eq!(last["type"], "shutdown");
    assert_eq!(close.unwrap().code, CLOSE_GOING_AWAY);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(quotes.polls("AAPL"), polls);
    assert!(hub.connect().is_err());
}
