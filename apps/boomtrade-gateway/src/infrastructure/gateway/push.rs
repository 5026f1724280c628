//! Gateway Push Feed
//!
//! Optional streaming channel to the gateway's market data WebSocket. A
//! single actor owns the connection, keeps one subscription per symbol and
//! forwards merged ticks to the symbol worker that opened it.
//!
//! When the connection drops every subscription channel is closed, which
//! sends the symbol workers back to polling. The actor reconnects with the
//! shared backoff policy and serves new subscriptions once it is back up.
//!
//! # Protocol
//!
//! ```text
//! -> {"session":"<token from /tickle>"}
//! -> smd+{conid}+{"fields":["31","84",...]}
//! <- {"topic":"smd+{conid}","conid":...,"84":"189.20",...}
//! -> umd+{conid}+{}
//! -> tic
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::Connector;
use tokio_util::sync::CancellationToken;

use super::client::GatewayClient;
use super::messages::{PUSH_HEARTBEAT, parse_push_update, push_subscribe, push_unsubscribe};
use crate::application::ports::GatewayError;
use crate::application::services::{BackoffConfig, BackoffPolicy};
use crate::domain::market::{Symbol, Tick};
use crate::infrastructure::metrics;

/// Buffered push updates per symbol before updates are dropped.
const SUBSCRIPTION_BUFFER: usize = 16;

// =============================================================================
// Error Type
// =============================================================================

/// Errors that end one push connection.
#[derive(Debug, thiserror::Error)]
pub enum PushFeedError {
    /// Session token could not be obtained.
    #[error("session token unavailable: {0}")]
    Session(#[from] GatewayError),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// TLS configuration failed.
    #[error("TLS configuration failed: {0}")]
    Tls(String),

    /// Connection closed by the gateway.
    #[error("connection closed")]
    ConnectionClosed,
}

// =============================================================================
// Configuration
// =============================================================================

/// Push feed configuration.
#[derive(Debug, Clone)]
pub struct PushFeedConfig {
    /// WebSocket URL of the gateway stream.
    pub url: String,
    /// Keepalive period.
    pub heartbeat: Duration,
    /// Reconnect backoff.
    pub reconnect: BackoffConfig,
    /// Accept the gateway's self-signed certificate.
    pub accept_invalid_certs: bool,
}

impl PushFeedConfig {
    /// Create a configuration with default heartbeat and reconnect policy.
    #[must_use]
    pub fn new(url: String) -> Self {
        Self {
            url,
            heartbeat: Duration::from_secs(30),
            reconnect: BackoffConfig::default(),
            accept_invalid_certs: true,
        }
    }
}

// =============================================================================
// Handle
// =============================================================================

enum PushCommand {
    Subscribe {
        symbol: Symbol,
        conid: i64,
        reply: oneshot::Sender<Option<mpsc::Receiver<Tick>>>,
    },
    Unsubscribe {
        symbol: Symbol,
    },
}

/// Handle used to open and close per-symbol push streams.
#[derive(Clone)]
pub struct PushHandle {
    client: Arc<GatewayClient>,
    commands: mpsc::Sender<PushCommand>,
    connected: watch::Receiver<bool>,
}

impl PushHandle {
    /// Whether the push connection is currently up.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// Open a push stream for a symbol. `None` while disconnected.
    pub async fn subscribe(&self, symbol: &Symbol) -> Option<mpsc::Receiver<Tick>> {
        if !self.is_connected() {
            return None;
        }
        let conid = match self.client.resolve_conid(symbol).await {
            Ok(conid) => conid,
            Err(e) => {
                tracing::debug!(%symbol, error = %e, "No contract for push subscription");
                return None;
            }
        };

        let (reply, rx) = oneshot::channel();
        self.commands
            .send(PushCommand::Subscribe {
                symbol: symbol.clone(),
                conid,
                reply,
            })
            .await
            .ok()?;
        rx.await.ok().flatten()
    }

    /// Close the push stream for a symbol.
    pub async fn unsubscribe(&self, symbol: &Symbol) {
        let _ = self
            .commands
            .send(PushCommand::Unsubscribe {
                symbol: symbol.clone(),
            })
            .await;
    }
}

// =============================================================================
// Feed Actor
// =============================================================================

struct PushSubscription {
    symbol: Symbol,
    tx: mpsc::Sender<Tick>,
    latest: Tick,
}

/// Push feed actor.
pub struct PushFeed {
    config: PushFeedConfig,
    client: Arc<GatewayClient>,
    commands: mpsc::Receiver<PushCommand>,
    connected: watch::Sender<bool>,
    subscriptions: HashMap<i64, PushSubscription>,
    cancel: CancellationToken,
}

impl PushFeed {
    /// Spawn the feed. It runs until `cancel` fires.
    #[must_use]
    pub fn spawn(
        config: PushFeedConfig,
        client: Arc<GatewayClient>,
        cancel: CancellationToken,
    ) -> (PushHandle, JoinHandle<()>) {
        let (commands_tx, commands_rx) = mpsc::channel(32);
        let (connected_tx, connected_rx) = watch::channel(false);

        let feed = Self {
            config,
            client: Arc::clone(&client),
            commands: commands_rx,
            connected: connected_tx,
            subscriptions: HashMap::new(),
            cancel,
        };
        let handle = tokio::spawn(feed.run());

        (
            PushHandle {
                client,
                commands: commands_tx,
                connected: connected_rx,
            },
            handle,
        )
    }

    async fn run(mut self) {
        let mut reconnect_policy = BackoffPolicy::new(self.config.reconnect.clone());

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            match self.connect_and_run(&mut reconnect_policy).await {
                Ok(()) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "Push feed connection lost");
                    self.disconnect();

                    let Some(delay) = reconnect_policy.next_delay() else {
                        tracing::error!("Push feed reconnect attempts exhausted, polling only");
                        break;
                    };
                    metrics::record_push_reconnect();
                    tracing::info!(
                        attempt = reconnect_policy.attempt_count(),
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "Reconnecting push feed"
                    );
                    if !self.wait_disconnected(delay).await {
                        break;
                    }
                }
            }
        }

        self.disconnect();
        tracing::info!("Push feed stopped");
    }

    /// Sleep through a reconnect delay, refusing subscriptions meanwhile.
    ///
    /// Returns `false` when the feed should stop.
    async fn wait_disconnected(&mut self, delay: Duration) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                () = self.cancel.cancelled() => return false,
                () = &mut sleep => return true,
                command = self.commands.recv() => match command {
                    Some(PushCommand::Subscribe { reply, .. }) => {
                        let _ = reply.send(None);
                    }
                    Some(PushCommand::Unsubscribe { .. }) => {}
                    None => return false,
                },
            }
        }
    }

    async fn connect_and_run(
        &mut self,
        reconnect_policy: &mut BackoffPolicy,
    ) -> Result<(), PushFeedError> {
        let token = self.client.tickle().await?.session.unwrap_or_default();

        tracing::info!(url = %self.config.url, "Connecting push feed");
        let connector = connector(self.config.accept_invalid_certs)?;
        let (ws, _response) = tokio_tungstenite::connect_async_tls_with_config(
            self.config.url.as_str(),
            None,
            false,
            connector,
        )
        .await?;
        let (mut write, mut read) = ws.split();

        write
            .send(Message::Text(
                serde_json::json!({ "session": token }).to_string().into(),
            ))
            .await?;

        self.connected.send_replace(true);
        reconnect_policy.reset();
        tracing::info!("Push feed connected");

        let mut heartbeat = tokio::time::interval(self.config.heartbeat);
        heartbeat.tick().await;

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
                command = self.commands.recv() => {
                    let Some(command) = command else {
                        return Ok(());
                    };
                    if let Some(frame) = self.handle_command(command) {
                        write.send(Message::Text(frame.into())).await?;
                    }
                }
                _ = heartbeat.tick() => {
                    write.send(Message::Text(PUSH_HEARTBEAT.into())).await?;
                }
                msg = read.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(frame) = self.handle_text(&text) {
                            write.send(Message::Text(frame.into())).await?;
                        }
                    }
                    Some(Ok(Message::Binary(bytes))) => {
                        let frame = std::str::from_utf8(&bytes)
                            .ok()
                            .and_then(|text| self.handle_text(text));
                        if let Some(frame) = frame {
                            write.send(Message::Text(frame.into())).await?;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        tracing::info!(?frame, "Push feed closed by gateway");
                        return Err(PushFeedError::ConnectionClosed);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                    None => return Err(PushFeedError::ConnectionClosed),
                },
            }
        }
    }

    /// Apply a command and return the frame to send, if any.
    fn handle_command(&mut self, command: PushCommand) -> Option<String> {
        match command {
            PushCommand::Subscribe {
                symbol,
                conid,
                reply,
            } => {
                let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
                let resubscribe = self.subscriptions.contains_key(&conid);
                self.subscriptions.insert(
                    conid,
                    PushSubscription {
                        latest: Tick::empty(symbol.clone(), Utc::now()),
                        symbol: symbol.clone(),
                        tx,
                    },
                );
                if reply.send(Some(rx)).is_err() {
                    self.subscriptions.remove(&conid);
                    return None;
                }
                tracing::debug!(%symbol, conid, resubscribe, "Push subscription opened");
                Some(push_subscribe(conid))
            }
            PushCommand::Unsubscribe { symbol } => {
                let conid = self
                    .subscriptions
                    .iter()
                    .find_map(|(conid, sub)| (sub.symbol == symbol).then_some(*conid))?;
                self.subscriptions.remove(&conid);
                tracing::debug!(%symbol, conid, "Push subscription closed");
                Some(push_unsubscribe(conid))
            }
        }
    }

    /// Merge an update into its subscription.
    ///
    /// Returns an unsubscribe frame when the worker that opened the
    /// subscription has gone away without closing it.
    fn handle_text(&mut self, text: &str) -> Option<String> {
        let (conid, row) = parse_push_update(text)?;
        let sub = self.subscriptions.get_mut(&conid)?;

        row.apply_to(&mut sub.latest, Utc::now());

        match sub.tx.try_send(sub.latest.clone()) {
            Ok(()) | Err(mpsc::error::TrySendError::Full(_)) => None,
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!(symbol = %sub.symbol, conid, "Push receiver gone");
                self.subscriptions.remove(&conid);
                Some(push_unsubscribe(conid))
            }
        }
    }

    fn disconnect(&mut self) {
        self.connected.send_replace(false);
        if !self.subscriptions.is_empty() {
            tracing::info!(
                symbols = self.subscriptions.len(),
                "Closing push subscriptions, workers fall back to polling"
            );
        }
        self.subscriptions.clear();
    }
}

// =============================================================================
// TLS
// =============================================================================

fn connector(accept_invalid_certs: bool) -> Result<Option<Connector>, PushFeedError> {
    if !accept_invalid_certs {
        return Ok(None);
    }

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = rustls::ClientConfig::builder_with_provider(Arc::clone(&provider))
        .with_safe_default_protocol_versions()
        .map_err(|e| PushFeedError::Tls(e.to_string()))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(SelfSignedVerifier(provider)))
        .with_no_client_auth();

    Ok(Some(Connector::Rustls(Arc::new(config))))
}

/// Accepts any server certificate while still checking handshake signatures.
/// Only used against the gateway on loopback.
#[derive(Debug)]
struct SelfSignedVerifier(Arc<rustls::crypto::CryptoProvider>);

impl rustls::client::danger::ServerCertVerifier for SelfSignedVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &rustls::pki_types::CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &rustls::pki_types::CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::gateway::GatewayClientConfig;
    use serde_json::json;
    use tokio::net::TcpListener;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn gateway_api() -> (MockServer, Arc<GatewayClient>) {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/tickle"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"session": "tok"})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/iserver/secdef/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"conid": 265_598}])))
            .mount(&server)
            .await;
        let client = GatewayClient::new(&GatewayClientConfig {
            base_url: server.uri(),
            timeout: Duration::from_secs(2),
            accept_invalid_certs: false,
        })
        .unwrap();
        (server, Arc::new(client))
    }

    /// Fake gateway stream: checks the session frame, answers one `smd`
    /// subscription with two partial updates, then closes.
    async fn fake_stream() -> (String, JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let mut frames = Vec::new();
            while let Some(Ok(msg)) = ws.next().await {
                let Message::Text(text) = msg else { continue };
                frames.push(text.as_str().to_string());
                if text.starts_with("smd+") {
                    ws.send(Message::Text(
                        r#"{"topic":"smd+265598","conid":265598,"84":"10.00","86":"10.10"}"#.into(),
                    ))
                    .await
                    .unwrap();
                    ws.send(Message::Text(
                        r#"{"topic":"smd+265598","conid":265598,"84":"10.05"}"#.into(),
                    ))
                    .await
                    .unwrap();
                    ws.close(None).await.unwrap();
                    break;
                }
            }
            frames
        });
        (url, handle)
    }

    async fn wait_connected(handle: &PushHandle) {
        for _ in 0..100 {
            if handle.is_connected() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("push feed never connected");
    }

    #[tokio::test]
    async fn subscription_receives_merged_ticks_then_closes() {
        let (_server, client) = gateway_api().await;
        let (url, gateway) = fake_stream().await;
        let cancel = CancellationToken::new();
        let mut config = PushFeedConfig::new(url);
        config.accept_invalid_certs = false;
        config.reconnect = BackoffConfig::new(Duration::from_secs(60), Duration::from_secs(60), 0);

        let (handle, task) = PushFeed::spawn(config, client, cancel.clone());
        wait_connected(&handle).await;

        let aapl = Symbol::parse("AAPL").unwrap();
        let mut rx = handle.subscribe(&aapl).await.unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.bid.map(|d| d.to_string()).as_deref(), Some("10.00"));
        let second = rx.recv().await.unwrap();
        assert_eq!(second.bid.map(|d| d.to_string()).as_deref(), Some("10.05"));
        assert_eq!(second.ask, first.ask);

        assert!(rx.recv().await.is_none());
        assert!(handle.subscribe(&aapl).await.is_none());

        let frames = gateway.await.unwrap();
        assert_eq!(frames[0], r#"{"session":"tok"}"#);
        assert!(frames[1].starts_with("smd+265598+"));

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn subscribe_while_disconnected_returns_none() {
        let (_server, client) = gateway_api().await;
        let cancel = CancellationToken::new();
        let mut config = PushFeedConfig::new("ws://127.0.0.1:9".to_string());
        config.accept_invalid_certs = false;

        let (handle, task) = PushFeed::spawn(config, client, cancel.clone());
        assert!(handle.subscribe(&Symbol::parse("AAPL").unwrap()).await.is_none());

        cancel.cancel();
        task.await.unwrap();
    }

    fn idle_feed() -> PushFeed {
        let client = GatewayClient::new(&GatewayClientConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            timeout: Duration::from_secs(1),
            accept_invalid_certs: false,
        })
        .unwrap();
        let (_commands_tx, commands) = mpsc::channel(1);
        let (connected, _connected_rx) = watch::channel(true);
        PushFeed {
            config: PushFeedConfig::new("ws://127.0.0.1:9".to_string()),
            client: Arc::new(client),
            commands,
            connected,
            subscriptions: HashMap::new(),
            cancel: CancellationToken::new(),
        }
    }

    fn open(feed: &mut PushFeed, symbol: &str, conid: i64) -> mpsc::Receiver<Tick> {
        let (reply, mut rx) = oneshot::channel();
        let frame = feed.handle_command(PushCommand::Subscribe {
            symbol: Symbol::parse(symbol).unwrap(),
            conid,
            reply,
        });
        assert!(frame.unwrap().starts_with(&format!("smd+{conid}+")));
        rx.try_recv().unwrap().unwrap()
    }

    const UPDATE: &str = r#"{"topic":"smd+265598","conid":265598,"84":"10.00"}"#;

    #[tokio::test]
    async fn abandoned_subscription_is_unsubscribed_on_next_update() {
        let mut feed = idle_feed();
        let rx = open(&mut feed, "AAPL", 265_598);
        drop(rx);

        assert_eq!(feed.handle_text(UPDATE), Some(push_unsubscribe(265_598)));
        assert!(feed.subscriptions.is_empty());
        assert_eq!(feed.handle_text(UPDATE), None);
    }

    #[tokio::test]
    async fn reopened_subscription_replaces_abandoned_one() {
        let mut feed = idle_feed();
        let stale = open(&mut feed, "AAPL", 265_598);
        let mut fresh = open(&mut feed, "AAPL", 265_598);
        drop(stale);

        assert_eq!(feed.handle_text(UPDATE), None);
        let tick = fresh.try_recv().unwrap();
        assert_eq!(tick.bid.map(|d| d.to_string()).as_deref(), Some("10.00"));
        assert_eq!(feed.subscriptions.len(), 1);
    }

    #[tokio::test]
    async fn feed_does_not_count_ticks_itself() {
        let recorder = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        let mut feed = idle_feed();
        let _rx = open(&mut feed, "AAPL", 265_598);

        ::metrics::with_local_recorder(&recorder, || feed.handle_text(UPDATE));

        assert!(!handle.render().contains("boomtrade_gateway_ticks_received_total"));
    }

    #[test]
    fn self_signed_connector_builds() {
        assert!(matches!(connector(true), Ok(Some(Connector::Rustls(_)))));
        assert!(matches!(connector(false), Ok(None)));
    }
}
