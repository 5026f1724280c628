//! REST facade gating through the full router.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use boomtrade_gateway::domain::account::{AccountInfo, AccountSummary, Position};
use boomtrade_gateway::domain::market::{OptionChain, OptionSearch};
use boomtrade_gateway::domain::order::{OrderAck, OrderRequest, WorkingOrder};
use boomtrade_gateway::{
    AppState, Credentials, Facade, FacadeSettings, GatewayApi, GatewayControl, GatewayError,
    HubConfig, ProbeOutcome, ProbePolicy, QuoteSource, SessionHandle, StreamHub,
    SupervisorError, SupervisorStatus, Symbol, Tick, create_router,
};
use chrono::{NaiveDate, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde_json::Value;
use tokio::sync::mpsc;
use tower::ServiceExt;

// =============================================================================
// Fakes
// =============================================================================

#[derive(Default)]
struct FakeGateway {
    calls: AtomicUsize,
}

impl FakeGateway {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn hit(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl GatewayApi for FakeGateway {
    async fn probe(&self) -> ProbeOutcome {
        ProbeOutcome::Unreachable {
            reason: "not used".to_string(),
        }
    }

    async fn accounts(&self) -> Result<Vec<AccountInfo>, GatewayError> {
        self.hit();
        Ok(vec![AccountInfo::new("DU123", Some("USD".to_string()))])
    }

    async fn account_summary(&self, account_id: &str) -> Result<AccountSummary, GatewayError> {
        self.hit();
        Ok(AccountSummary {
            account: AccountInfo::new(account_id, Some("USD".to_string())),
            net_liquidation: Some(Decimal::from(100_000)),
            cash: Some(Decimal::from(25_000)),
            buying_power: None,
        })
    }

    async fn positions(&self, _account_id: &str) -> Result<Vec<Position>, GatewayError> {
        self.hit();
        Ok(Vec::new())
    }

    async fn live_orders(&self) -> Result<Vec<WorkingOrder>, GatewayError> {
        self.hit();
        Ok(Vec::new())
    }

    async fn quote(&self, symbol: &Symbol) -> Result<Tick, GatewayError> {
        self.hit();
        let mut tick = Tick::empty(symbol.clone(), Utc::now());
        tick.last = Some(Decimal::new(18750, 2));
        Ok(tick)
    }

    async fn search_options(&self, symbol: &Symbol) -> Result<OptionSearch, GatewayError> {
        self.hit();
        Err(GatewayError::NotFound(symbol.to_string()))
    }

    async fn option_chain(
        &self,
        symbol: &Symbol,
        _expiry: NaiveDate,
    ) -> Result<OptionChain, GatewayError> {
        self.hit();
        Err(GatewayError::NotFound(symbol.to_string()))
    }

    async fn place_order(
        &self,
        _account_id: &str,
        _order: &OrderRequest,
    ) -> Result<OrderAck, GatewayError> {
        self.hit();
        Ok(OrderAck {
            order_id: "1001".to_string(),
            client_order_id: "bt-1".to_string(),
            status: "Submitted".to_string(),
            messages: Vec::new(),
        })
    }
}

#[derive(Default)]
struct FakeControl {
    status: Mutex<SupervisorStatus>,
    starts: Mutex<Vec<Option<Credentials>>>,
}

#[async_trait]
impl GatewayControl for FakeControl {
    async fn start(
        &self,
        credentials: Option<Credentials>,
    ) -> Result<SupervisorStatus, SupervisorError> {
        if credentials.is_none() {
            return Err(SupervisorError::CredentialsMissing);
        }
        self.starts.lock().push(credentials);
        let mut status = self.status.lock();
        status.running = true;
        Ok(status.clone())
    }

    async fn stop(&self) -> Result<SupervisorStatus, SupervisorError> {
        let mut status = self.status.lock();
        *status = SupervisorStatus::default();
        Ok(status.clone())
    }

    fn status(&self) -> SupervisorStatus {
        self.status.lock().clone()
    }
}

struct NoQuotes;

#[async_trait]
impl QuoteSource for NoQuotes {
    async fn snapshot(&self, symbol: &Symbol) -> Result<Tick, GatewayError> {
        Err(GatewayError::NotFound(symbol.to_string()))
    }

    async fn open_push(&self, _symbol: &Symbol) -> Option<mpsc::Receiver<Tick>> {
        None
    }

    async fn close_push(&self, _symbol: &Symbol) {}
}

// =============================================================================
// Harness
// =============================================================================

struct Harness {
    router: axum::Router,
    gateway: Arc<FakeGateway>,
    control: Arc<FakeControl>,
    session: Arc<SessionHandle>,
}

impl Harness {
    fn new() -> Self {
        let gateway = Arc::new(FakeGateway::default());
        let control = Arc::new(FakeControl::default());
        let session = Arc::new(SessionHandle::new(ProbePolicy::default()));
        let facade = Arc::new(Facade::new(
            Arc::clone(&gateway) as Arc<dyn GatewayApi>,
            Arc::clone(&control) as Arc<dyn GatewayControl>,
            Arc::clone(&session),
            FacadeSettings {
                upstream_timeout: Duration::from_secs(1),
                retry_delay: Duration::from_millis(1),
                restart_base: Duration::from_secs(5),
                probe_interval: Duration::from_secs(15),
            },
        ));
        let hub = StreamHub::new(HubConfig::default(), Arc::new(NoQuotes), session.subscribe());
        let router = create_router(AppState::new(facade, hub, Duration::from_secs(30)));
        Self {
            router,
            gateway,
            control,
            session,
        }
    }

    fn authenticated() -> Self {
        let harness = Self::new();
        harness.session.mark_starting().unwrap();
        harness.session.observe(ProbeOutcome::Authenticated {
            account_id: "DU123".to_string(),
        });
        harness
    }

    async fn get(&self, uri: &str) -> (StatusCode, Option<String>, Value) {
        self.send(Request::get(uri).body(Body::empty()).unwrap())
            .await
    }

    async fn post(&self, uri: &str, body: &str) -> (StatusCode, Option<String>, Value) {
        self.send(
            Request::post(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Option<String>, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let retry_after = response
            .headers()
            .get(header::RETRY_AFTER)
            .map(|v| v.to_str().unwrap().to_string());
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, retry_after, body)
    }
}

// =============================================================================
// Gating
// =============================================================================

#[tokio::test]
async fn reads_are_refused_while_down() {
    let harness = Harness::new();

    for uri in [
        "/account",
        "/positions",
        "/orders",
        "/marketdata/AAPL",
        "/options/search/AAPL",
        "/options/chain/AAPL/20300119",
    ] {
        let (status, retry_after, body) = harness.get(uri).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE, "{uri}");
        assert_eq!(retry_after.as_deref(), Some("5"), "{uri}");
        assert_eq!(body["error"], "GATEWAY_UNAVAILABLE");
        assert_eq!(body["details"]["state"], "down");
    }

    assert_eq!(harness.gateway.calls(), 0);
}

#[tokio::test]
async fn orders_are_refused_before_validation() {
    let harness = Harness::new();

    let (status, _, body) = harness.post("/order/stock", r#"{"symbol": ""}"#).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "GATEWAY_UNAVAILABLE");
    assert_eq!(harness.gateway.calls(), 0);
}

#[tokio::test]
async fn starting_hints_probe_interval() {
    let harness = Harness::new();
    harness.session.mark_starting().unwrap();

    let (status, retry_after, body) = harness.get("/marketdata/AAPL").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(retry_after.as_deref(), Some("15"));
    assert_eq!(body["details"]["state"], "starting");
}

#[tokio::test]
async fn awaiting_auth_is_unauthorized() {
    let harness = Harness::new();
    harness.session.mark_starting().unwrap();
    harness.session.observe(ProbeOutcome::Unauthenticated);

    let (status, retry_after, body) = harness.get("/positions").await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(retry_after.is_none());
    assert_eq!(body["error"], "AUTHENTICATION_REQUIRED");
    assert_eq!(harness.gateway.calls(), 0);
}

#[tokio::test]
async fn fatal_stop_is_unavailable_without_hint() {
    let harness = Harness::new();
    harness.session.mark_fatal("restart budget exhausted");

    let (status, retry_after, body) = harness.get("/orders").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(retry_after.is_none());
    assert_eq!(body["details"]["state"], "fatal_stopped");
}

// =============================================================================
// Forwarding
// =============================================================================

#[tokio::test]
async fn authenticated_reads_are_forwarded() {
    let harness = Harness::authenticated();

    let (status, _, body) = harness.get("/marketdata/aapl").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["symbol"], "AAPL");
    assert_eq!(body["last"], "187.50");

    let (status, _, body) = harness.get("/positions").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["positions"], Value::Array(Vec::new()));

    let (status, _, body) = harness.get("/orders").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["orders"], Value::Array(Vec::new()));
}

#[tokio::test]
async fn invalid_symbol_is_rejected_without_upstream_call() {
    let harness = Harness::authenticated();

    let (status, _, body) = harness.get("/marketdata/BAD$SYM").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "VALIDATION_ERROR");
    assert_eq!(body["details"]["field"], "symbol");
    assert_eq!(harness.gateway.calls(), 0);
}

#[tokio::test]
async fn upstream_not_found_maps_to_404() {
    let harness = Harness::authenticated();

    let (status, _, body) = harness.get("/options/search/ZZZZ").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "NOT_FOUND");
}

#[tokio::test]
async fn malformed_order_body_names_body_field() {
    let harness = Harness::authenticated();

    let (status, _, body) = harness.post("/order/stock", "{not json").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "VALIDATION_ERROR");
    assert_eq!(body["details"]["field"], "body");
    assert_eq!(harness.gateway.calls(), 0);
}

#[tokio::test]
async fn invalid_order_names_field() {
    let harness = Harness::authenticated();

    let (status, _, body) = harness
        .post(
            "/order/stock",
            r#"{"symbol": "AAPL", "quantity": "0", "side": "buy"}"#,
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["details"]["field"], "quantity");
    assert_eq!(harness.gateway.calls(), 0);
}

#[tokio::test]
async fn valid_stock_order_is_placed() {
    let harness = Harness::authenticated();

    let (status, _, body) = harness
        .post(
            "/order/stock",
            r#"{"symbol": "AAPL", "quantity": "10", "side": "buy", "order_type": "LMT", "limit_price": "180.25"}"#,
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["order_id"], "1001");
    assert_eq!(harness.gateway.calls(), 1);
}

// =============================================================================
// Lifecycle routes
// =============================================================================

#[tokio::test]
async fn status_is_always_available() {
    let harness = Harness::new();

    let (status, _, body) = harness.get("/gateway/status").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["session"]["state"], "down");
    assert_eq!(body["ready"], false);
    assert_eq!(body["supervisor"]["running"], false);
}

#[tokio::test]
async fn start_with_credentials_reaches_supervisor() {
    let harness = Harness::new();

    let (status, _, body) = harness
        .post(
            "/gateway/start",
            r#"{"username": "trader", "password": "secret"}"#,
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["supervisor"]["running"], true);
    let starts = harness.control.starts.lock();
    assert_eq!(starts.len(), 1);
    assert_eq!(starts[0].as_ref().unwrap().username(), "trader");
}

#[tokio::test]
async fn start_without_credentials_is_precondition_failed() {
    let harness = Harness::new();

    let (status, _, body) = harness.post("/gateway/start", "").await;

    assert_eq!(status, StatusCode::PRECONDITION_FAILED);
    assert_eq!(body["error"], "CREDENTIALS_MISSING");
}

#[tokio::test]
async fn start_with_blank_username_is_rejected() {
    let harness = Harness::new();

    let (status, _, body) = harness
        .post("/gateway/start", r#"{"username": " ", "password": "x"}"#)
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["details"]["field"], "username");
    assert!(harness.control.starts.lock().is_empty());
}

// =============================================================================
// Health
// =============================================================================

#[tokio::test]
async fn liveness_and_readiness_follow_session() {
    let harness = Harness::new();

    let (status, _, _) = harness.get("/healthz").await;
    assert_eq!(status, StatusCode::OK);
    let (status, _, _) = harness.get("/readyz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    let (status, _, body) = harness.get("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["gateway_ready"], false);

    harness.session.mark_starting().unwrap();
    harness.session.observe(ProbeOutcome::Authenticated {
        account_id: "DU123".to_string(),
    });

    let (status, _, _) = harness.get("/readyz").await;
    assert_eq!(status, StatusCode::OK);
    let (_, _, body) = harness.get("/health").await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["state"], "authenticated");
}
