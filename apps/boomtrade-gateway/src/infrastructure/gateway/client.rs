//! Gateway HTTP Client
//!
//! `reqwest` client for the gateway's loopback REST API. Every call is
//! bounded by the configured timeout and recorded as an upstream request
//! metric. Retries are not done here; the facade owns the retry rule.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use parking_lot::RwLock;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::messages::{
    SNAPSHOT_FIELDS, TickleResponse, WireAccount, WireConfirm, WireContractInfo, WireError,
    WireLiveOrders, WireMarketRow, WireOrder, WireOrderBody, WireOrderReply, WirePosition,
    WireSecdef, WireStrikes, WireSummary, option_month, summary_from_wire,
};
use crate::application::ports::{GatewayApi, GatewayError};
use crate::domain::account::{AccountInfo, AccountSummary, Position};
use crate::domain::market::{OptionChain, OptionSearch, Symbol, Tick};
use crate::domain::order::{OptionOrder, OrderAck, OrderRequest, WorkingOrder};
use crate::domain::session::ProbeOutcome;
use crate::infrastructure::metrics::{self, UpstreamOutcome};

/// Confirmation prompts answered before an order submission gives up.
const MAX_ORDER_CONFIRMATIONS: usize = 3;

/// Delay before re-requesting a snapshot that came back without prices.
///
/// The gateway answers the first snapshot for a contract with an empty row
/// while it sets up the market data line.
const SNAPSHOT_WARMUP: Duration = Duration::from_millis(500);

/// Client configuration.
#[derive(Debug, Clone)]
pub struct GatewayClientConfig {
    /// Base URL of the local API, without trailing slash.
    pub base_url: String,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Accept the gateway's self-signed certificate.
    pub accept_invalid_certs: bool,
}

impl Default for GatewayClientConfig {
    fn default() -> Self {
        Self {
            base_url: "https://localhost:5000/v1/api".to_string(),
            timeout: Duration::from_secs(10),
            accept_invalid_certs: true,
        }
    }
}

/// HTTP client for the gateway's local API.
#[derive(Debug)]
pub struct GatewayClient {
    http: Client,
    base_url: String,
    conids: RwLock<HashMap<Symbol, i64>>,
}

impl GatewayClient {
    /// Create a client.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Network` if the HTTP client cannot be built.
    pub fn new(config: &GatewayClientConfig) -> Result<Self, GatewayError> {
        let http = Client::builder()
            .timeout(config.timeout)
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()
            .map_err(|e| GatewayError::Network(e.to_string()))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            conids: RwLock::new(HashMap::new()),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn get<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        path: &str,
    ) -> Result<T, GatewayError> {
        self.send(operation, path, self.http.get(self.url(path))).await
    }

    async fn post<T: DeserializeOwned, B: Serialize + Sync>(
        &self,
        operation: &'static str,
        path: &str,
        body: &B,
    ) -> Result<T, GatewayError> {
        self.send(operation, path, self.http.post(self.url(path)).json(body))
            .await
    }

    async fn send<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        path: &str,
        request: RequestBuilder,
    ) -> Result<T, GatewayError> {
        let started = Instant::now();
        let result = execute(path, request).await;

        let outcome = match &result {
            Ok(_) => UpstreamOutcome::Ok,
            Err(GatewayError::Timeout) => UpstreamOutcome::Timeout,
            Err(_) => UpstreamOutcome::Error,
        };
        metrics::record_upstream_request(operation, outcome, started.elapsed());

        if let Err(e) = &result {
            tracing::debug!(operation, path, error = %e, "Gateway request failed");
        }
        result
    }

    /// Current tickle response, carrying the streaming session token.
    ///
    /// # Errors
    ///
    /// Returns the transport or status error of the call.
    pub async fn tickle(&self) -> Result<TickleResponse, GatewayError> {
        self.post("tickle", "/tickle", &serde_json::json!({})).await
    }

    /// Resolve the gateway contract id of a stock symbol. Cached per symbol.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::NotFound` when the gateway knows no contract
    /// for the symbol.
    pub async fn resolve_conid(&self, symbol: &Symbol) -> Result<i64, GatewayError> {
        if let Some(conid) = self.conids.read().get(symbol) {
            return Ok(*conid);
        }
        let secdef = self.search(symbol).await?;
        let conid = secdef
            .conid()
            .ok_or_else(|| GatewayError::NotFound(format!("symbol {symbol}")))?;
        self.conids.write().insert(symbol.clone(), conid);
        Ok(conid)
    }

    async fn search(&self, symbol: &Symbol) -> Result<WireSecdef, GatewayError> {
        let path = format!("/iserver/secdef/search?symbol={symbol}");
        let results: Vec<WireSecdef> = match self.get("secdef_search", &path).await {
            Ok(results) => results,
            Err(GatewayError::NotFound(_)) => Vec::new(),
            Err(e) => return Err(e),
        };
        results
            .into_iter()
            .find(|s| s.conid().is_some())
            .ok_or_else(|| GatewayError::NotFound(format!("symbol {symbol}")))
    }

    async fn snapshot_row(&self, conid: i64) -> Result<Option<WireMarketRow>, GatewayError> {
        let path = format!(
            "/iserver/marketdata/snapshot?conids={conid}&fields={}",
            SNAPSHOT_FIELDS.join(",")
        );
        let rows: Vec<WireMarketRow> = self.get("snapshot", &path).await?;
        Ok(rows.into_iter().find(|r| r.conid() == Some(conid)))
    }

    /// One snapshot request, without the warm-up retry used by `quote`.
    ///
    /// # Errors
    ///
    /// Returns the transport or status error of the call, or
    /// `GatewayError::NotFound` for an unknown symbol.
    pub async fn snapshot(&self, symbol: &Symbol) -> Result<Tick, GatewayError> {
        let conid = self.resolve_conid(symbol).await?;
        let now = Utc::now();
        Ok(self
            .snapshot_row(conid)
            .await?
            .map_or_else(|| Tick::empty(symbol.clone(), now), |row| row.to_tick(symbol.clone(), now)))
    }

    async fn option_conid(&self, order: &OptionOrder) -> Result<i64, GatewayError> {
        let underlying = self.resolve_conid(&order.symbol).await?;
        let path = format!(
            "/iserver/secdef/info?conid={underlying}&sectype=OPT&month={}&strike={}&right={}",
            option_month(order.expiry),
            order.strike.normalize(),
            order.right.as_gateway_str()
        );
        let contracts: Vec<WireContractInfo> = self.get("secdef_info", &path).await?;
        contracts
            .iter()
            .find_map(|c| c.conid_for(order.expiry))
            .ok_or_else(|| {
                GatewayError::NotFound(format!(
                    "option {} {} {}{}",
                    order.symbol,
                    order.expiry.format("%Y%m%d"),
                    order.strike.normalize(),
                    order.right.as_gateway_str()
                ))
            })
    }
}

#[async_trait]
impl GatewayApi for GatewayClient {
    async fn probe(&self) -> ProbeOutcome {
        let tickle = match self.tickle().await {
            Ok(tickle) => tickle,
            Err(GatewayError::Unauthorized) => return ProbeOutcome::Unauthenticated,
            Err(e) => {
                return ProbeOutcome::Unreachable {
                    reason: e.to_string(),
                };
            }
        };

        if !tickle.authenticated() {
            return ProbeOutcome::Unauthenticated;
        }

        match self.accounts().await {
            Ok(accounts) => accounts.into_iter().next().map_or(
                ProbeOutcome::Unauthenticated,
                |account| ProbeOutcome::Authenticated {
                    account_id: account.account_id,
                },
            ),
            Err(GatewayError::Unauthorized) => ProbeOutcome::Unauthenticated,
            Err(e) => ProbeOutcome::Unreachable {
                reason: e.to_string(),
            },
        }
    }

    async fn accounts(&self) -> Result<Vec<AccountInfo>, GatewayError> {
        let accounts: Vec<WireAccount> = self.get("accounts", "/portfolio/accounts").await?;
        Ok(accounts.into_iter().map(AccountInfo::from).collect())
    }

    async fn account_summary(&self, account_id: &str) -> Result<AccountSummary, GatewayError> {
        let path = format!("/portfolio/{account_id}/summary");
        let summary: WireSummary = self.get("account_summary", &path).await?;
        Ok(summary_from_wire(account_id, &summary))
    }

    async fn positions(&self, account_id: &str) -> Result<Vec<Position>, GatewayError> {
        let path = format!("/portfolio/{account_id}/positions/0");
        let positions: Option<Vec<WirePosition>> = self.get("positions", &path).await?;
        Ok(positions
            .unwrap_or_default()
            .into_iter()
            .filter_map(WirePosition::into_position)
            .collect())
    }

    async fn live_orders(&self) -> Result<Vec<WorkingOrder>, GatewayError> {
        let orders: WireLiveOrders = self.get("live_orders", "/iserver/account/orders").await?;
        Ok(orders.orders.into_iter().map(WorkingOrder::from).collect())
    }

    async fn quote(&self, symbol: &Symbol) -> Result<Tick, GatewayError> {
        let tick = self.snapshot(symbol).await?;
        if tick.has_prices() {
            return Ok(tick);
        }
        tokio::time::sleep(SNAPSHOT_WARMUP).await;
        self.snapshot(symbol).await
    }

    async fn search_options(&self, symbol: &Symbol) -> Result<OptionSearch, GatewayError> {
        let secdef = self.search(symbol).await?;
        let conid = secdef
            .conid()
            .ok_or_else(|| GatewayError::NotFound(format!("symbol {symbol}")))?;
        self.conids.write().insert(symbol.clone(), conid);
        Ok(OptionSearch {
            symbol: symbol.clone(),
            conid,
            expiry_months: secdef.option_months(),
        })
    }

    async fn option_chain(
        &self,
        symbol: &Symbol,
        expiry: NaiveDate,
    ) -> Result<OptionChain, GatewayError> {
        let conid = self.resolve_conid(symbol).await?;
        let path = format!(
            "/iserver/secdef/strikes?conid={conid}&sectype=OPT&month={}",
            option_month(expiry)
        );
        let strikes: WireStrikes = self.get("option_strikes", &path).await?;
        Ok(OptionChain {
            symbol: symbol.clone(),
            expiry,
            calls: strikes.calls(),
            puts: strikes.puts(),
        })
    }

    async fn place_order(
        &self,
        account_id: &str,
        order: &OrderRequest,
    ) -> Result<OrderAck, GatewayError> {
        let conid = match order {
            OrderRequest::Stock(stock) => self.resolve_conid(&stock.symbol).await?,
            OrderRequest::Option(option) => self.option_conid(option).await?,
        };
        let client_order_id = uuid::Uuid::new_v4().to_string();
        let body = WireOrderBody {
            orders: vec![WireOrder::new(conid, client_order_id.clone(), order)],
        };

        let path = format!("/iserver/account/{account_id}/orders");
        let mut replies: Vec<WireOrderReply> = self.post("place_order", &path, &body).await?;
        let mut messages = Vec::new();

        for _ in 0..=MAX_ORDER_CONFIRMATIONS {
            let Some(reply) = replies.into_iter().next() else {
                return Err(GatewayError::Decode("empty order reply".to_string()));
            };
            match reply {
                WireOrderReply::Placed {
                    order_id,
                    order_status,
                } => {
                    let order_id = match order_id {
                        serde_json::Value::String(s) => s,
                        other => other.to_string(),
                    };
                    tracing::info!(
                        symbol = %order.symbol(),
                        side = order.side().as_gateway_str(),
                        %order_id,
                        "Order accepted by gateway"
                    );
                    return Ok(OrderAck {
                        order_id,
                        client_order_id,
                        status: order_status.unwrap_or_else(|| "Submitted".to_string()),
                        messages,
                    });
                }
                WireOrderReply::Confirm { id, message } => {
                    tracing::info!(reply_id = %id, ?message, "Confirming order warning");
                    messages.extend(message);
                    let path = format!("/iserver/reply/{id}");
                    replies = self
                        .post("order_reply", &path, &WireConfirm { confirmed: true })
                        .await?;
                }
            }
        }

        Err(GatewayError::Status {
            status: StatusCode::CONFLICT.as_u16(),
            body: format!("order still awaiting confirmation: {}", messages.join("; ")),
        })
    }
}

async fn execute<T: DeserializeOwned>(path: &str, request: RequestBuilder) -> Result<T, GatewayError> {
    let response = request.send().await.map_err(transport_error)?;
    let status = response.status();
    let text = response.text().await.map_err(transport_error)?;

    if !status.is_success() {
        return Err(status_error(status, path, text));
    }

    let text = if text.trim().is_empty() { "null" } else { &text };
    serde_json::from_str(text).map_err(|e| GatewayError::Decode(e.to_string()))
}

fn transport_error(e: reqwest::Error) -> GatewayError {
    if e.is_timeout() {
        GatewayError::Timeout
    } else {
        GatewayError::Network(e.to_string())
    }
}

/// Categorize an error status.
fn status_error(status: StatusCode, path: &str, body: String) -> GatewayError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => GatewayError::Unauthorized,
        StatusCode::NOT_FOUND => GatewayError::NotFound(path.to_string()),
        _ => {
            let body = serde_json::from_str::<WireError>(&body)
                .ok()
                .and_then(|e| e.error)
                .unwrap_or(body);
            GatewayError::Status {
                status: status.as_u16(),
                body,
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
