//! REST handlers. Each one is a thin adapter over the facade.

use axum::Json;
use axum::body::Bytes;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use serde::{Deserialize, Serialize};

use super::AppState;
use super::error::ApiError;
use crate::application::ports::Credentials;
use crate::application::services::{FacadeError, GatewayStatus};
use crate::domain::account::{AccountSummary, Position};
use crate::domain::market::{OptionChain, OptionSearch, Tick};
use crate::domain::order::{OptionOrderPayload, OrderAck, StockOrderPayload, WorkingOrder};

type ApiResult<T> = Result<Json<T>, ApiError>;

// =============================================================================
// Gateway lifecycle
// =============================================================================

/// Body of `POST /gateway/start`.
#[derive(Debug, Deserialize)]
pub struct StartRequest {
    /// Gateway login.
    pub username: String,
    /// Gateway password.
    pub password: String,
    /// Preferred account.
    #[serde(default)]
    pub account: Option<String>,
}

impl StartRequest {
    /// Parse an optional start body. An empty body means "use the store".
    ///
    /// # Errors
    ///
    /// Returns a validation error on malformed JSON or blank credentials.
    pub fn parse(body: &[u8]) -> Result<Option<Credentials>, FacadeError> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }

        let request: Self = serde_json::from_slice(body)
            .map_err(|e| FacadeError::validation("body", e.to_string()))?;
        if request.username.trim().is_empty() {
            return Err(FacadeError::validation("username", "cannot be empty"));
        }
        if request.password.is_empty() {
            return Err(FacadeError::validation("password", "cannot be empty"));
        }

        let account = request
            .account
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty());
        Ok(Some(Credentials::new(
            request.username.trim().to_string(),
            request.password,
            account,
        )))
    }
}

pub(super) async fn start_gateway(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<GatewayStatus> {
    let credentials = StartRequest::parse(&body)?;
    tracing::info!(
        supplied_credentials = credentials.is_some(),
        "Gateway start requested"
    );
    Ok(Json(state.facade.start_gateway(credentials).await?))
}

pub(super) async fn stop_gateway(State(state): State<AppState>) -> ApiResult<GatewayStatus> {
    tracing::info!("Gateway stop requested");
    Ok(Json(state.facade.stop_gateway().await?))
}

pub(super) async fn gateway_status(State(state): State<AppState>) -> Json<GatewayStatus> {
    Json(state.facade.status())
}

// =============================================================================
// Reads
// =============================================================================

#[derive(Debug, Serialize)]
pub(super) struct PositionsResponse {
    positions: Vec<Position>,
}

#[derive(Debug, Serialize)]
pub(super) struct OrdersResponse {
    orders: Vec<WorkingOrder>,
}

pub(super) async fn account(State(state): State<AppState>) -> ApiResult<AccountSummary> {
    Ok(Json(state.facade.account().await?))
}

pub(super) async fn positions(State(state): State<AppState>) -> ApiResult<PositionsResponse> {
    let positions = state.facade.positions().await?;
    Ok(Json(PositionsResponse { positions }))
}

pub(super) async fn orders(State(state): State<AppState>) -> ApiResult<OrdersResponse> {
    let orders = state.facade.orders().await?;
    Ok(Json(OrdersResponse { orders }))
}

pub(super) async fn market_data(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
) -> ApiResult<Tick> {
    Ok(Json(state.facade.market_data(&symbol).await?))
}

pub(super) async fn search_options(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
) -> ApiResult<OptionSearch> {
    Ok(Json(state.facade.search_options(&symbol).await?))
}

pub(super) async fn option_chain(
    State(state): State<AppState>,
    Path((symbol, expiry)): Path<(String, String)>,
) -> ApiResult<OptionChain> {
    Ok(Json(state.facade.option_chain(&symbol, &expiry).await?))
}

// =============================================================================
// Orders
// =============================================================================

pub(super) async fn place_stock_order(
    State(state): State<AppState>,
    payload: Result<Json<StockOrderPayload>, JsonRejection>,
) -> ApiResult<OrderAck> {
    let Json(payload) = payload?;
    Ok(Json(state.facade.place_stock_order(payload).await?))
}

pub(super) async fn place_option_order(
    State(state): State<AppState>,
    payload: Result<Json<OptionOrderPayload>, JsonRejection>,
) -> ApiResult<OrderAck> {
    let Json(payload) = payload?;
    Ok(Json(state.facade.place_option_order(payload).await?))
}
