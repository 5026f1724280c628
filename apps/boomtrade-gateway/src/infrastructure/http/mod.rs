//! HTTP Surface
//!
//! The axum router serving the REST facade, the market data WebSocket and
//! the health and metrics routes on a single port.
//!
//! # Endpoints
//!
//! - `POST /gateway/start`, `POST /gateway/stop`, `GET /gateway/status`
//! - `GET /account`, `GET /positions`, `GET /orders`
//! - `GET /marketdata/{symbol}`
//! - `GET /options/search/{symbol}`, `GET /options/chain/{symbol}/{expiry}`
//! - `POST /order/stock`, `POST /order/option`
//! - `GET /ws/marketdata` (WebSocket upgrade)
//! - `GET /health`, `GET /healthz`, `GET /readyz`, `GET /metrics`

mod error;
mod handlers;
mod server;
mod ws;

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::routing::{get, post};

pub use error::{ApiError, ErrorBody};
pub use handlers::StartRequest;
pub use server::{ApiServer, ApiServerError};

use crate::application::services::Facade;
use crate::infrastructure::health;
use crate::infrastructure::stream::StreamHub;

/// Shared state for all routes.
#[derive(Clone)]
pub struct AppState {
    /// REST facade.
    pub facade: Arc<Facade>,
    /// Market data hub.
    pub hub: StreamHub,
    /// Ping period for WebSocket clients.
    pub heartbeat: Duration,
    /// Service start time.
    pub started_at: Instant,
    /// Service version.
    pub version: &'static str,
}

impl AppState {
    /// Create state for the router.
    #[must_use]
    pub fn new(facade: Arc<Facade>, hub: StreamHub, heartbeat: Duration) -> Self {
        Self {
            facade,
            hub,
            heartbeat,
            started_at: Instant::now(),
            version: env!("CARGO_PKG_VERSION"),
        }
    }
}

/// Build the full router.
#[must_use]
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/gateway/start", post(handlers::start_gateway))
        .route("/gateway/stop", post(handlers::stop_gateway))
        .route("/gateway/status", get(handlers::gateway_status))
        .route("/account", get(handlers::account))
        .route("/positions", get(handlers::positions))
        .route("/orders", get(handlers::orders))
        .route("/marketdata/{symbol}", get(handlers::market_data))
        .route("/options/search/{symbol}", get(handlers::search_options))
        .route(
            "/options/chain/{symbol}/{expiry}",
            get(handlers::option_chain),
        )
        .route("/order/stock", post(handlers::place_stock_order))
        .route("/order/option", post(handlers::place_option_order))
        .route("/ws/marketdata", get(ws::ws_handler))
        .merge(health::routes())
        .with_state(state)
}
