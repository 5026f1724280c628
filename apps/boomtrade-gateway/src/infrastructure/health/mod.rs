//! Health Check and Metrics Endpoints
//!
//! Health routes served alongside the REST facade. Used by container
//! orchestrators, load balancers, and monitoring systems.
//!
//! # Endpoints
//!
//! - `GET /health` - JSON health status
//! - `GET /healthz` - liveness probe (simple OK)
//! - `GET /readyz` - readiness probe (gateway session authenticated)
//! - `GET /metrics` - Prometheus metrics in text format

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::session::SessionState;
use crate::infrastructure::http::AppState;
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status.
    pub status: HealthStatus,
    /// Whether facade requests are forwarded to the gateway.
    pub gateway_ready: bool,
    /// Gateway session state.
    pub state: SessionState,
    /// Service version.
    pub version: String,
    /// Service uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Supervisor summary.
    pub supervisor: SupervisorInfo,
    /// Streaming summary.
    pub stream: StreamInfo,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Gateway session authenticated.
    Healthy,
    /// Gateway starting, awaiting login, stale or restarting.
    Degraded,
    /// Restart budget exhausted.
    Unhealthy,
}

/// Supervisor summary.
#[derive(Debug, Clone, Serialize)]
pub struct SupervisorInfo {
    /// Whether a gateway process is alive.
    pub running: bool,
    /// Consecutive failed starts or crashes.
    pub consecutive_failures: u32,
}

/// Streaming summary.
#[derive(Debug, Clone, Serialize)]
pub struct StreamInfo {
    /// Connected WebSocket clients.
    pub clients: usize,
    /// Symbols with at least one subscriber.
    pub symbols: usize,
}

// =============================================================================
// Routes
// =============================================================================

/// Health and metrics routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<AppState>) -> impl IntoResponse {
    if state.facade.session().state() == SessionState::Authenticated {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            let body = handle.render();
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                body,
            )
        },
    )
}

fn build_health_response(state: &AppState) -> HealthResponse {
    let status = state.facade.status();
    let session_state = status.session.state();
    let stream = state.hub.stats();

    HealthResponse {
        status: determine_health_status(session_state),
        gateway_ready: status.ready,
        state: session_state,
        version: state.version.to_string(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        supervisor: SupervisorInfo {
            running: status.supervisor.running,
            consecutive_failures: status.supervisor.consecutive_failures,
        },
        stream: StreamInfo {
            clients: state.hub.client_count(),
            symbols: stream.symbol_count,
        },
    }
}

const fn determine_health_status(state: SessionState) -> HealthStatus {
    match state {
        SessionState::Authenticated => HealthStatus::Healthy,
        SessionState::FatalStopped => HealthStatus::Unhealthy,
        SessionState::Down
        | SessionState::Starting
        | SessionState::AwaitingAuth
        | SessionState::Stale => HealthStatus::Degraded,
    }
}

// =============================================================================
// Tests
// =============================================================================
