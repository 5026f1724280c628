//! Prometheus Metrics Module
//!
//! Exposes application metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Session**: State transitions and the current state
//! - **Supervisor**: Restarts and consecutive failures
//! - **Upstream**: Gateway API request counts and latencies
//! - **Streaming**: Ticks received, delivered and deduplicated; client connections
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the HTTP port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::domain::session::{SessionState, Transition};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// # Panics
///
/// Panics if the recorder cannot be installed.
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let builder = PrometheusBuilder::new();
            let handle = builder
                .install_recorder()
                .expect("failed to install Prometheus recorder");

            register_metrics();
            handle
        })
        .clone()
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Session
    describe_counter!(
        "boomtrade_gateway_session_transitions_total",
        "Gateway session state transitions"
    );
    describe_gauge!(
        "boomtrade_gateway_session_state",
        "Current gateway session state (1 for the active state)"
    );

    // Supervisor
    describe_counter!(
        "boomtrade_gateway_supervisor_restarts_total",
        "Automatic gateway restarts scheduled by the supervisor"
    );
    describe_gauge!(
        "boomtrade_gateway_supervisor_consecutive_failures",
        "Consecutive gateway failures since the last authenticated session"
    );

    // Upstream
    describe_counter!(
        "boomtrade_gateway_upstream_requests_total",
        "Gateway API requests by operation and outcome"
    );
    describe_histogram!(
        "boomtrade_gateway_upstream_request_seconds",
        "Gateway API request latency"
    );

    // Streaming
    describe_counter!(
        "boomtrade_gateway_ticks_received_total",
        "Quote ticks received from the gateway"
    );
    describe_counter!(
        "boomtrade_gateway_ticks_delivered_total",
        "Tick messages queued to client connections"
    );
    describe_counter!(
        "boomtrade_gateway_ticks_deduplicated_total",
        "Ticks suppressed because the quote did not change"
    );
    describe_counter!(
        "boomtrade_gateway_connections_dropped_total",
        "Client connections dropped by the stream hub"
    );
    describe_counter!(
        "boomtrade_gateway_push_reconnects_total",
        "Push feed reconnection attempts"
    );
    describe_gauge!(
        "boomtrade_gateway_ws_clients",
        "Open market data WebSocket connections"
    );
    describe_gauge!(
        "boomtrade_gateway_active_symbols",
        "Symbols with at least one subscriber"
    );
}

// =============================================================================
// Metric Labels
// =============================================================================

/// Where a tick came from.
#[derive(Debug, Clone, Copy)]
pub enum TickSource {
    /// Snapshot polling.
    Poll,
    /// Push feed.
    Push,
}

impl TickSource {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Poll => "poll",
            Self::Push => "push",
        }
    }
}

/// Why a client connection was dropped.
#[derive(Debug, Clone, Copy)]
pub enum DropReason {
    /// Send buffer overflowed.
    Overflow,
    /// Connection was already closed.
    Closed,
    /// Service shutdown.
    Shutdown,
}

impl DropReason {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Overflow => "overflow",
            Self::Closed => "closed",
            Self::Shutdown => "shutdown",
        }
    }
}

/// Upstream request outcome.
#[derive(Debug, Clone, Copy)]
pub enum UpstreamOutcome {
    /// Success.
    Ok,
    /// Error response or transport failure.
    Error,
    /// Deadline exceeded.
    Timeout,
}

impl UpstreamOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Error => "error",
            Self::Timeout => "timeout",
        }
    }
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record session transitions and publish the resulting state.
pub fn record_session_transitions(transitions: &[Transition]) {
    for transition in transitions {
        counter!(
            "boomtrade_gateway_session_transitions_total",
            "from" => transition.from.as_str(),
            "to" => transition.to.as_str()
        )
        .increment(1);
    }
    if let Some(last) = transitions.last() {
        set_session_state(last.to);
    }
}

/// Set the session state gauge.
pub fn set_session_state(current: SessionState) {
    for state in SessionState::all() {
        let value = if *state == current { 1.0 } else { 0.0 };
        gauge!("boomtrade_gateway_session_state", "state" => state.as_str()).set(value);
    }
}

/// Record a scheduled restart.
pub fn record_supervisor_restart() {
    counter!("boomtrade_gateway_supervisor_restarts_total").increment(1);
}

/// Update the consecutive failure gauge.
pub fn set_consecutive_failures(count: u32) {
    gauge!("boomtrade_gateway_supervisor_consecutive_failures").set(f64::from(count));
}

/// Record a gateway API request.
pub fn record_upstream_request(
    operation: &'static str,
    outcome: UpstreamOutcome,
    duration: Duration,
) {
    counter!(
        "boomtrade_gateway_upstream_requests_total",
        "operation" => operation,
        "outcome" => outcome.as_str()
    )
    .increment(1);
    histogram!(
        "boomtrade_gateway_upstream_request_seconds",
        "operation" => operation
    )
    .record(duration.as_secs_f64());
}

/// Record a tick received from the gateway.
pub fn record_tick_received(source: TickSource) {
    counter!(
        "boomtrade_gateway_ticks_received_total",
        "source" => source.as_str()
    )
    .increment(1);
}

/// Record tick messages queued to clients.
pub fn record_ticks_delivered(count: u64) {
    counter!("boomtrade_gateway_ticks_delivered_total").increment(count);
}

/// Record a suppressed duplicate tick.
pub fn record_tick_deduplicated() {
    counter!("boomtrade_gateway_ticks_deduplicated_total").increment(1);
}

/// Record a dropped client connection.
pub fn record_connection_dropped(reason: DropReason) {
    counter!(
        "boomtrade_gateway_connections_dropped_total",
        "reason" => reason.as_str()
    )
    .increment(1);
}

/// Record a push feed reconnection attempt.
pub fn record_push_reconnect() {
    counter!("boomtrade_gateway_push_reconnects_total").increment(1);
}

/// Update the open WebSocket client count.
#[allow(clippy::cast_precision_loss)]
pub fn set_ws_clients(count: usize) {
    gauge!("boomtrade_gateway_ws_clients").set(count as f64);
}

/// Update the active symbol count.
#[allow(clippy::cast_precision_loss)]
pub fn set_active_symbols(count: usize) {
    gauge!("boomtrade_gateway_active_symbols").set(count as f64);
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_values() {
        assert_eq!(TickSource::Poll.as_str(), "poll");
        assert_eq!(TickSource::Push.as_str(), "push");
        assert_eq!(DropReason::Overflow.as_str(), "overflow");
        assert_eq!(DropReason::Shutdown.as_str(), "shutdown");
        assert_eq!(UpstreamOutcome::Timeout.as_str(), "timeout");
    }

    #[test]
    fn recording_without_recorder_is_noop() {
        record_session_transitions(&[Transition {
            from: SessionState::Down,
            to: SessionState::Starting,
        }]);
        record_upstream_request("quote", UpstreamOutcome::Ok, Duration::from_millis(3));
        record_tick_received(TickSource::Poll);
        set_ws_clients(2);
    }

    #[test]
    fn rendered_metrics_include_session_state() {
        let handle = init_metrics();
        set_session_state(SessionState::AwaitingAuth);
        let rendered = handle.render();
        assert!(rendered.contains("boomtrade_gateway_session_state"));
        assert!(get_metrics_handle().is_some());
    }
}
