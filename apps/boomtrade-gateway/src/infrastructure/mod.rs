//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer, plus the HTTP surface and wiring.

/// Configuration from environment variables.
pub mod config;

/// Gateway credential stores.
pub mod credentials;

/// Gateway local API client and push feed.
pub mod gateway;

/// Health check and metrics routes.
pub mod health;

/// REST facade and WebSocket routes.
pub mod http;

/// Ordered shutdown.
pub mod lifecycle;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Session health monitor.
pub mod session;

/// Market data fan-out.
pub mod stream;

/// Gateway process supervision.
pub mod supervisor;

/// OpenTelemetry tracing integration.
pub mod telemetry;
