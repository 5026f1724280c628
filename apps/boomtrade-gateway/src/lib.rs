#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! BoomTrade Gateway - Brokerage Gateway Supervisor and Streaming Proxy
//!
//! Launches and supervises the local brokerage authentication gateway,
//! tracks its session through a readiness state machine, and fronts it
//! with a state-gated REST facade plus a WebSocket market data fan-out.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Pure types and rules
//!   - `session`: Session states, probe outcomes and the transition table
//!   - `order`: Order payload validation
//!   - `market`: Symbols and quote ticks
//!   - `subscription`: Symbol/connection subscription book
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Gateway API, quote source, launcher, credentials, control
//!   - `services`: Backoff, session handle, facade and its error taxonomy
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `supervisor`: Gateway process actor and launcher
//!   - `session`: Periodic health probing
//!   - `gateway`: Local API client and optional push feed
//!   - `stream`: Hub, connection registry and per-symbol workers
//!   - `http`: REST and WebSocket routes
//!   - `health`, `metrics`, `telemetry`, `config`, `credentials`, `lifecycle`
//!
//! # Data Flow
//!
//! ```text
//!                ┌────────────┐   probes   ┌───────────────┐
//!   supervisor ─►│  gateway   │◄───────────│ HealthMonitor │──► SessionHandle
//!   (process)    │ local API  │            └───────────────┘        │
//!                └────────────┘                                     │ gates
//!                   ▲      ▲                                        ▼
//!          requests │      │ snapshots / push          ┌──────────────────┐
//!                   │      └── SymbolWorker ──► Hub ──►│ WebSocket clients│
//!                Facade ◄── REST clients               └──────────────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core types with no external dependencies.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::market::{Symbol, Tick};
pub use domain::session::{GatewaySession, ProbeOutcome, ProbePolicy, SessionState};
pub use domain::subscription::{ConnectionId, SubscriptionBook, SubscriptionStats};

// Ports
pub use application::ports::{
    CredentialStore, Credentials, GatewayApi, GatewayControl, GatewayError, GatewayLauncher,
    GatewayProcess, ProcessExit, QuoteSource, SupervisorError, SupervisorStatus,
};

// Services
pub use application::services::{
    BackoffConfig, BackoffPolicy, Facade, FacadeError, FacadeSettings, GatewayStatus,
    SessionHandle,
};

// Infrastructure config
pub use infrastructure::config::{AppConfig, ConfigError};

// HTTP surface
pub use infrastructure::http::{ApiError, ApiServer, ApiServerError, AppState, create_router};

// Stream hub (for integration tests)
pub use infrastructure::stream::{HubConfig, StreamHub};

// Supervisor
pub use infrastructure::supervisor::{CommandLauncher, ProcessSupervisor, SupervisorOptions};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
