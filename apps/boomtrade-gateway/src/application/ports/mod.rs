//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `GatewayApi`: Request/response calls against the gateway's local API
//! - `QuoteSource`: Per-symbol quote snapshots and optional push streams
//! - `GatewayLauncher` / `GatewayProcess`: Spawning the gateway process
//! - `CredentialStore`: Where gateway credentials come from
//!
//! ## Driver Ports (Inbound)
//!
//! - `GatewayControl`: Start, stop and status of the supervised gateway

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::domain::account::{AccountInfo, AccountSummary, Position};
use crate::domain::market::{OptionChain, OptionSearch, Symbol, Tick};
use crate::domain::order::{OrderAck, OrderRequest, WorkingOrder};
use crate::domain::session::ProbeOutcome;

// =============================================================================
// Credentials
// =============================================================================

/// Gateway login credentials. Held in memory only.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct Credentials {
    username: String,
    password: String,
    #[serde(default)]
    account: Option<String>,
}

impl Credentials {
    /// Create new credentials.
    #[must_use]
    pub const fn new(username: String, password: String, account: Option<String>) -> Self {
        Self {
            username,
            password,
            account,
        }
    }

    /// Get the login name.
    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Get the password.
    #[must_use]
    pub fn password(&self) -> &str {
        &self.password
    }

    /// Get the preferred account id, if any.
    #[must_use]
    pub fn account(&self) -> Option<&str> {
        self.account.as_deref()
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &"[REDACTED]")
            .field("password", &"[REDACTED]")
            .field("account", &self.account)
            .finish()
    }
}

/// Credential lookup failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CredentialsError {
    /// No credentials configured anywhere.
    #[error("no gateway credentials available")]
    Missing,
}

/// Source of gateway credentials.
pub trait CredentialStore: Send + Sync {
    /// Fetch the credentials used to launch the gateway.
    ///
    /// # Errors
    ///
    /// Returns `CredentialsError::Missing` when none are available.
    fn get_credentials(&self) -> Result<Credentials, CredentialsError>;

    /// Keep credentials supplied at runtime for later restarts.
    ///
    /// Stores that cannot hold credentials ignore this.
    fn remember(&self, _credentials: Credentials) {}
}

// =============================================================================
// Gateway API
// =============================================================================

/// Errors from calls against the gateway's local API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    /// The call exceeded its deadline.
    #[error("gateway request timed out")]
    Timeout,
    /// Connection-level failure.
    #[error("gateway network error: {0}")]
    Network(String),
    /// Gateway answered with an error status.
    #[error("gateway returned {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Error body or message.
        body: String,
    },
    /// Gateway session is not authenticated.
    #[error("gateway session is not authenticated")]
    Unauthorized,
    /// Requested resource does not exist upstream.
    #[error("not found: {0}")]
    NotFound(String),
    /// Response could not be decoded.
    #[error("failed to decode gateway response: {0}")]
    Decode(String),
}

impl GatewayError {
    /// Whether a single retry may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Timeout | Self::Network(_) => true,
            Self::Status { status, .. } => *status >= 500,
            Self::Unauthorized | Self::NotFound(_) | Self::Decode(_) => false,
        }
    }
}

/// Request/response operations against the gateway.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GatewayApi: Send + Sync {
    /// Probe reachability and authentication. Never fails; transport
    /// errors are reported as `ProbeOutcome::Unreachable`.
    async fn probe(&self) -> ProbeOutcome;

    /// List accounts visible to the session.
    async fn accounts(&self) -> Result<Vec<AccountInfo>, GatewayError>;

    /// Balances for one account.
    async fn account_summary(&self, account_id: &str) -> Result<AccountSummary, GatewayError>;

    /// Open positions for one account.
    async fn positions(&self, account_id: &str) -> Result<Vec<Position>, GatewayError>;

    /// Orders currently known to the gateway.
    async fn live_orders(&self) -> Result<Vec<WorkingOrder>, GatewayError>;

    /// Quote snapshot for a symbol.
    async fn quote(&self, symbol: &Symbol) -> Result<Tick, GatewayError>;

    /// Listed option expiries for an underlying.
    async fn search_options(&self, symbol: &Symbol) -> Result<OptionSearch, GatewayError>;

    /// Strikes for an underlying and expiry.
    async fn option_chain(
        &self,
        symbol: &Symbol,
        expiry: NaiveDate,
    ) -> Result<OptionChain, GatewayError>;

    /// Submit a validated order.
    async fn place_order(
        &self,
        account_id: &str,
        order: &OrderRequest,
    ) -> Result<OrderAck, GatewayError>;
}

// =============================================================================
// Quote Source
// =============================================================================

/// Quote supply for the stream hub.
#[async_trait]
pub trait QuoteSource: Send + Sync {
    /// Poll a single quote snapshot.
    async fn snapshot(&self, symbol: &Symbol) -> Result<Tick, GatewayError>;

    /// Open a push stream for a symbol, if push delivery is available.
    ///
    /// The receiver closes when the push channel goes away.
    async fn open_push(&self, symbol: &Symbol) -> Option<mpsc::Receiver<Tick>>;

    /// Release a push stream opened with `open_push`.
    async fn close_push(&self, symbol: &Symbol);
}

// =============================================================================
// Gateway Process
// =============================================================================

/// How a gateway process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProcessExit {
    /// Exit code, if the process exited normally.
    pub code: Option<i32>,
}

impl ProcessExit {
    /// Whether the process exited with status zero.
    #[must_use]
    pub const fn success(&self) -> bool {
        matches!(self.code, Some(0))
    }
}

/// A running gateway process.
#[async_trait]
pub trait GatewayProcess: Send {
    /// OS process id, if known.
    fn pid(&self) -> Option<u32>;

    /// Wait for the process to exit. Must be cancel safe.
    async fn wait(&mut self) -> ProcessExit;

    /// Ask the process to exit, forcing it after `grace`.
    async fn terminate(&mut self, grace: Duration) -> ProcessExit;
}

/// Spawns gateway processes.
#[async_trait]
pub trait GatewayLauncher: Send + Sync {
    /// Launch the gateway with injected credentials.
    async fn launch(
        &self,
        credentials: &Credentials,
    ) -> Result<Box<dyn GatewayProcess>, SupervisorError>;
}

// =============================================================================
// Gateway Control
// =============================================================================

/// Supervisor errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SupervisorError {
    /// The gateway process could not be spawned.
    #[error("failed to spawn gateway: {0}")]
    Spawn(String),
    /// No credentials were supplied or stored.
    #[error("gateway credentials are missing")]
    CredentialsMissing,
    /// The supervisor has shut down.
    #[error("supervisor is stopped")]
    Stopped,
}

/// Supervisor status snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SupervisorStatus {
    /// Whether a gateway process is alive.
    pub running: bool,
    /// Process id of the live gateway.
    pub pid: Option<u32>,
    /// Consecutive failed starts or crashes.
    pub consecutive_failures: u32,
    /// When the next automatic restart fires.
    pub next_restart_at: Option<DateTime<Utc>>,
    /// Restart budget exhausted; waiting for an explicit start.
    pub fatal: bool,
}

/// Start, stop and inspect the supervised gateway.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GatewayControl: Send + Sync {
    /// Start the gateway. Idempotent while it is already up or starting.
    ///
    /// Credentials supplied here are remembered for restarts; without
    /// them the credential store is consulted.
    async fn start(
        &self,
        credentials: Option<Credentials>,
    ) -> Result<SupervisorStatus, SupervisorError>;

    /// Stop the gateway and cancel pending restarts.
    async fn stop(&self) -> Result<SupervisorStatus, SupervisorError>;

    /// Current supervisor status.
    fn status(&self) -> SupervisorStatus;

    /// Whether a gateway process is alive.
    fn is_running(&self) -> bool {
        self.status().running
    }
}
