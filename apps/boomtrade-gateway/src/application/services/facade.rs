//! REST Facade
//!
//! Gates every operation on the session state before anything is sent
//! upstream, validates client input locally, and forwards the rest with a
//! bounded timeout and at most one implicit retry for reads.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;

use crate::application::ports::{
    Credentials, GatewayApi, GatewayControl, GatewayError, SupervisorError, SupervisorStatus,
};
use crate::application::services::backoff::{BackoffConfig, BackoffPolicy};
use crate::application::services::error::FacadeError;
use crate::application::services::session::SessionHandle;
use crate::domain::account::{AccountSummary, Position};
use crate::domain::market::{OptionChain, OptionSearch, Symbol, Tick};
use crate::domain::order::{
    OptionOrderPayload, OrderAck, StockOrderPayload, WorkingOrder, parse_expiry,
};
use crate::domain::session::{GatewaySession, SessionState};

/// Facade tuning.
#[derive(Debug, Clone)]
pub struct FacadeSettings {
    /// Deadline for each upstream call.
    pub upstream_timeout: Duration,
    /// Delay before the single implicit retry.
    pub retry_delay: Duration,
    /// Supervisor restart base, used as the retry hint when no restart is scheduled.
    pub restart_base: Duration,
    /// Health probe period, used as the retry hint while starting.
    pub probe_interval: Duration,
}

impl Default for FacadeSettings {
    fn default() -> Self {
        Self {
            upstream_timeout: Duration::from_secs(10),
            retry_delay: Duration::from_millis(250),
            restart_base: Duration::from_secs(5),
            probe_interval: Duration::from_secs(15),
        }
    }
}

/// Combined session and supervisor status.
#[derive(Debug, Clone, Serialize)]
pub struct GatewayStatus {
    /// Session record.
    pub session: GatewaySession,
    /// Supervisor status.
    pub supervisor: SupervisorStatus,
    /// Whether requests are being forwarded.
    pub ready: bool,
}

/// State-gated front for the gateway API.
pub struct Facade {
    gateway: Arc<dyn GatewayApi>,
    control: Arc<dyn GatewayControl>,
    session: Arc<SessionHandle>,
    settings: FacadeSettings,
}

impl Facade {
    /// Create a facade.
    #[must_use]
    pub fn new(
        gateway: Arc<dyn GatewayApi>,
        control: Arc<dyn GatewayControl>,
        session: Arc<SessionHandle>,
        settings: FacadeSettings,
    ) -> Self {
        Self {
            gateway,
            control,
            session,
            settings,
        }
    }

    /// The shared session handle.
    #[must_use]
    pub const fn session(&self) -> &Arc<SessionHandle> {
        &self.session
    }

    // =========================================================================
    // Gateway lifecycle
    // =========================================================================

    /// Session and supervisor status. Never gated.
    #[must_use]
    pub fn status(&self) -> GatewayStatus {
        let session = self.session.snapshot();
        let ready = session.state().is_ready();
        GatewayStatus {
            session,
            supervisor: self.control.status(),
            ready,
        }
    }

    /// Start the gateway. Allowed in every state.
    ///
    /// # Errors
    ///
    /// `CredentialsMissing` when none are supplied or stored, or
    /// `GatewayUnavailable` when the process cannot be spawned.
    pub async fn start_gateway(
        &self,
        credentials: Option<Credentials>,
    ) -> Result<GatewayStatus, FacadeError> {
        match self.control.start(credentials).await {
            Ok(_) => Ok(self.status()),
            Err(SupervisorError::CredentialsMissing) => Err(FacadeError::CredentialsMissing),
            Err(err) => {
                tracing::warn!(error = %err, "Gateway start failed");
                let state = self.session.state();
                Err(FacadeError::GatewayUnavailable {
                    state,
                    retry_after_secs: self.retry_after(state),
                })
            }
        }
    }

    /// Stop the gateway and cancel pending restarts.
    ///
    /// # Errors
    ///
    /// `GatewayUnavailable` when the supervisor is already shut down.
    pub async fn stop_gateway(&self) -> Result<GatewayStatus, FacadeError> {
        self.control.stop().await?;
        Ok(self.status())
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Account summary for the session's account.
    ///
    /// # Errors
    ///
    /// Gating errors or upstream failures.
    pub async fn account(&self) -> Result<AccountSummary, FacadeError> {
        self.gate()?;
        let account_id = self.resolve_account().await?;
        self.forward("account_summary", true, || {
            self.gateway.account_summary(&account_id)
        })
        .await
    }

    /// Open positions for the session's account.
    ///
    /// # Errors
    ///
    /// Gating errors or upstream failures.
    pub async fn positions(&self) -> Result<Vec<Position>, FacadeError> {
        self.gate()?;
        let account_id = self.resolve_account().await?;
        self.forward("positions", true, || self.gateway.positions(&account_id))
            .await
    }

    /// Orders currently known to the gateway.
    ///
    /// # Errors
    ///
    /// Gating errors or upstream failures.
    pub async fn orders(&self) -> Result<Vec<WorkingOrder>, FacadeError> {
        self.gate()?;
        self.forward("live_orders", true, || self.gateway.live_orders())
            .await
    }

    /// One-shot quote.
    ///
    /// # Errors
    ///
    /// Gating errors, an invalid symbol, or upstream failures.
    pub async fn market_data(&self, symbol: &str) -> Result<Tick, FacadeError> {
        self.gate()?;
        let symbol = parse_symbol(symbol)?;
        self.forward("quote", true, || self.gateway.quote(&symbol))
            .await
    }

    /// Option expiry discovery for an underlying.
    ///
    /// # Errors
    ///
    /// Gating errors, an invalid symbol, or upstream failures.
    pub async fn search_options(&self, symbol: &str) -> Result<OptionSearch, FacadeError> {
        self.gate()?;
        let symbol = parse_symbol(symbol)?;
        self.forward("search_options", true, || {
            self.gateway.search_options(&symbol)
        })
        .await
    }

    /// Strikes for an underlying and expiry.
    ///
    /// # Errors
    ///
    /// Gating errors, an invalid symbol or expiry, or upstream failures.
    pub async fn option_chain(
        &self,
        symbol: &str,
        expiry: &str,
    ) -> Result<OptionChain, FacadeError> {
        self.gate()?;
        let symbol = parse_symbol(symbol)?;
        let expiry = parse_expiry(expiry, Utc::now().date_naive())?;
        self.forward("option_chain", true, || {
            self.gateway.option_chain(&symbol, expiry)
        })
        .await
    }

    // =========================================================================
    // Orders
    // =========================================================================

    /// Place an equity order. Never retried.
    ///
    /// # Errors
    ///
    /// Gating errors, validation errors, or upstream failures.
    pub async fn place_stock_order(
        &self,
        payload: StockOrderPayload,
    ) -> Result<OrderAck, FacadeError> {
        self.gate()?;
        let order = payload.validate()?;
        let account_id = self.resolve_account().await?;
        tracing::info!(
            symbol = %order.symbol(),
            side = order.side().as_gateway_str(),
            quantity = %order.quantity(),
            "Placing stock order"
        );
        self.forward("place_order", false, || {
            self.gateway.place_order(&account_id, &order)
        })
        .await
    }

    /// Place a single-leg option order. Never retried.
    ///
    /// # Errors
    ///
    /// Gating errors, validation errors, or upstream failures.
    pub async fn place_option_order(
        &self,
        payload: OptionOrderPayload,
    ) -> Result<OrderAck, FacadeError> {
        self.gate()?;
        let order = payload.validate(Utc::now().date_naive())?;
        let account_id = self.resolve_account().await?;
        tracing::info!(
            symbol = %order.symbol(),
            side = order.side().as_gateway_str(),
            quantity = %order.quantity(),
            "Placing option order"
        );
        self.forward("place_order", false, || {
            self.gateway.place_order(&account_id, &order)
        })
        .await
    }

    // =========================================================================
    // Gating and forwarding
    // =========================================================================

    fn gate(&self) -> Result<SessionState, FacadeError> {
        let state = self.session.state();
        match state {
            SessionState::Down | SessionState::Starting | SessionState::FatalStopped => {
                Err(FacadeError::GatewayUnavailable {
                    state,
                    retry_after_secs: self.retry_after(state),
                })
            }
            SessionState::AwaitingAuth => Err(FacadeError::AuthenticationRequired { state }),
            SessionState::Authenticated | SessionState::Stale => Ok(state),
        }
    }

    fn retry_after(&self, state: SessionState) -> Option<u64> {
        match state {
            SessionState::Down => Some(self.control.status().next_restart_at.map_or_else(
                || self.settings.restart_base.as_secs(),
                |at| {
                    let millis = (at - Utc::now()).num_milliseconds().max(0);
                    u64::try_from(millis).unwrap_or(0).div_ceil(1000).max(1)
                },
            )),
            SessionState::Starting => Some(self.settings.probe_interval.as_secs()),
            _ => None,
        }
    }

    async fn resolve_account(&self) -> Result<String, FacadeError> {
        if let Some(account_id) = self.session.account_id() {
            return Ok(account_id);
        }

        let accounts = self
            .forward("accounts", true, || self.gateway.accounts())
            .await?;
        accounts
            .into_iter()
            .next()
            .map(|account| account.account_id)
            .ok_or_else(|| FacadeError::UpstreamError {
                status: None,
                detail: "gateway reported no accounts".to_string(),
            })
    }

    async fn forward<T, F, Fut>(
        &self,
        operation: &'static str,
        retryable: bool,
        call: F,
    ) -> Result<T, FacadeError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        let max_attempts = u32::from(retryable);
        let mut backoff = BackoffPolicy::new(
            BackoffConfig::new(self.settings.retry_delay, self.settings.retry_delay, max_attempts)
                .with_jitter(0.0),
        );

        loop {
            let result = match tokio::time::timeout(self.settings.upstream_timeout, call()).await {
                Ok(result) => result,
                Err(_) => Err(GatewayError::Timeout),
            };

            let err = match result {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if retryable && err.is_transient() {
                if let Some(delay) = backoff.next_delay() {
                    tracing::warn!(operation, error = %err, ?delay, "Upstream call failed, retrying once");
                    tokio::time::sleep(delay).await;
                    continue;
                }
            }

            tracing::warn!(operation, error = %err, "Upstream call failed");
            return Err(FacadeError::from_gateway(operation, self.session.state(), err));
        }
    }
}

fn parse_symbol(raw: &str) -> Result<Symbol, FacadeError> {
    Symbol::parse(raw).map_err(|e| FacadeError::validation("symbol", e.to_string()))
}
