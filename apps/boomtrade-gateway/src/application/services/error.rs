//! Facade error taxonomy.

use crate::application::ports::{GatewayError, SupervisorError};
use crate::domain::order::OrderValidationError;
use crate::domain::session::SessionState;

/// Errors surfaced by the REST facade.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FacadeError {
    /// Client input failed validation. Never reaches upstream.
    #[error("invalid {field}: {message}")]
    Validation {
        /// Offending field.
        field: String,
        /// Reason.
        message: String,
    },

    /// Gateway is up but the session is not authenticated.
    #[error("gateway session requires authentication (state: {state})")]
    AuthenticationRequired {
        /// Current session state.
        state: SessionState,
    },

    /// Gateway process is down, restarting or fatally stopped.
    #[error("gateway unavailable (state: {state})")]
    GatewayUnavailable {
        /// Current session state.
        state: SessionState,
        /// Seconds until a retry is likely to succeed.
        retry_after_secs: Option<u64>,
    },

    /// Upstream call exceeded its deadline.
    #[error("upstream {operation} timed out")]
    UpstreamTimeout {
        /// Operation that timed out.
        operation: &'static str,
    },

    /// Upstream was reachable but returned a failure.
    #[error("upstream error: {detail}")]
    UpstreamError {
        /// Upstream HTTP status, when there was one.
        status: Option<u16>,
        /// Upstream detail.
        detail: String,
    },

    /// Upstream does not know the requested resource.
    #[error("{resource} not found")]
    NotFound {
        /// Resource description.
        resource: String,
    },

    /// No credentials were supplied and none are stored.
    #[error("gateway credentials are missing")]
    CredentialsMissing,
}

impl FacadeError {
    /// Validation failure on a named field.
    #[must_use]
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Stable machine-readable code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::AuthenticationRequired { .. } => "AUTHENTICATION_REQUIRED",
            Self::GatewayUnavailable { .. } => "GATEWAY_UNAVAILABLE",
            Self::UpstreamTimeout { .. } => "UPSTREAM_TIMEOUT",
            Self::UpstreamError { .. } => "UPSTREAM_ERROR",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::CredentialsMissing => "CREDENTIALS_MISSING",
        }
    }

    /// Map an upstream failure for `operation`, given the session state.
    #[must_use]
    pub fn from_gateway(operation: &'static str, state: SessionState, err: GatewayError) -> Self {
        match err {
            GatewayError::Timeout => Self::UpstreamTimeout { operation },
            GatewayError::Network(detail) | GatewayError::Decode(detail) => Self::UpstreamError {
                status: None,
                detail,
            },
            GatewayError::Status { status, body } => Self::UpstreamError {
                status: Some(status),
                detail: body,
            },
            GatewayError::Unauthorized => Self::AuthenticationRequired { state },
            GatewayError::NotFound(resource) => Self::NotFound { resource },
        }
    }
}

impl From<OrderValidationError> for FacadeError {
    fn from(err: OrderValidationError) -> Self {
        Self::Validation {
            field: err.field.to_string(),
            message: err.message,
        }
    }
}

impl From<SupervisorError> for FacadeError {
    fn from(err: SupervisorError) -> Self {
        match err {
            SupervisorError::CredentialsMissing => Self::CredentialsMissing,
            SupervisorError::Spawn(_) | SupervisorError::Stopped => Self::GatewayUnavailable {
                state: SessionState::Down,
                retry_after_secs: None,
            },
        }
    }
}
