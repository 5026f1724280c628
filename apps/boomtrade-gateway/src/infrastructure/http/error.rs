//! HTTP error mapping for facade errors.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::{Value, json};

use crate::application::services::FacadeError;

/// JSON error body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Machine-readable code.
    pub error: &'static str,
    /// Human-readable message.
    pub message: String,
    /// Structured details.
    pub details: Value,
}

/// API error wrapping a facade error.
#[derive(Debug)]
pub struct ApiError(FacadeError);

impl ApiError {
    /// The wrapped facade error.
    #[must_use]
    pub const fn inner(&self) -> &FacadeError {
        &self.0
    }

    /// HTTP status for the wrapped error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match &self.0 {
            FacadeError::Validation { .. } => StatusCode::BAD_REQUEST,
            FacadeError::AuthenticationRequired { .. } => StatusCode::UNAUTHORIZED,
            FacadeError::NotFound { .. } => StatusCode::NOT_FOUND,
            FacadeError::GatewayUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            FacadeError::UpstreamTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            FacadeError::UpstreamError { .. } => StatusCode::BAD_GATEWAY,
            FacadeError::CredentialsMissing => StatusCode::PRECONDITION_FAILED,
        }
    }

    fn details(&self) -> Value {
        match &self.0 {
            FacadeError::Validation { field, .. } => json!({ "field": field }),
            FacadeError::AuthenticationRequired { state } => json!({ "state": state }),
            FacadeError::GatewayUnavailable {
                state,
                retry_after_secs,
            } => json!({ "state": state, "retry_after_secs": retry_after_secs }),
            FacadeError::UpstreamTimeout { operation } => json!({ "operation": operation }),
            FacadeError::UpstreamError { status, detail } => {
                json!({ "upstream_status": status, "detail": detail })
            }
            FacadeError::NotFound { resource } => json!({ "resource": resource }),
            FacadeError::CredentialsMissing => json!({}),
        }
    }
}

impl From<FacadeError> for ApiError {
    fn from(error: FacadeError) -> Self {
        Self(error)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(FacadeError::validation("body", rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorBody {
            error: self.0.code(),
            message: self.0.to_string(),
            details: self.details(),
        };

        let mut response = (status, Json(body)).into_response();
        if let FacadeError::GatewayUnavailable {
            retry_after_secs: Some(secs),
            ..
        } = self.0
        {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}
