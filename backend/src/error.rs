//! Error types for the API gateway.

use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use pressurize_common::ErrorBody;

use crate::auth::AuthError;
use crate::config::ConfigError;
use crate::store::StoreError;

/// Errors that end an inbound call.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Unknown model or method.
    #[error("{0}")]
    Validation(String),

    /// Malformed call body.
    #[error("Failed to parse payload: {0}")]
    Parse(String),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Downstream(#[from] DownstreamError),
}

/// Failures talking to a model instance.
///
/// Cloneable so a single batch failure can be delivered to every waiter.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DownstreamError {
    #[error("Failed to reach model instance: {0}")]
    Unreachable(String),

    #[error("Model instance returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The instance answered with `{"error": ...}`.
    #[error("{0}")]
    Model(String),

    #[error("Invalid response from model instance: {0}")]
    InvalidResponse(String),

    #[error("Batch request failed: {0}")]
    BatchDispatch(String),

    #[error("Timed out after {0:?} waiting for model instance")]
    Timeout(Duration),
}

impl GatewayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::Validation(_) => StatusCode::NOT_FOUND,
            GatewayError::Parse(_) => StatusCode::BAD_REQUEST,
            GatewayError::Auth(e) if e.is_store_failure() => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::Auth(_) => StatusCode::FORBIDDEN,
            GatewayError::Downstream(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::warn!("Call failed with {}: {}", status.as_u16(), self);
        }
        (status, Json(ErrorBody::new(self.to_string()))).into_response()
    }
}

/// Failures building the gateway at startup. All are fatal.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Failed to open store: {0}")]
    Store(#[from] StoreError),
    #[error("Failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),
}
