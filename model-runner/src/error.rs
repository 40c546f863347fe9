//! Error types for the model runner.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use pressurize_common::ErrorBody;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Model does not exist")]
    ModelNotFound(String),

    #[error("Model does not have method {0}")]
    MethodNotFound(String),

    #[error("Data not provided")]
    MissingData,

    #[error("Failed to parse payload: {0}")]
    InvalidRequest(String),

    /// An operation rejected its input.
    #[error("Exception: {0}")]
    OperationFailed(String),
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::ModelNotFound(_) | Error::MethodNotFound(_) => StatusCode::NOT_FOUND,
            Error::MissingData | Error::InvalidRequest(_) | Error::OperationFailed(_) => {
                StatusCode::BAD_REQUEST
            }
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        tracing::debug!("Responding {} to call: {}", status.as_u16(), self);
        (status, Json(ErrorBody::new(self.to_string()))).into_response()
    }
}

pub type Result<T> = std::result::Result<T, Error>;
