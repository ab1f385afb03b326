//! Error types for the HTTP API

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::services::TransferServiceError;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Nothing matched the selection (422)
    #[error("{0}")]
    NothingToTransfer(String),

    /// Conflict (409), e.g. job id in use or job already finished
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Service is shutting down (503)
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    /// portal-common error
    #[error("Common error: {0}")]
    Common(#[from] portal_common::Error),
}

impl ApiError {
    /// Whether this error points at the service rather than the request
    pub fn is_server_error(&self) -> bool {
        matches!(self, ApiError::Internal(_) | ApiError::Common(_))
    }
}

impl From<TransferServiceError> for ApiError {
    fn from(err: TransferServiceError) -> Self {
        match err {
            TransferServiceError::NothingToTransfer => ApiError::NothingToTransfer(err.to_string()),
            TransferServiceError::DuplicateJob(_) | TransferServiceError::AlreadyFinished { .. } => {
                ApiError::Conflict(err.to_string())
            }
            TransferServiceError::NotFound(_) => ApiError::NotFound(err.to_string()),
            TransferServiceError::ShuttingDown => ApiError::Unavailable(err.to_string()),
            TransferServiceError::Selection(_) => ApiError::Internal(err.to_string()),
            TransferServiceError::Storage(inner) => ApiError::Common(inner),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::NothingToTransfer(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "NOTHING_TO_TRANSFER",
                msg,
            ),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg),
            ApiError::Unavailable(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "SERVICE_UNAVAILABLE",
                msg,
            ),
            ApiError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                msg,
            ),
            ApiError::Common(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "COMMON_ERROR",
                err.to_string(),
            ),
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
