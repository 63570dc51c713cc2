use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::models::Envelope;
use crate::sink::SinkError;

/// Application-wide error types with appropriate HTTP status codes.
///
/// Client errors carry a message that is safe to show to the caller.
/// Server errors are logged in full and answered with a generic message.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("History storage error: {0}")]
    Storage(#[from] SinkError),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl AppError {
    /// Status code and client-facing message for this error.
    pub fn status_and_message(&self) -> (StatusCode, &str) {
        match self {
            // Client errors - safe to show the message as it's user-facing
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.as_str()),

            // Internal errors - never expose internal details to clients
            AppError::Storage(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to fetch history",
            ),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error"),
            AppError::ConfigError(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Service configuration error",
            ),
        }
    }

    /// Attach the request's correlation ID so it appears in the response body.
    pub fn with_request_id(self, request_id: Option<&str>) -> ApiError {
        ApiError {
            error: self,
            request_id: request_id.map(str::to_string),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        self.with_request_id(None).into_response()
    }
}

/// An [`AppError`] bound to the request that produced it.
#[derive(Debug)]
pub struct ApiError {
    pub error: AppError,
    pub request_id: Option<String>,
}

impl From<AppError> for ApiError {
    fn from(error: AppError) -> Self {
        Self {
            error,
            request_id: None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = self.error.status_and_message();

        // Log the full error details server-side for debugging
        // but only expose sanitized messages to clients
        if status.is_server_error() {
            tracing::error!(error = %self.error, request_id = ?self.request_id, "Request failed");
        } else {
            tracing::debug!(error = %self.error, request_id = ?self.request_id, "Request rejected");
        }

        Envelope::error(status, message)
            .with_request_id(self.request_id.as_deref())
            .into_response()
    }
}

/// Convenience type alias for Results with AppError.
pub type AppResult<T> = Result<T, AppError>;
