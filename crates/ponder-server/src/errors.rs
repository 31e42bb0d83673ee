//! API error type and its HTTP mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use ponder_runtime::ServiceError;
use serde_json::json;
use tracing::warn;

use crate::metrics::API_ERRORS_TOTAL;

/// Errors returned by HTTP handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Session service rejected the request.
    #[error(transparent)]
    Service(#[from] ServiceError),

    /// Event-stream attach did not complete in time.
    #[error("subscribe did not complete within {timeout_ms}ms")]
    AttachTimeout {
        /// Configured limit.
        timeout_ms: u64,
    },

    /// Malformed query parameter or header.
    #[error("bad request: {0}")]
    BadRequest(String),
}

impl ApiError {
    /// Stable error code for response bodies and metrics.
    pub fn code(&self) -> &str {
        match self {
            Self::Service(err) => err.category(),
            Self::AttachTimeout { .. } => "attach_timeout",
            Self::BadRequest(_) => "bad_request",
        }
    }

    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Service(err) => match err {
                ServiceError::InvalidRequest(_) | ServiceError::UnsupportedModel(_) => {
                    StatusCode::BAD_REQUEST
                }
                ServiceError::SessionNotFound(_) => StatusCode::NOT_FOUND,
                ServiceError::NotRunning(_) => StatusCode::CONFLICT,
                ServiceError::Capacity { .. } => StatusCode::SERVICE_UNAVAILABLE,
                ServiceError::Model(_) => StatusCode::BAD_GATEWAY,
                ServiceError::History(_) | ServiceError::Internal(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            Self::AttachTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code().to_owned();
        if status.is_server_error() {
            warn!(code = %code, error = %self, "request failed");
        }
        metrics::counter!(API_ERRORS_TOTAL, "code" => code.clone()).increment(1);
        let body = json!({
            "error": {
                "code": code,
                "message": self.to_string(),
            }
        });
        (status, Json(body)).into_response()
    }
}
