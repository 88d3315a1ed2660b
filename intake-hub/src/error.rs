//! HTTP error mapping for the hub API

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use intake_common::Error;
use serde_json::json;
use thiserror::Error;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// No admin identity on a request that needs one (401)
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Malformed request outside the engine's taxonomy (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Engine error
    #[error(transparent)]
    Engine(#[from] Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Engine(err) => {
                let (status, code) = match &err {
                    Error::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
                    Error::InvalidTransition(_) => {
                        (StatusCode::BAD_REQUEST, "INVALID_TRANSITION")
                    }
                    Error::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
                    Error::Timeout(_) => (StatusCode::SERVICE_UNAVAILABLE, "TIMEOUT"),
                    Error::ConnectionLost(_) => {
                        (StatusCode::SERVICE_UNAVAILABLE, "CONNECTION_LOST")
                    }
                    Error::Database(_) | Error::Io(_) | Error::Config(_) | Error::Internal(_) => {
                        tracing::error!("Request failed: {}", err);
                        (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
                    }
                };
                (status, code, err.to_string())
            }
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        let cases = [
            (ApiError::from(Error::NotFound("x".into())), StatusCode::NOT_FOUND),
            (ApiError::from(Error::InvalidTransition("x".into())), StatusCode::BAD_REQUEST),
            (ApiError::from(Error::Validation("x".into())), StatusCode::BAD_REQUEST),
            (ApiError::from(Error::Timeout("x".into())), StatusCode::SERVICE_UNAVAILABLE),
            (ApiError::from(Error::Internal("x".into())), StatusCode::INTERNAL_SERVER_ERROR),
            (ApiError::Unauthorized("x".into()), StatusCode::UNAUTHORIZED),
        ];
        for (err, status) in cases {
            assert_eq!(err.into_response().status(), status);
        }
    }
}
