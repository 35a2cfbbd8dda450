//! API error handling.
//!
//! Provides consistent error responses for the API.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::error::Error;

/// API result type alias.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// API error response body.
#[derive(Debug, Serialize)]
pub struct ApiErrorResponse {
    /// Error code for programmatic handling
    pub code: String,
    /// Human-readable error message
    pub message: String,
}

/// API error type that can be converted to HTTP responses.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
}

impl ApiError {
    /// Create a new API error.
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
        }
    }

    /// Create a 400 Bad Request error.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    /// Create a 404 Not Found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    /// Create a 409 Conflict error.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, "INVALID_STATE", message)
    }

    /// Create a 422 Unprocessable Entity error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR", message)
    }

    /// Create a 500 Internal Server Error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorResponse {
            code: self.code,
            message: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match &err {
            Error::NotFound { .. } => Self::not_found(err.to_string()),
            Error::InvalidState { .. } => Self::conflict(err.to_string()),
            Error::Validation(_) => Self::validation(err.to_string()),
            Error::Configuration(_) => Self::bad_request(err.to_string()),
            _ => {
                tracing::error!("Internal error in API handler: {}", err);
                Self::internal("internal server error")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_mapping() {
        let api: ApiError = Error::not_found("Stream", "s1").into();
        assert_eq!(api.status, StatusCode::NOT_FOUND);

        let api: ApiError = Error::invalid_state("start stream", "LIVE").into();
        assert_eq!(api.status, StatusCode::CONFLICT);

        let api: ApiError = Error::validation("bad url").into();
        assert_eq!(api.status, StatusCode::UNPROCESSABLE_ENTITY);

        let api: ApiError = Error::Other("boom".to_string()).into();
        assert_eq!(api.status, StatusCode::INTERNAL_SERVER_ERROR);
        // Internal details never leak to clients.
        assert!(!api.message.contains("boom"));
    }
}
