/// Unified error types for PayFlow
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for the service
#[derive(Error, Debug)]
pub enum PayflowError {
    /// Configuration errors (fatal at startup)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Token encryption/decryption errors
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// Transport-level HTTP errors (could not reach the provider)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Provider rejected the request with a non-429 error status
    #[error("Provider returned HTTP {status}")]
    Provider { status: u16 },

    /// Provider throttled us (HTTP 429)
    #[error("Provider rate limit exceeded")]
    RateLimited,

    /// OAuth flow errors
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// SSRF validation rejected an attachment URL
    #[error("Unsafe attachment URL: {0}")]
    Ssrf(String),

    /// Downloaded content failed receipt validation
    #[error("Invalid receipt: {0}")]
    InvalidReceipt(String),

    /// Not found errors
    #[error("Not found: {0}")]
    NotFound(String),

    /// Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// JSON error response body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl IntoResponse for PayflowError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match &self {
            PayflowError::Auth(_) => (
                StatusCode::BAD_GATEWAY,
                "AuthenticationFailed",
                self.to_string(),
            ),
            PayflowError::NotFound(_) => (StatusCode::NOT_FOUND, "NotFound", self.to_string()),
            PayflowError::Config(_) | PayflowError::Ssrf(_) | PayflowError::InvalidReceipt(_) => {
                (StatusCode::BAD_REQUEST, "InvalidRequest", self.to_string())
            }
            PayflowError::RateLimited => (
                StatusCode::TOO_MANY_REQUESTS,
                "RateLimitExceeded",
                self.to_string(),
            ),
            PayflowError::Provider { .. } | PayflowError::Http(_) => {
                (StatusCode::BAD_GATEWAY, "UpstreamError", self.to_string())
            }
            PayflowError::Database(_) | PayflowError::Crypto(_) | PayflowError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "InternalServerError",
                // Don't leak details
                "Internal server error".to_string(),
            ),
        };

        let body = Json(ErrorResponse {
            error: error_code.to_string(),
            message,
        });

        (status, body).into_response()
    }
}

/// Result type alias for PayFlow operations
pub type PayflowResult<T> = Result<T, PayflowError>;
