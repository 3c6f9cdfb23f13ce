/// Unified error types for the Atelier auth service
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for the auth service
#[derive(Error, Debug)]
pub enum AuthError {
    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// No pending request exists for the presented token
    #[error("No pending request exists for this token")]
    InvalidToken,

    /// The pending request's expiry has passed
    #[error("This token has expired")]
    TokenExpired,

    /// The token was already consumed by an earlier verification
    #[error("This token has already been used")]
    TokenAlreadyUsed,

    /// Registration attempted for an email that already has an account
    #[error("An account already exists for this email address")]
    UserExists,

    /// Sign-in attempted for an email with no account
    #[error("No account exists for this email address")]
    UserNotFound,

    /// Request input failed validation
    #[error("Validation error: {0}")]
    Validation(String),

    /// Rate limiting errors
    #[error("Rate limit exceeded")]
    RateLimitExceeded { retry_after: std::time::Duration },

    /// Client-side transport failures (never produced by the server)
    #[error("Network error: {0}")]
    Network(String),

    /// Internal server errors
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// JSON error response format
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl AuthError {
    /// Stable machine-readable code
    ///
    /// Token-lifecycle and precondition errors keep distinct codes so the
    /// client can map each to its own retry affordance.
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::InvalidToken => "INVALID_TOKEN",
            AuthError::TokenExpired => "TOKEN_EXPIRED",
            AuthError::TokenAlreadyUsed => "TOKEN_ALREADY_USED",
            AuthError::UserExists => "USER_EXISTS",
            AuthError::UserNotFound => "USER_NOT_FOUND",
            AuthError::Validation(_) => "INVALID_REQUEST",
            AuthError::RateLimitExceeded { .. } => "RATE_LIMIT_EXCEEDED",
            AuthError::Network(_) => "NETWORK_ERROR",
            AuthError::Database(_) | AuthError::Internal(_) | AuthError::Io(_) => {
                "INTERNAL_SERVER_ERROR"
            }
        }
    }
}

/// Convert AuthError to HTTP response
impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AuthError::InvalidToken | AuthError::UserNotFound => {
                (StatusCode::NOT_FOUND, self.to_string())
            }
            AuthError::TokenExpired => (StatusCode::GONE, self.to_string()),
            AuthError::TokenAlreadyUsed | AuthError::UserExists => {
                (StatusCode::CONFLICT, self.to_string())
            }
            AuthError::Validation(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            AuthError::RateLimitExceeded { .. } => (
                StatusCode::TOO_MANY_REQUESTS,
                "Rate limit exceeded".to_string(),
            ),
            AuthError::Database(_)
            | AuthError::Internal(_)
            | AuthError::Io(_)
            | AuthError::Network(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(), // Don't leak details
            ),
        };

        let body = Json(ErrorResponse {
            error: self.code().to_string(),
            message,
        });

        (status, body).into_response()
    }
}

/// Result type alias for auth operations
pub type AuthResult<T> = Result<T, AuthError>;
