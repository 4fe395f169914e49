//! Authentication error types.

use crate::validation::ValidationError;
use thiserror::Error;

/// Authentication error type.
#[derive(Error, Debug)]
pub enum AuthError {
    /// Invalid email or password
    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    /// Signup rejected by the auth service
    #[error("Signup failed: {0}")]
    SignUp(String),

    /// Token refresh error
    #[error("Token refresh failed: {0}")]
    TokenRefresh(String),

    /// Refresh retries exhausted
    #[error("Token refresh failed after {0} attempts")]
    RefreshExhausted(u32),

    /// Session not found
    #[error("Not logged in")]
    NotLoggedIn,

    /// Session was invalidated server-side (revoked, logged out elsewhere, etc.)
    #[error("Session invalid: {0}")]
    SessionInvalid(String),

    /// Invalid state transition in the credential FSM
    #[error("Invalid auth state transition: {0}")]
    InvalidStateTransition(String),

    /// Input rejected before any network call
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Too many attempts for this key in the current window
    #[error("Too many attempts, try again later")]
    RateLimited,

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[from] hogflix_storage::StorageError),

    /// HTTP request error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success response that is not a credential problem
    #[error("Auth service error (HTTP {status}): {message}")]
    Service { status: u16, message: String },

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// URL parse error
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl AuthError {
    /// Returns true if this error is transient and the operation can be retried.
    ///
    /// Transient errors are connection failures, timeouts and 5xx responses.
    pub fn is_transient(&self) -> bool {
        match self {
            AuthError::Http(e) => {
                if e.is_connect() || e.is_timeout() {
                    return true;
                }
                if let Some(status) = e.status() {
                    return status.is_server_error();
                }
                false
            }
            AuthError::Service { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl From<hogflix_config::CoreError> for AuthError {
    fn from(e: hogflix_config::CoreError) -> Self {
        AuthError::Config(e.to_string())
    }
}

/// Result type alias using AuthError.
pub type AuthResult<T> = Result<T, AuthError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_transient_server_error() {
        let err = AuthError::Service {
            status: 503,
            message: "unavailable".to_string(),
        };
        assert!(err.is_transient());
    }

    #[test]
    fn test_is_not_transient_client_error() {
        let err = AuthError::Service {
            status: 422,
            message: "bad request".to_string(),
        };
        assert!(!err.is_transient());
    }

    #[test]
    fn test_is_not_transient_invalid_credentials() {
        assert!(!AuthError::InvalidCredentials("bad password".to_string()).is_transient());
    }

    #[test]
    fn test_is_not_transient_refresh_exhausted() {
        assert!(!AuthError::RefreshExhausted(3).is_transient());
    }

    #[test]
    fn test_is_not_transient_session_invalid() {
        assert!(!AuthError::SessionInvalid("revoked".to_string()).is_transient());
    }

    #[test]
    fn test_validation_error_is_transparent() {
        let err = AuthError::from(ValidationError::PasswordMismatch);
        assert_eq!(err.to_string(), ValidationError::PasswordMismatch.to_string());
    }
}
