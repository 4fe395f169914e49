//! Error types for profile operations.

use hogflix_auth::ValidationError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProfileError {
    /// Network or transport-level HTTP error from reqwest.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Supabase returned a non-success HTTP status.
    ///
    /// Common causes: expired token, RLS policy violation, schema mismatch.
    #[error("Supabase error: {status} - {message}")]
    Supabase { status: u16, message: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The row to update does not exist.
    #[error("Profile not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<hogflix_config::CoreError> for ProfileError {
    fn from(e: hogflix_config::CoreError) -> Self {
        ProfileError::Config(e.to_string())
    }
}

pub type ProfileResult<T> = Result<T, ProfileError>;
