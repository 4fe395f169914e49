//! Error types for object storage operations.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Storage API returned a non-success HTTP status.
    #[error("Storage error: {status} - {message}")]
    Storage { status: u16, message: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Object path is empty or escapes the bucket.
    #[error("Invalid object path: {0}")]
    InvalidPath(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<hogflix_config::CoreError> for MediaError {
    fn from(e: hogflix_config::CoreError) -> Self {
        MediaError::Config(e.to_string())
    }
}

pub type MediaResult<T> = Result<T, MediaError>;
