//! Errors surfaced to the UI by [`crate::AppRuntime`].

use hogflix_auth::{AuthError, ValidationError};
use hogflix_config::CoreError;
use hogflix_media::MediaError;
use hogflix_profiles::ProfileError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    /// Bad form input; nothing was sent.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Too many attempts, please try again later")]
    RateLimited,

    #[error("Not logged in")]
    NotLoggedIn,

    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Profile error: {0}")]
    Profile(#[from] ProfileError),

    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    #[error("Configuration error: {0}")]
    Config(#[from] CoreError),
}

impl AppError {
    /// Whether the message is meant for an inline form notification.
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            AppError::Validation(_)
                | AppError::RateLimited
                | AppError::NotLoggedIn
                | AppError::Auth(AuthError::InvalidCredentials(_))
                | AppError::Auth(AuthError::Validation(_))
        )
    }
}

pub type AppResult<T> = Result<T, AppError>;
