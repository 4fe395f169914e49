//! Session, user and auth event types shared by every session source.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Tokens are treated as expired this long before their actual expiry.
const EXPIRY_MARGIN_SECS: i64 = 30;

/// Which source produced a session or event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionOrigin {
    Remote,
    Demo,
}

impl fmt::Display for SessionOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionOrigin::Remote => write!(f, "remote"),
            SessionOrigin::Demo => write!(f, "demo"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub user_metadata: Map<String, Value>,
}

impl AuthUser {
    pub fn new(id: impl Into<String>, email: Option<String>) -> Self {
        Self {
            id: id.into(),
            email,
            user_metadata: Map::new(),
        }
    }

    /// A non-empty string entry of `user_metadata`.
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.user_metadata
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    pub fn email_local_part(&self) -> Option<&str> {
        self.email
            .as_deref()
            .and_then(|email| email.split('@').next())
            .filter(|local| !local.is_empty())
    }

    /// Name to show when no profile row exists: metadata name, then the local
    /// part of the email, then "User".
    pub fn fallback_display_name(&self) -> String {
        ["display_name", "name", "full_name"]
            .iter()
            .find_map(|key| self.metadata_str(key))
            .or_else(|| self.email_local_part())
            .unwrap_or("User")
            .to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthSession {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub user: AuthUser,
    pub origin: SessionOrigin,
}

impl AuthSession {
    pub fn user_id(&self) -> &str {
        &self.user.id
    }

    pub fn is_demo(&self) -> bool {
        self.origin == SessionOrigin::Demo
    }

    /// Expired at `now`, with no margin.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Expired, or close enough to expiry that it should be refreshed.
    pub fn needs_refresh_at(&self, now: DateTime<Utc>) -> bool {
        self.is_expired_at(now + Duration::seconds(EXPIRY_MARGIN_SECS))
    }
}

/// Kind of push notification from a session source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthEventKind {
    SignedIn,
    SignedOut,
    UserUpdated,
    TokenRefreshed,
}

impl AuthEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthEventKind::SignedIn => "SIGNED_IN",
            AuthEventKind::SignedOut => "SIGNED_OUT",
            AuthEventKind::UserUpdated => "USER_UPDATED",
            AuthEventKind::TokenRefreshed => "TOKEN_REFRESHED",
        }
    }
}

impl fmt::Display for AuthEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthEvent {
    pub kind: AuthEventKind,
    #[serde(default)]
    pub session: Option<AuthSession>,
    pub origin: SessionOrigin,
    pub occurred_at: DateTime<Utc>,
}

impl AuthEvent {
    pub fn new(kind: AuthEventKind, origin: SessionOrigin, session: Option<AuthSession>) -> Self {
        Self {
            kind,
            session,
            origin,
            occurred_at: Utc::now(),
        }
    }

    pub fn user_id(&self) -> Option<&str> {
        self.session.as_ref().map(AuthSession::user_id)
    }
}
