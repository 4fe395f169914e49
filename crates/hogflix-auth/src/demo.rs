//! Demo sessions: a storage-backed stand-in for the remote auth service.
//!
//! The session lives as one JSON blob under `hogflix_demo_session` and the
//! mode flag under `hogflix_demo_mode`. While the flag is set the demo provider
//! is the only authoritative session source.

use crate::source::{publish, EventBus, SessionSource};
use crate::types::{AuthEvent, AuthEventKind, AuthSession, AuthUser, SessionOrigin};
use crate::validation::validate_email;
use crate::AuthResult;
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use hogflix_storage::{read_json, write_json, SharedStore, StorageKeys};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use url::Url;

const DEMO_SESSION_TTL_HOURS: i64 = 24;
const DEMO_MODE_ON: &str = "true";
const DEMO_QUERY_PARAM: &str = "demo";
const RELATIVE_URL_BASE: &str = "http://localhost/";

/// Persisted demo session blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DemoSession {
    pub user: AuthUser,
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
}

impl DemoSession {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn to_auth_session(&self) -> AuthSession {
        AuthSession {
            access_token: self.access_token.clone(),
            refresh_token: None,
            expires_at: self.expires_at,
            user: self.user.clone(),
            origin: SessionOrigin::Demo,
        }
    }
}

/// Stable synthetic user id for a demo email.
pub fn demo_user_id(email: &str) -> String {
    let normalized = email.trim().to_lowercase();
    format!("demo-{}", URL_SAFE_NO_PAD.encode(normalized.as_bytes()))
}

pub struct DemoSessionProvider {
    store: SharedStore,
    events: EventBus,
    ttl: Duration,
}

impl DemoSessionProvider {
    pub fn new(store: SharedStore, events: EventBus) -> Self {
        Self {
            store,
            events,
            ttl: Duration::hours(DEMO_SESSION_TTL_HOURS),
        }
    }

    /// True if `page_url` carries a `demo` query parameter (persisting the
    /// flag) or if the flag is already persisted.
    pub fn is_demo_mode(&self, page_url: Option<&str>) -> bool {
        if page_url.is_some_and(has_demo_param) {
            if let Err(e) = self.enable() {
                warn!(error = %e, "Failed to persist demo mode flag");
            }
            return true;
        }
        self.is_enabled()
    }

    pub fn enable(&self) -> AuthResult<()> {
        if !self.is_enabled() {
            info!("Demo mode enabled");
        }
        self.store.set(StorageKeys::DEMO_MODE, DEMO_MODE_ON)?;
        Ok(())
    }

    /// Whether the demo mode flag is persisted.
    pub fn is_enabled(&self) -> bool {
        match self.store.get(StorageKeys::DEMO_MODE) {
            Ok(flag) => flag.as_deref() == Some(DEMO_MODE_ON),
            Err(e) => {
                warn!(error = %e, "Failed to read demo mode flag");
                false
            }
        }
    }

    pub fn create_session(&self, email: &str, attrs: Map<String, Value>) -> AuthResult<AuthSession> {
        self.create_session_at(email, attrs, Utc::now())
    }

    /// Create (or reuse) the demo session for `email` and enable demo mode.
    ///
    /// An unexpired session for the same email is kept and `attrs` merged into
    /// its metadata; a session for any other email is replaced.
    pub fn create_session_at(
        &self,
        email: &str,
        attrs: Map<String, Value>,
        now: DateTime<Utc>,
    ) -> AuthResult<AuthSession> {
        validate_email(email)?;
        let email = email.trim().to_lowercase();
        let user_id = demo_user_id(&email);

        let reusable = self
            .load()?
            .filter(|existing| existing.user.id == user_id && !existing.is_expired_at(now));

        let session = match reusable {
            Some(mut existing) => {
                debug!(user_id = %user_id, "Reusing demo session");
                existing.user.user_metadata.extend(attrs);
                existing
            }
            None => {
                let mut metadata = attrs;
                metadata.insert("is_demo".to_string(), Value::Bool(true));
                DemoSession {
                    access_token: format!("demo.{}.{}", user_id, now.timestamp_millis()),
                    expires_at: now + self.ttl,
                    user: AuthUser {
                        id: user_id.clone(),
                        email: Some(email),
                        user_metadata: metadata,
                    },
                }
            }
        };

        write_json(self.store.as_ref(), StorageKeys::DEMO_SESSION, &session)?;
        self.enable()?;

        let auth_session = session.to_auth_session();
        info!(user_id = %user_id, expires_at = %session.expires_at, "Demo session created");
        publish(
            &self.events,
            AuthEvent::new(
                AuthEventKind::SignedIn,
                SessionOrigin::Demo,
                Some(auth_session.clone()),
            ),
        );
        Ok(auth_session)
    }

    pub fn get_session(&self) -> AuthResult<Option<AuthSession>> {
        self.get_session_at(Utc::now())
    }

    /// Persisted session unless expired; an expired session is deleted.
    pub fn get_session_at(&self, now: DateTime<Utc>) -> AuthResult<Option<AuthSession>> {
        let Some(session) = self.load()? else {
            return Ok(None);
        };

        if session.is_expired_at(now) {
            info!(user_id = %session.user.id, "Demo session expired, removing");
            self.store.delete(StorageKeys::DEMO_SESSION)?;
            return Ok(None);
        }

        Ok(Some(session.to_auth_session()))
    }

    /// Remove the session and the mode flag, returning control to the remote source.
    pub fn clear(&self) -> AuthResult<()> {
        let had_session = self.store.delete(StorageKeys::DEMO_SESSION)?;
        self.store.delete(StorageKeys::DEMO_MODE)?;
        info!(had_session, "Demo mode cleared");
        publish(
            &self.events,
            AuthEvent::new(AuthEventKind::SignedOut, SessionOrigin::Demo, None),
        );
        Ok(())
    }

    fn load(&self) -> AuthResult<Option<DemoSession>> {
        match read_json::<DemoSession>(self.store.as_ref(), StorageKeys::DEMO_SESSION) {
            Ok(session) => Ok(session),
            Err(hogflix_storage::StorageError::Encoding(reason)) => {
                warn!(reason = %reason, "Discarding unreadable demo session");
                self.store.delete(StorageKeys::DEMO_SESSION)?;
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl SessionSource for DemoSessionProvider {
    async fn get_session(&self) -> AuthResult<Option<AuthSession>> {
        DemoSessionProvider::get_session(self)
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    fn accepts(&self, event: &AuthEvent) -> bool {
        event.origin == SessionOrigin::Demo
    }
}

fn has_demo_param(page_url: &str) -> bool {
    let parsed = Url::parse(page_url)
        .or_else(|_| Url::parse(RELATIVE_URL_BASE).and_then(|base| base.join(page_url)));

    match parsed {
        Ok(url) => url
            .query_pairs()
            .any(|(key, value)| key == DEMO_QUERY_PARAM && !matches!(value.as_ref(), "false" | "0")),
        Err(_) => false,
    }
}
