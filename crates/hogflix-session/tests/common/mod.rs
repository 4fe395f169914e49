//! In-memory stand-ins for the hosted services.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration, Utc};
use hogflix_analytics::RecordingAnalytics;
use hogflix_auth::{
    event_bus, AccountService, AuthError, AuthEvent, AuthEventKind, AuthResult, AuthSession,
    AuthUser, EventBus, SessionOrigin, SessionSource, SignUpOutcome,
};
use hogflix_config::{Config, PollingConfig};
use hogflix_media::{MediaResult, MediaStore};
use hogflix_profiles::{ProfileError, ProfileResult, ProfileRow, ProfileStore};
use hogflix_session::{AppRuntime, Services};
use hogflix_storage::{memory_store, SharedStore};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

pub const PASSWORD: &str = "secret1";

pub struct FakeAccounts {
    events: EventBus,
    session: Mutex<Option<AuthSession>>,
    pub sign_up_calls: AtomicUsize,
    pub unreachable: AtomicBool,
}

impl FakeAccounts {
    pub fn new(events: EventBus) -> Self {
        Self {
            events,
            session: Mutex::new(None),
            sign_up_calls: AtomicUsize::new(0),
            unreachable: AtomicBool::new(false),
        }
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub fn stored(&self) -> Option<AuthSession> {
        self.session.lock().clone()
    }

    fn start_session(&self, email: &str, metadata: Map<String, Value>) -> AuthSession {
        let session = AuthSession {
            access_token: format!("token-{email}"),
            refresh_token: Some("refresh".to_string()),
            expires_at: Utc::now() + Duration::hours(1),
            user: AuthUser {
                id: format!("user-{email}"),
                email: Some(email.to_string()),
                user_metadata: metadata,
            },
            origin: SessionOrigin::Remote,
        };
        *self.session.lock() = Some(session.clone());
        self.publish(AuthEventKind::SignedIn, Some(session.clone()));
        session
    }

    fn publish(&self, kind: AuthEventKind, session: Option<AuthSession>) {
        let _ = self
            .events
            .send(AuthEvent::new(kind, SessionOrigin::Remote, session));
    }
}

#[async_trait]
impl SessionSource for FakeAccounts {
    async fn get_session(&self) -> AuthResult<Option<AuthSession>> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(AuthError::Service {
                status: 503,
                message: "unavailable".to_string(),
            });
        }
        Ok(self.session.lock().clone())
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    fn accepts(&self, event: &AuthEvent) -> bool {
        event.origin == SessionOrigin::Remote
    }
}

#[async_trait]
impl AccountService for FakeAccounts {
    async fn sign_up(
        &self,
        email: &str,
        _password: &str,
        metadata: Map<String, Value>,
    ) -> AuthResult<SignUpOutcome> {
        self.sign_up_calls.fetch_add(1, Ordering::SeqCst);
        Ok(SignUpOutcome::SignedIn(self.start_session(email, metadata)))
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> AuthResult<AuthSession> {
        if password != PASSWORD {
            return Err(AuthError::InvalidCredentials("Invalid login credentials".to_string()));
        }
        Ok(self.start_session(email, Map::new()))
    }

    async fn sign_out(&self) -> AuthResult<()> {
        *self.session.lock() = None;
        self.publish(AuthEventKind::SignedOut, None);
        Ok(())
    }

    async fn update_user(&self, metadata: Map<String, Value>) -> AuthResult<AuthUser> {
        let mut guard = self.session.lock();
        let session = guard.as_mut().ok_or(AuthError::NotLoggedIn)?;
        session.user.user_metadata = metadata;
        Ok(session.user.clone())
    }
}

#[derive(Default)]
pub struct FakeProfiles {
    pub rows: Mutex<HashMap<String, ProfileRow>>,
    pub fetches: AtomicUsize,
}

#[async_trait]
impl ProfileStore for FakeProfiles {
    async fn fetch(&self, user_id: &str, _token: &str) -> ProfileResult<Option<ProfileRow>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.rows.lock().get(user_id).cloned())
    }

    async fn upsert(&self, row: &ProfileRow, _token: &str) -> ProfileResult<()> {
        self.rows.lock().insert(row.id.clone(), row.clone());
        Ok(())
    }

    async fn update(
        &self,
        user_id: &str,
        patch: &Map<String, Value>,
        _token: &str,
    ) -> ProfileResult<ProfileRow> {
        let mut rows = self.rows.lock();
        let row = rows
            .get_mut(user_id)
            .ok_or_else(|| ProfileError::NotFound(user_id.to_string()))?;
        if let Some(name) = patch.get("name").and_then(Value::as_str) {
            row.name = Some(name.to_string());
        }
        if let Some(url) = patch.get("avatar_url").and_then(Value::as_str) {
            row.avatar_url = Some(url.to_string());
        }
        if let Some(language) = patch.get("language").and_then(Value::as_str) {
            row.language = Some(language.to_string());
        }
        if let Some(is_kids) = patch.get("is_kids").and_then(Value::as_bool) {
            row.is_kids = Some(is_kids);
        }
        Ok(row.clone())
    }
}

pub const MEDIA_BASE: &str = "https://x.supabase.co/storage/v1/object/public/media";

#[derive(Default)]
pub struct FakeMedia {
    pub uploads: Mutex<Vec<(String, usize, String, String)>>,
}

#[async_trait]
impl MediaStore for FakeMedia {
    async fn upload(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
        access_token: &str,
    ) -> MediaResult<String> {
        self.uploads.lock().push((
            path.to_string(),
            bytes.len(),
            content_type.to_string(),
            access_token.to_string(),
        ));
        Ok(format!("{MEDIA_BASE}/{path}"))
    }

    async fn list(&self, prefix: &str, _token: &str) -> MediaResult<Vec<String>> {
        let mut urls: Vec<String> = self
            .uploads
            .lock()
            .iter()
            .filter(|(path, ..)| path.starts_with(prefix))
            .map(|(path, ..)| format!("{MEDIA_BASE}/{path}"))
            .collect();
        urls.extend(urls.clone());
        urls.push("https://evil.com/a.jpg".to_string());
        Ok(urls)
    }
}

pub struct Harness {
    pub runtime: AppRuntime,
    pub accounts: Arc<FakeAccounts>,
    pub profiles: Arc<FakeProfiles>,
    pub media: Arc<FakeMedia>,
    pub analytics: Arc<RecordingAnalytics>,
    pub kv: SharedStore,
    pub events: EventBus,
}

pub fn test_config() -> Config {
    Config {
        posthog_api_key: None,
        polling: PollingConfig {
            unstable_interval_ms: 1_000,
            stable_interval_ms: 15_000,
            profile_fetch_delay_ms: 10,
        },
        ..Config::default()
    }
}

pub fn harness(config: Config) -> Harness {
    let events = event_bus();
    let kv = memory_store();
    let accounts = Arc::new(FakeAccounts::new(events.clone()));
    let profiles = Arc::new(FakeProfiles::default());
    let media = Arc::new(FakeMedia::default());
    let analytics = Arc::new(RecordingAnalytics::new());

    let runtime = AppRuntime::new(
        config,
        kv.clone(),
        Services {
            events: events.clone(),
            accounts: accounts.clone(),
            remote: accounts.clone(),
            profiles: profiles.clone(),
            media: media.clone(),
            analytics: analytics.clone(),
        },
    );

    Harness {
        runtime,
        accounts,
        profiles,
        media,
        analytics,
        kv,
        events,
    }
}
