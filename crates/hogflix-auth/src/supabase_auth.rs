//! Supabase GoTrue client with FSM-tracked credential lifecycle.
//!
//! Tokens are persisted as one JSON blob (`hogflix_auth_session`) in the
//! injected key-value store. The credential machine tracks in-flight work;
//! operations are serialized so the machine only ever sees one flow at a time.

use crate::credential_fsm::{CredentialInput, CredentialMachine, CredentialState, RefreshConfig};
use crate::source::{publish, AccountService, EventBus, SessionSource};
use crate::types::{AuthEvent, AuthEventKind, AuthSession, AuthUser, SessionOrigin};
use crate::{AuthError, AuthResult};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use hogflix_config::Config;
use hogflix_storage::{read_json, write_json, SharedStore, StorageKeys};
use parking_lot::Mutex;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

const REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

/// Used when the token response carries neither `expires_at` nor `expires_in`.
const DEFAULT_TOKEN_TTL_SECS: i64 = 3_600;

/// GoTrue token grant response.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    user: AuthUser,
}

impl TokenResponse {
    fn into_session(self, now: DateTime<Utc>) -> AuthSession {
        let expires_at = self
            .expires_at
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .or_else(|| self.expires_in.map(|secs| now + Duration::seconds(secs)))
            .unwrap_or_else(|| now + Duration::seconds(DEFAULT_TOKEN_TTL_SECS));

        AuthSession {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at,
            user: self.user,
            origin: SessionOrigin::Remote,
        }
    }
}

/// Signup returns a session when autoconfirm is on, otherwise the bare user.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SignUpResponse {
    Session(TokenResponse),
    User(AuthUser),
}

/// Result of a successful signup call.
#[derive(Debug, Clone, PartialEq)]
pub enum SignUpOutcome {
    SignedIn(AuthSession),
    /// Account created; the user must confirm their email before signing in.
    ConfirmationRequired(AuthUser),
}

impl SignUpOutcome {
    pub fn user(&self) -> &AuthUser {
        match self {
            SignUpOutcome::SignedIn(session) => &session.user,
            SignUpOutcome::ConfirmationRequired(user) => user,
        }
    }
}

pub struct SupabaseAuth {
    supabase_url: String,
    anon_key: String,
    http_client: Client,
    store: SharedStore,
    events: EventBus,
    fsm: Mutex<CredentialMachine>,
    refresh_config: RefreshConfig,
    op_lock: tokio::sync::Mutex<()>,
}

impl SupabaseAuth {
    pub fn new(supabase_url: &str, anon_key: &str, store: SharedStore, events: EventBus) -> Self {
        let http_client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Falling back to default HTTP client");
                Client::new()
            });

        Self {
            supabase_url: supabase_url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
            http_client,
            store,
            events,
            fsm: Mutex::new(CredentialMachine::new()),
            refresh_config: RefreshConfig::default(),
            op_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn from_config(config: &Config, store: SharedStore, events: EventBus) -> AuthResult<Self> {
        let url = config.supabase_url()?;
        Ok(Self::new(url.as_str(), &config.supabase_anon_key, store, events))
    }

    pub fn with_refresh_config(mut self, refresh_config: RefreshConfig) -> Self {
        self.refresh_config = refresh_config;
        self
    }

    pub fn credential_state(&self) -> CredentialState {
        CredentialState::from(self.fsm.lock().state())
    }

    fn transition(&self, input: &CredentialInput) -> AuthResult<CredentialState> {
        let mut fsm = self.fsm.lock();
        let old_state = CredentialState::from(fsm.state());

        fsm.consume(input).map_err(|_| {
            AuthError::InvalidStateTransition(format!(
                "Cannot apply {:?} in state {:?}",
                input,
                fsm.state()
            ))
        })?;

        let new_state = CredentialState::from(fsm.state());
        if old_state != new_state {
            debug!(old_state = ?old_state, new_state = ?new_state, "Credential state transition");
        }
        Ok(new_state)
    }

    /// A transient state at the start of an operation means the previous one
    /// was abandoned mid-flight (error or dropped future).
    fn recover_if_stuck(&self) {
        let mut fsm = self.fsm.lock();
        let state = CredentialState::from(fsm.state());
        if state.is_transient() {
            warn!(state = ?state, "Resetting abandoned credential flow");
            *fsm = CredentialMachine::new();
        }
    }

    fn reset_machine(&self) {
        *self.fsm.lock() = CredentialMachine::new();
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.supabase_url, path)
    }

    // =========================================================================
    // Public operations
    // =========================================================================

    /// Create an account. `metadata` becomes the user's `user_metadata`.
    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: Map<String, Value>,
    ) -> AuthResult<SignUpOutcome> {
        let _op = self.op_lock.lock().await;
        self.recover_if_stuck();
        self.transition(&CredentialInput::SignUpAttempt)?;

        debug!(email = %email, "Signing up");
        let body = json!({ "email": email, "password": password, "data": metadata });
        let result = async {
            let response = self
                .http_client
                .post(self.endpoint("signup"))
                .header("apikey", &self.anon_key)
                .json(&body)
                .send()
                .await?;
            let response = check_response(response, AuthError::SignUp).await?;
            Ok::<_, AuthError>(response.json::<SignUpResponse>().await?)
        }
        .await;

        match result {
            Ok(SignUpResponse::Session(tokens)) => {
                let session = tokens.into_session(Utc::now());
                if let Err(e) = self.save_session(&session) {
                    self.transition(&CredentialInput::SignUpFailed)?;
                    return Err(e);
                }
                self.transition(&CredentialInput::SignUpSuccess)?;
                info!(user_id = %session.user.id, "Signed up and signed in");
                self.emit(AuthEventKind::SignedIn, Some(session.clone()));
                Ok(SignUpOutcome::SignedIn(session))
            }
            Ok(SignUpResponse::User(user)) => {
                self.transition(&CredentialInput::SignUpPending)?;
                info!(user_id = %user.id, "Signed up, email confirmation pending");
                Ok(SignUpOutcome::ConfirmationRequired(user))
            }
            Err(e) => {
                warn!(error = %e, "Signup failed");
                self.transition(&CredentialInput::SignUpFailed)?;
                Err(e)
            }
        }
    }

    pub async fn sign_in_with_password(&self, email: &str, password: &str) -> AuthResult<AuthSession> {
        let _op = self.op_lock.lock().await;
        self.recover_if_stuck();
        self.transition(&CredentialInput::LoginAttempt)?;

        debug!(email = %email, "Attempting email/password login");
        let result = async {
            let response = self
                .http_client
                .post(self.endpoint("token?grant_type=password"))
                .header("apikey", &self.anon_key)
                .json(&json!({ "email": email, "password": password }))
                .send()
                .await?;
            let response = check_response(response, AuthError::InvalidCredentials).await?;
            let tokens: TokenResponse = response.json().await?;
            let session = tokens.into_session(Utc::now());
            self.save_session(&session)?;
            Ok::<_, AuthError>(session)
        }
        .await;

        match result {
            Ok(session) => {
                self.transition(&CredentialInput::LoginSuccess)?;
                info!(user_id = %session.user.id, "Login successful");
                self.emit(AuthEventKind::SignedIn, Some(session.clone()));
                Ok(session)
            }
            Err(e) => {
                warn!(error = %e, "Login failed");
                self.transition(&CredentialInput::LoginFailed)?;
                Err(e)
            }
        }
    }

    /// Revoke the session server-side (best effort) and clear local tokens.
    pub async fn sign_out(&self) -> AuthResult<()> {
        let _op = self.op_lock.lock().await;
        self.recover_if_stuck();

        let stored = self.load_stored()?;
        let _ = self.transition(&CredentialInput::LogoutRequested);

        if let Some(session) = &stored {
            if let Err(e) = self.revoke(&session.access_token).await {
                warn!(error = %e, "Server-side logout failed, clearing local session anyway");
            }
        }

        self.clear_stored()?;
        if self.transition(&CredentialInput::LogoutComplete).is_err() {
            self.reset_machine();
        }

        info!("Logged out");
        self.emit(AuthEventKind::SignedOut, None);
        Ok(())
    }

    /// Current usable session, refreshing or verifying as needed.
    ///
    /// Returns `Ok(None)` when there is no session or the server rejected it,
    /// and `Err` when the answer is unknown (network trouble).
    pub async fn get_session(&self) -> AuthResult<Option<AuthSession>> {
        let _op = self.op_lock.lock().await;
        self.recover_if_stuck();

        let Some(stored) = self.load_stored()? else {
            if self.credential_state().is_authenticated() {
                warn!("Stored session disappeared, resetting credential state");
                self.reset_machine();
            }
            return Ok(None);
        };

        if self.credential_state().is_authenticated() {
            if !stored.needs_refresh_at(Utc::now()) {
                return Ok(Some(stored));
            }
            info!(user_id = %stored.user.id, "Access token expired, refreshing");
            self.transition(&CredentialInput::TokenExpired)?;
            return self.refresh_with_backoff(&stored).await;
        }

        self.validate_stored(stored).await
    }

    /// Stored session without any network call or validation.
    pub fn current_session(&self) -> AuthResult<Option<AuthSession>> {
        self.load_stored()
    }

    /// Replace the user's metadata. Emits `USER_UPDATED`.
    pub async fn update_user(&self, metadata: Map<String, Value>) -> AuthResult<AuthUser> {
        let _op = self.op_lock.lock().await;
        let mut session = self.load_stored()?.ok_or(AuthError::NotLoggedIn)?;

        let response = self
            .http_client
            .put(self.endpoint("user"))
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {}", session.access_token))
            .json(&json!({ "data": metadata }))
            .send()
            .await?;
        let response = check_response(response, AuthError::SessionInvalid).await?;
        let user: AuthUser = response.json().await?;

        session.user = user.clone();
        self.save_session(&session)?;
        info!(user_id = %user.id, "User metadata updated");
        self.emit(AuthEventKind::UserUpdated, Some(session));
        Ok(user)
    }

    // =========================================================================
    // Validation and refresh
    // =========================================================================

    async fn validate_stored(&self, stored: AuthSession) -> AuthResult<Option<AuthSession>> {
        self.transition(&CredentialInput::ValidateSession)?;

        if stored.needs_refresh_at(Utc::now()) {
            info!(user_id = %stored.user.id, "Stored session expired, attempting refresh");
            self.transition(&CredentialInput::SessionExpired)?;
            return self.refresh_with_backoff(&stored).await;
        }

        debug!(user_id = %stored.user.id, "Token not expired, verifying session with server");
        self.transition(&CredentialInput::TokenNotExpired)?;

        match self.verify_with_server(&stored.access_token).await {
            Ok(user) => {
                let session = AuthSession { user, ..stored };
                if let Err(e) = self.save_session(&session) {
                    self.transition(&CredentialInput::ServerUnreachable)?;
                    return Err(e);
                }
                self.transition(&CredentialInput::ServerVerified)?;
                info!(user_id = %session.user.id, "Session verified with server");
                Ok(Some(session))
            }
            Err(e) if e.is_transient() => {
                warn!(error = %e, "Could not verify session, keeping tokens");
                self.transition(&CredentialInput::ServerUnreachable)?;
                Err(e)
            }
            Err(e) => {
                warn!(user_id = %stored.user.id, error = %e, "Session rejected, clearing");
                self.end_session(&CredentialInput::ServerRejected)?;
                Ok(None)
            }
        }
    }

    async fn verify_with_server(&self, access_token: &str) -> AuthResult<AuthUser> {
        let response = self
            .http_client
            .get(self.endpoint("user"))
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {}", access_token))
            .send()
            .await?;
        let response = check_response(response, AuthError::SessionInvalid).await?;
        Ok(response.json().await?)
    }

    /// Refresh with exponential backoff.
    ///
    /// `Ok(None)` means the refresh token was rejected and the session cleared.
    /// Exhausting retries on transient errors keeps the tokens.
    async fn refresh_with_backoff(&self, stored: &AuthSession) -> AuthResult<Option<AuthSession>> {
        let Some(refresh_token) = stored.refresh_token.as_deref() else {
            warn!("Session expired but no refresh token found, clearing session");
            self.end_session(&CredentialInput::RefreshFailed)?;
            return Ok(None);
        };

        let max_retries = self.refresh_config.max_retries;
        for attempt in 0..max_retries {
            match self.try_refresh(refresh_token).await {
                Ok(session) => {
                    self.transition(&CredentialInput::RefreshSuccess)?;
                    info!(user_id = %session.user.id, "Token refreshed successfully");
                    self.emit(AuthEventKind::TokenRefreshed, Some(session.clone()));
                    return Ok(Some(session));
                }
                Err(e) if e.is_transient() => {
                    if attempt + 1 < max_retries {
                        let _ = self.transition(&CredentialInput::RefreshRetry);
                        let delay = self.refresh_config.delay_for_attempt(attempt);
                        debug!(
                            attempt = attempt + 1,
                            max_retries,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "Refresh failed with transient error, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    } else {
                        warn!(error = %e, "Last refresh attempt failed");
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Refresh rejected, clearing session");
                    self.end_session(&CredentialInput::RefreshFailed)?;
                    return Ok(None);
                }
            }
        }

        warn!(max_retries, "Refresh failed after retries, keeping tokens");
        self.transition(&CredentialInput::RefreshFailed)?;
        Err(AuthError::RefreshExhausted(max_retries))
    }

    async fn try_refresh(&self, refresh_token: &str) -> AuthResult<AuthSession> {
        let response = self
            .http_client
            .post(self.endpoint("token?grant_type=refresh_token"))
            .header("apikey", &self.anon_key)
            .json(&json!({ "refresh_token": refresh_token }))
            .send()
            .await?;
        let response = check_response(response, AuthError::TokenRefresh).await?;
        let tokens: TokenResponse = response.json().await?;
        let session = tokens.into_session(Utc::now());
        self.save_session(&session)?;
        Ok(session)
    }

    async fn revoke(&self, access_token: &str) -> AuthResult<()> {
        let response = self
            .http_client
            .post(self.endpoint("logout"))
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {}", access_token))
            .send()
            .await?;
        check_response(response, AuthError::SessionInvalid).await?;
        Ok(())
    }

    // =========================================================================
    // Storage and events
    // =========================================================================

    /// Clear tokens, apply the terminal `input` and announce the sign-out.
    fn end_session(&self, input: &CredentialInput) -> AuthResult<()> {
        self.clear_stored()?;
        self.transition(input)?;
        self.emit(AuthEventKind::SignedOut, None);
        Ok(())
    }

    fn load_stored(&self) -> AuthResult<Option<AuthSession>> {
        match read_json::<AuthSession>(self.store.as_ref(), StorageKeys::AUTH_SESSION) {
            Ok(session) => Ok(session),
            Err(hogflix_storage::StorageError::Encoding(reason)) => {
                warn!(reason = %reason, "Discarding unreadable stored session");
                self.clear_stored()?;
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn save_session(&self, session: &AuthSession) -> AuthResult<()> {
        write_json(self.store.as_ref(), StorageKeys::AUTH_SESSION, session)?;
        Ok(())
    }

    fn clear_stored(&self) -> AuthResult<()> {
        self.store.delete(StorageKeys::AUTH_SESSION)?;
        Ok(())
    }

    fn emit(&self, kind: AuthEventKind, session: Option<AuthSession>) {
        publish(&self.events, AuthEvent::new(kind, SessionOrigin::Remote, session));
    }
}

#[async_trait]
impl SessionSource for SupabaseAuth {
    async fn get_session(&self) -> AuthResult<Option<AuthSession>> {
        SupabaseAuth::get_session(self).await
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    fn accepts(&self, event: &AuthEvent) -> bool {
        event.origin == SessionOrigin::Remote
    }
}

#[async_trait]
impl AccountService for SupabaseAuth {
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: Map<String, Value>,
    ) -> AuthResult<SignUpOutcome> {
        SupabaseAuth::sign_up(self, email, password, metadata).await
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> AuthResult<AuthSession> {
        SupabaseAuth::sign_in_with_password(self, email, password).await
    }

    async fn sign_out(&self) -> AuthResult<()> {
        SupabaseAuth::sign_out(self).await
    }

    async fn update_user(&self, metadata: Map<String, Value>) -> AuthResult<AuthUser> {
        SupabaseAuth::update_user(self, metadata).await
    }
}

impl std::fmt::Debug for SupabaseAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupabaseAuth")
            .field("supabase_url", &self.supabase_url)
            .field("state", &self.credential_state())
            .finish_non_exhaustive()
    }
}

/// Map a non-success response to an error.
///
/// 5xx and 429 become [`AuthError::Service`]; other failures use `client_error`
/// with the message GoTrue put in the body.
async fn check_response(
    response: Response,
    client_error: fn(String) -> AuthError,
) -> AuthResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = service_message(&body);
    warn!(status = %status, message = %message, "Auth request failed");

    if status.is_server_error() {
        return Err(AuthError::Service {
            status: status.as_u16(),
            message,
        });
    }
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(AuthError::RateLimited);
    }
    Err(client_error(message))
}

/// Pull the human-readable message out of a GoTrue error body.
fn service_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| {
            ["error_description", "msg", "message", "error"]
                .iter()
                .find_map(|key| value.get(*key).and_then(Value::as_str).map(str::to_string))
        })
        .unwrap_or_else(|| body.trim().to_string())
}
