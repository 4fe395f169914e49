//! Application facade: the operations the UI calls.
//!
//! Wires the session sources, profile fetcher, storage client, rate limiter
//! and analytics mirror around one [`Reconciler`]. Operations that change who
//! is signed in feed their result straight into the reconciler, so the
//! session store is up to date when they return; the same event arriving
//! later on the bus is dropped as a duplicate.

use crate::error::{AppError, AppResult};
use crate::reconcile_fsm::ConfidenceTracker;
use crate::reconciler::{Reconciler, ReconcilerHandle};
use crate::store::{SessionPatch, SessionState, SessionStore};
use hogflix_analytics::{
    analytics_from_config, Analytics, AppEvent, IdentifiedUser, IdentityMirror, LoginMethod,
    SubscriptionSnapshot,
};
use hogflix_auth::{
    event_bus, validate_email, AccountService, AuthEvent, AuthEventKind, AuthSession,
    DemoSessionProvider, EventBus, ModalSessionSource, RateLimiter, SessionOrigin,
    SessionSource, SignUpOutcome, SignupRequest, SubscriptionPlan, SupabaseAuth,
};
use hogflix_config::Config;
use hogflix_media::{
    content_type_for, filter_unique_images, has_image_extension, MediaError, MediaStore,
    StorageClient,
};
use hogflix_profiles::{ProfileFetcher, ProfileRecord, ProfileStore, ProfileUpdate, SupabaseProfileStore};
use hogflix_storage::SharedStore;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

/// Rate limiter key for signup attempts.
pub const SIGNUP_RATE_LIMIT_KEY: &str = "signup";

/// External collaborators of the runtime.
pub struct Services {
    /// Bus the account service and demo provider publish on.
    pub events: EventBus,
    pub accounts: Arc<dyn AccountService>,
    /// The account service viewed as a session source.
    pub remote: Arc<dyn SessionSource>,
    pub profiles: Arc<dyn ProfileStore>,
    pub media: Arc<dyn MediaStore>,
    pub analytics: Arc<dyn Analytics>,
}

impl Services {
    /// Supabase auth, profiles and storage plus PostHog (or no-op) analytics.
    pub fn from_config(config: &Config, kv: &SharedStore) -> AppResult<Self> {
        let events = event_bus();
        let auth = Arc::new(SupabaseAuth::from_config(config, kv.clone(), events.clone())?);
        Ok(Self {
            events,
            accounts: auth.clone(),
            remote: auth,
            profiles: Arc::new(SupabaseProfileStore::from_config(config)?),
            media: Arc::new(StorageClient::from_config(config)?),
            analytics: analytics_from_config(
                config.posthog_api_key.as_deref(),
                &config.posthog_host,
            ),
        })
    }
}

pub struct AppRuntime {
    config: Config,
    accounts: Arc<dyn AccountService>,
    demo: Arc<DemoSessionProvider>,
    source: Arc<ModalSessionSource>,
    profiles: Arc<ProfileFetcher>,
    media: Arc<dyn MediaStore>,
    identity: Arc<IdentityMirror>,
    rate_limiter: RateLimiter,
    store: Arc<SessionStore>,
    reconciler: Arc<Reconciler>,
    handle: tokio::sync::Mutex<Option<ReconcilerHandle>>,
}

impl AppRuntime {
    pub fn from_config(config: Config, kv: SharedStore) -> AppResult<Self> {
        let services = Services::from_config(&config, &kv)?;
        Ok(Self::new(config, kv, services))
    }

    pub fn new(config: Config, kv: SharedStore, services: Services) -> Self {
        let demo = Arc::new(DemoSessionProvider::new(kv.clone(), services.events.clone()));
        if config.demo_mode {
            if let Err(e) = demo.enable() {
                warn!(error = %e, "Failed to enable demo mode from config");
            }
        }

        let source = Arc::new(ModalSessionSource::new(
            services.remote,
            demo.clone(),
            services.events,
        ));
        let profiles = Arc::new(ProfileFetcher::new(services.profiles));
        let identity = Arc::new(IdentityMirror::new(services.analytics, kv.clone()));
        let store = Arc::new(SessionStore::new());
        let reconciler = Arc::new(Reconciler::new(
            source.clone(),
            profiles.clone(),
            store.clone(),
            identity.clone(),
            config.polling.clone(),
        ));

        Self {
            config,
            accounts: services.accounts,
            demo,
            source,
            profiles,
            media: services.media,
            identity,
            rate_limiter: RateLimiter::new(kv),
            store,
            reconciler,
            handle: tokio::sync::Mutex::new(None),
        }
    }

    // =========================================================================
    // Lifecycle and views
    // =========================================================================

    /// Start the reconciliation loop. Calling it twice is a no-op.
    pub async fn start(&self) {
        let mut handle = self.handle.lock().await;
        if handle.is_none() {
            *handle = Some(Arc::clone(&self.reconciler).spawn());
            info!(demo = self.demo.is_enabled(), "Hogflix runtime started");
        }
    }

    pub async fn shutdown(&self) {
        if let Some(handle) = self.handle.lock().await.take() {
            handle.shutdown().await;
        }
    }

    /// Run the first session check without starting the loop.
    pub async fn mount(&self) -> SessionState {
        self.reconciler.mount().await;
        self.snapshot()
    }

    pub fn snapshot(&self) -> SessionState {
        self.store.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.store.subscribe()
    }

    pub fn confidence(&self) -> ConfidenceTracker {
        self.reconciler.confidence()
    }

    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    pub fn identity(&self) -> &Arc<IdentityMirror> {
        &self.identity
    }

    pub fn demo(&self) -> &Arc<DemoSessionProvider> {
        &self.demo
    }

    pub fn active_origin(&self) -> SessionOrigin {
        self.source.active_origin()
    }

    /// Whether the app runs in demo mode; a `demo` query parameter in
    /// `page_url` turns it on.
    pub fn is_demo_mode(&self, page_url: Option<&str>) -> bool {
        let was_enabled = self.demo.is_enabled();
        let enabled = self.demo.is_demo_mode(page_url);
        if enabled && !was_enabled {
            self.identity.track(&AppEvent::DemoModeEntered {
                source: "url".to_string(),
            });
        }
        enabled
    }

    // =========================================================================
    // Account operations
    // =========================================================================

    /// Validate, throttle and create an account, then set up its profile and
    /// analytics identity.
    pub async fn signup(&self, request: &SignupRequest) -> AppResult<SignUpOutcome> {
        let plan = request.validate()?;
        let email = request.normalized_email();

        let override_limit = self
            .config
            .is_privileged(&email)
            .then_some(self.config.privileged_rate_limit);
        if !self.rate_limiter.allow(
            SIGNUP_RATE_LIMIT_KEY,
            self.config.signup_rate_limit,
            override_limit,
        ) {
            warn!(email = %email, "Signup rate limited");
            self.identity.track(&AppEvent::SignupRateLimited);
            return Err(AppError::RateLimited);
        }

        let mut metadata = Map::new();
        if let Some(name) = request.display_name.as_deref().map(str::trim) {
            if !name.is_empty() {
                metadata.insert("display_name".to_string(), Value::from(name));
            }
        }
        metadata.insert("plan".to_string(), Value::from(plan.id()));

        let demo = self.demo.is_enabled();
        let outcome = if demo {
            let session = self.demo.create_session(&email, metadata)?;
            SignUpOutcome::SignedIn(session)
        } else {
            self.accounts
                .sign_up(&email, &request.password, metadata)
                .await?
        };

        if let SignUpOutcome::SignedIn(session) = &outcome {
            if let Err(e) = self
                .profiles
                .create_default(session, request.display_name.as_deref())
                .await
            {
                warn!(user_id = %session.user.id, error = %e, "Failed to create profile at signup");
            }
            self.apply_sign_in(session.clone()).await;
        }

        let user = outcome.user();
        self.identity.identify(&IdentifiedUser {
            id: user.id.clone(),
            email: user.email.clone(),
            name: request.display_name.clone(),
            is_demo: demo,
        });
        self.mirror_plan(plan);
        self.identity.track(&AppEvent::SignedUp {
            plan_id: plan.id().to_string(),
            demo,
        });
        info!(user_id = %user.id, plan = plan.id(), demo, "Signup complete");
        Ok(outcome)
    }

    /// Email/password login. In demo mode this creates a demo session instead.
    pub async fn login(&self, email: &str, password: &str) -> AppResult<AuthSession> {
        validate_email(email)?;

        if self.demo.is_enabled() {
            return self.login_demo(email, Map::new()).await;
        }

        let session = self
            .accounts
            .sign_in_with_password(email.trim(), password)
            .await?;
        self.apply_sign_in(session.clone()).await;
        self.identity.track(&AppEvent::LoggedIn {
            method: LoginMethod::Password,
        });
        Ok(session)
    }

    /// Start (or resume) a demo session for `email`.
    pub async fn login_demo(&self, email: &str, attrs: Map<String, Value>) -> AppResult<AuthSession> {
        let was_enabled = self.demo.is_enabled();
        let session = self.demo.create_session(email, attrs)?;
        if !was_enabled {
            self.identity.track(&AppEvent::DemoModeEntered {
                source: "login".to_string(),
            });
        }
        self.apply_sign_in(session.clone()).await;
        self.identity.track(&AppEvent::LoggedIn {
            method: LoginMethod::Demo,
        });
        Ok(session)
    }

    /// User-initiated logout. Always succeeds locally.
    ///
    /// Signs out of the source behind the displayed session and of the
    /// active source, when those differ (demo mode turned on mid-session).
    pub async fn logout(&self) {
        self.identity.track(&AppEvent::LoggedOut);

        let active = self.source.active_origin();
        let mut origins = vec![active];
        if let Some(shown) = self.reconciler.current_session().map(|s| s.origin) {
            if shown != active {
                origins.push(shown);
            }
        }

        for origin in origins {
            let result = match origin {
                SessionOrigin::Demo => self.demo.clear(),
                SessionOrigin::Remote => self.accounts.sign_out().await,
            };
            if let Err(e) = result {
                warn!(origin = %origin, error = %e, "Sign-out failed, clearing local state anyway");
            }
        }

        self.reconciler.logout().await;
    }

    // =========================================================================
    // Profile, plan and media
    // =========================================================================

    /// Profile of the signed-in user (defaults when no row exists).
    pub async fn profile(&self) -> AppResult<ProfileRecord> {
        let session = self.require_session()?;
        Ok(self.profiles.resolve(&session).await)
    }

    pub async fn update_profile(&self, update: &ProfileUpdate) -> AppResult<ProfileRecord> {
        let session = self.require_session()?;
        let record = self.profiles.update(&session, update).await?;

        self.store.update(SessionPatch {
            display_name: Some(record.display_name.clone()),
            avatar_url: Some(record.avatar_url.clone()),
            ..Default::default()
        });
        if !update.is_empty() {
            self.identity.track(&AppEvent::ProfileUpdated {
                fields: update.changed_fields(),
            });
        }
        Ok(record)
    }

    /// Record a plan change for analytics.
    pub fn select_plan(&self, plan: SubscriptionPlan) {
        self.mirror_plan(plan);
        self.identity.track(&AppEvent::PlanSelected {
            plan_id: plan.id().to_string(),
            price_cents: plan.price_cents(),
        });
    }

    /// Upload an image and return its public URL.
    pub async fn upload_image(&self, path: &str, bytes: Vec<u8>) -> AppResult<String> {
        if !has_image_extension(path) {
            return Err(MediaError::InvalidPath(path.to_string()).into());
        }
        let token = self.storage_token();
        let size = bytes.len();
        let url = self
            .media
            .upload(path, bytes, content_type_for(path), &token)
            .await?;

        self.identity.track(&AppEvent::ImageUploaded {
            path: path.to_string(),
            bytes: size,
        });
        Ok(url)
    }

    /// Unique storage image URLs under `prefix`.
    pub async fn list_images(&self, prefix: &str) -> AppResult<Vec<String>> {
        let token = self.storage_token();
        let urls = self.media.list(prefix, &token).await?;
        Ok(filter_unique_images(urls))
    }

    // =========================================================================
    // Analytics passthrough
    // =========================================================================

    pub fn track(&self, event: &AppEvent) {
        self.identity.track(event);
    }

    pub fn is_feature_enabled(&self, flag: &str) -> bool {
        self.identity.is_feature_enabled(flag)
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    async fn apply_sign_in(&self, session: AuthSession) {
        let event = AuthEvent::new(AuthEventKind::SignedIn, session.origin, Some(session));
        self.reconciler.handle_event(event).await;
    }

    fn require_session(&self) -> AppResult<AuthSession> {
        self.reconciler
            .current_session()
            .ok_or(AppError::NotLoggedIn)
    }

    /// Bearer for storage calls: the remote session's token, else the anon key.
    fn storage_token(&self) -> String {
        match self.reconciler.current_session() {
            Some(session) if !session.is_demo() => session.access_token,
            _ => self.config.supabase_anon_key.clone(),
        }
    }

    fn mirror_plan(&self, plan: SubscriptionPlan) {
        self.identity.mirror_subscription(&SubscriptionSnapshot {
            plan_id: plan.id().to_string(),
            plan_name: plan.display_name().to_string(),
            price_cents: plan.price_cents(),
            status: "active".to_string(),
        });
    }
}
