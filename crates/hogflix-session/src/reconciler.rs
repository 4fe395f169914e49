//! The session reconciliation loop.
//!
//! One task owns the loop: it polls the session source on a timer, applies
//! pushed auth events, and feeds both into the [`ReconcileMachine`]. Committed
//! transitions update the [`SessionStore`], identify or reset analytics, and
//! schedule the profile fetch.
//!
//! Profile fetches run on their own tasks. Every commit bumps a generation
//! counter; a fetch result is written only if the generation it started
//! under is still current and the loop has not been shut down.

use crate::dedup::{EventKey, SeenEvents};
use crate::reconcile_fsm::{Commit, ConfidenceTracker, ReconcileMachine, ReconcileState, Signal};
use crate::store::{SessionPatch, SessionStore};
use chrono::{DateTime, Utc};
use hogflix_analytics::{IdentifiedUser, IdentityMirror};
use hogflix_auth::{AuthEvent, AuthEventKind, AuthSession, SessionSource};
use hogflix_config::PollingConfig;
use hogflix_profiles::{ProfileFetcher, ProfileRecord};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

struct Inner {
    machine: ReconcileMachine,
    /// Session behind the logged-in view.
    current: Option<AuthSession>,
    seen: SeenEvents,
    last_check_at: Option<DateTime<Utc>>,
}

pub struct Reconciler {
    source: Arc<dyn SessionSource>,
    profiles: Arc<ProfileFetcher>,
    store: Arc<SessionStore>,
    identity: Arc<IdentityMirror>,
    polling: PollingConfig,
    inner: Mutex<Inner>,
    generation: AtomicU64,
    stopped: AtomicBool,
}

impl Reconciler {
    pub fn new(
        source: Arc<dyn SessionSource>,
        profiles: Arc<ProfileFetcher>,
        store: Arc<SessionStore>,
        identity: Arc<IdentityMirror>,
        polling: PollingConfig,
    ) -> Self {
        Self {
            source,
            profiles,
            store,
            identity,
            polling,
            inner: Mutex::new(Inner {
                machine: ReconcileMachine::new(),
                current: None,
                seen: SeenEvents::default(),
                last_check_at: None,
            }),
            generation: AtomicU64::new(0),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> ReconcileState {
        *self.inner.lock().machine.state()
    }

    pub fn confidence(&self) -> ConfidenceTracker {
        let inner = self.inner.lock();
        ConfidenceTracker::from_state(inner.machine.state(), inner.last_check_at)
    }

    pub fn current_session(&self) -> Option<AuthSession> {
        self.inner.lock().current.clone()
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn poll_interval(&self) -> std::time::Duration {
        self.state().poll_interval(&self.polling)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// First session check. A session found here is shown immediately.
    pub async fn mount(self: &Arc<Self>) {
        let state = self.poll_once().await;
        info!(state = ?state, "Session reconciler mounted");
    }

    /// Query the source once and feed the result to the machine.
    ///
    /// Errors count as "no session".
    pub async fn poll_once(self: &Arc<Self>) -> ReconcileState {
        if self.is_stopped() {
            return self.state();
        }

        let (signal, session) = match self.source.get_session().await {
            Ok(Some(session)) => (Signal::SessionPresent, Some(session)),
            Ok(None) => (Signal::SessionAbsent, None),
            Err(e) => {
                warn!(error = %e, "Session poll failed, counting as absent");
                (Signal::SessionAbsent, None)
            }
        };

        // Torn down while the request was in flight.
        if self.is_stopped() {
            return self.state();
        }
        self.observe(signal, session);
        self.state()
    }

    /// Apply a pushed auth event.
    pub async fn handle_event(self: &Arc<Self>, event: AuthEvent) {
        if self.is_stopped() {
            return;
        }
        if !self.source.accepts(&event) {
            debug!(event = %event.kind, origin = %event.origin, "Ignoring event from inactive source");
            return;
        }
        if !self.remember(&event) {
            debug!(event = %event.kind, user_id = ?event.user_id(), "Ignoring duplicate event");
            return;
        }

        debug!(event = %event.kind, user_id = ?event.user_id(), "Auth event");
        match event.kind {
            AuthEventKind::SignedIn | AuthEventKind::UserUpdated | AuthEventKind::TokenRefreshed => {
                let Some(session) = event.session else {
                    self.poll_once().await;
                    return;
                };
                self.observe(Signal::SignedIn, Some(session.clone()));
                if event.kind == AuthEventKind::UserUpdated && self.state().is_logged_in() {
                    self.spawn_profile_fetch(session, self.generation(), true);
                }
            }
            AuthEventKind::SignedOut => {
                self.observe(Signal::SignedOut, None);
                if matches!(self.state(), ReconcileState::ProvisionalOut { .. }) {
                    // Corroborate right away instead of waiting for the timer.
                    self.poll_once().await;
                }
            }
        }
    }

    /// User-initiated logout: no debounce.
    pub async fn logout(&self) {
        let was_logged_in = {
            let mut inner = self.inner.lock();
            let was_logged_in = inner.machine.state().is_logged_in();
            if let Err(e) = inner.machine.consume(&Signal::ExplicitLogout) {
                warn!(error = ?e, "Explicit logout rejected by reconciler");
                inner.machine = ReconcileMachine::from_state(ReconcileState::ConfirmedOut);
            }
            inner.current = None;
            inner.seen.clear();
            inner.last_check_at = None;
            self.generation.fetch_add(1, Ordering::SeqCst);
            was_logged_in
        };

        self.store.clear();
        self.identity.reset();
        self.profiles.clear();
        info!(was_logged_in, "Logged out by user");
    }

    /// Start the loop on the current runtime.
    pub fn spawn(self: Arc<Self>) -> ReconcilerHandle {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        // Subscribe before mounting so nothing pushed during mount is lost.
        let events = self.source.subscribe();
        let task = tokio::spawn(Arc::clone(&self).run(events, shutdown_rx));

        ReconcilerHandle {
            reconciler: self,
            shutdown_tx: Some(shutdown_tx),
            task,
        }
    }

    async fn run(
        self: Arc<Self>,
        mut events: broadcast::Receiver<AuthEvent>,
        mut shutdown_rx: oneshot::Receiver<()>,
    ) {
        self.mount().await;

        let mut events_open = true;
        let mut next_poll = Instant::now() + self.poll_interval();

        loop {
            tokio::select! {
                _ = &mut shutdown_rx => {
                    debug!("Session reconciler shutdown requested");
                    break;
                }
                _ = sleep_until(next_poll) => {
                    self.poll_once().await;
                    next_poll = Instant::now() + self.poll_interval();
                }
                received = recv_event(&mut events, events_open) => {
                    match received {
                        Ok(event) => self.handle_event(event).await,
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(skipped, "Auth events dropped, polling instead");
                            self.poll_once().await;
                        }
                        Err(RecvError::Closed) => {
                            debug!("Auth event stream closed, continuing with polling only");
                            events_open = false;
                        }
                    }
                    next_poll = next_poll.min(Instant::now() + self.poll_interval());
                }
            }
        }

        self.stopped.store(true, Ordering::SeqCst);
        info!("Session reconciler stopped");
    }

    /// Record the event's key. Returns false for a duplicate.
    fn remember(&self, event: &AuthEvent) -> bool {
        let mut inner = self.inner.lock();
        let key = EventKey::for_event(event, inner.current.as_ref());
        inner.seen.insert(key)
    }

    fn observe(self: &Arc<Self>, signal: Signal, session: Option<AuthSession>) {
        let (commit, was_logged_in, generation) = {
            let mut inner = self.inner.lock();
            inner.last_check_at = Some(Utc::now());
            let previous = *inner.machine.state();
            let was_logged_in = previous.is_logged_in();

            let mut commit = match inner.machine.consume(&signal) {
                Ok(commit) => commit,
                Err(e) => {
                    warn!(signal = ?signal, error = ?e, "Signal rejected by reconciler");
                    None
                }
            };
            let state = *inner.machine.state();

            // A refuted sign-out must not mask the next real one.
            if matches!(previous, ReconcileState::ProvisionalOut { .. }) && signal.is_login() {
                inner.seen.forget_kind(AuthEventKind::SignedOut);
            }

            // Another account signed in while this one was shown.
            if commit.is_none() && state.is_logged_in() {
                let switched = matches!(
                    (&session, &inner.current),
                    (Some(new), Some(old)) if new.user_id() != old.user_id()
                );
                if switched {
                    commit = Some(Commit::LoggedIn);
                }
            }

            match commit {
                Some(Commit::LoggedIn) => inner.current = session.clone(),
                Some(Commit::LoggedOut) => {
                    inner.current = None;
                    inner.seen.clear();
                }
                None => {
                    // Keep the freshest tokens for the same user.
                    if state.is_logged_in() {
                        if let Some(session) = &session {
                            inner.current = Some(session.clone());
                        }
                    }
                }
            }

            let generation = if commit.is_some() {
                self.generation.fetch_add(1, Ordering::SeqCst) + 1
            } else {
                self.generation.load(Ordering::SeqCst)
            };
            (commit, was_logged_in, generation)
        };

        match commit {
            Some(Commit::LoggedIn) => match session {
                Some(session) => self.commit_login(session, generation),
                None => {
                    warn!("Login committed without a session");
                    self.store.update(SessionPatch {
                        logged_in: Some(true),
                        loading: Some(false),
                        ..Default::default()
                    });
                }
            },
            Some(Commit::LoggedOut) => self.commit_logout(was_logged_in),
            None => {}
        }
    }

    fn commit_login(self: &Arc<Self>, session: AuthSession, generation: u64) {
        let user = &session.user;
        let display_name = user.fallback_display_name();
        self.store.update(SessionPatch {
            logged_in: Some(true),
            display_name: Some(display_name.clone()),
            avatar_url: Some(user.metadata_str("avatar_url").map(str::to_string)),
            email: Some(user.email.clone()),
            loading: Some(false),
            user_id: Some(Some(user.id.clone())),
        });
        info!(user_id = %user.id, origin = %session.origin, generation, "Committed login");

        self.identity.identify(&IdentifiedUser {
            id: user.id.clone(),
            email: user.email.clone(),
            name: Some(display_name),
            is_demo: session.is_demo(),
        });

        self.spawn_profile_fetch(session, generation, false);
    }

    fn commit_logout(&self, was_logged_in: bool) {
        self.store.clear();
        // A user identified by an earlier run counts as signed in for analytics.
        if was_logged_in || self.identity.last_identified().is_some() {
            self.identity.reset();
        }
        info!(was_logged_in, "Committed logout");
    }

    fn is_current(&self, generation: u64) -> bool {
        !self.is_stopped() && self.generation() == generation
    }

    fn spawn_profile_fetch(self: &Arc<Self>, session: AuthSession, generation: u64, refresh: bool) {
        let this = Arc::clone(self);
        let delay = self.polling.profile_fetch_delay();

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if !this.is_current(generation) {
                debug!(user_id = %session.user.id, "Skipping profile fetch for stale session");
                return;
            }

            let fetched = if refresh {
                this.profiles.refresh(&session).await
            } else {
                this.profiles.fetch(&session).await
            };
            let profile = fetched.unwrap_or_else(|| ProfileRecord::default_for(&session.user));

            // Checked under the lock so a concurrent commit cannot interleave.
            let _inner = this.inner.lock();
            if !this.is_current(generation) {
                debug!(user_id = %session.user.id, "Dropping stale profile result");
                return;
            }
            this.store.update(SessionPatch {
                display_name: Some(profile.display_name),
                avatar_url: Some(profile.avatar_url),
                email: Some(profile.email),
                ..Default::default()
            });
            debug!(user_id = %session.user.id, "Profile applied to session");
        });
    }
}

async fn recv_event(
    events: &mut broadcast::Receiver<AuthEvent>,
    open: bool,
) -> Result<AuthEvent, RecvError> {
    if open {
        events.recv().await
    } else {
        std::future::pending().await
    }
}

/// Running reconciler. Dropping the handle also stops the loop.
pub struct ReconcilerHandle {
    reconciler: Arc<Reconciler>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl ReconcilerHandle {
    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    /// Stop polling and event handling. In-flight requests may finish but
    /// their results are discarded.
    pub async fn shutdown(self) {
        let ReconcilerHandle {
            reconciler,
            mut shutdown_tx,
            task,
        } = self;

        reconciler.stopped.store(true, Ordering::SeqCst);
        if let Some(tx) = shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Err(e) = task.await {
            warn!(error = %e, "Session reconciler task ended abnormally");
        }
    }
}
