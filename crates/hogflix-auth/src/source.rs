//! The session-source seam.
//!
//! A [`SessionSource`] answers "who is signed in right now" and pushes
//! [`AuthEvent`]s when that changes. Remote (GoTrue) and demo sources publish
//! on one shared [`EventBus`]; [`ModalSessionSource`] picks the authoritative
//! one and filters events that do not belong to the active mode.

use crate::demo::DemoSessionProvider;
use crate::supabase_auth::SignUpOutcome;
use crate::types::{AuthEvent, AuthEventKind, AuthSession, AuthUser, SessionOrigin};
use crate::AuthResult;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

/// Broadcast channel carrying auth events from every source.
pub type EventBus = broadcast::Sender<AuthEvent>;

const EVENT_BUS_CAPACITY: usize = 64;

pub fn event_bus() -> EventBus {
    broadcast::channel(EVENT_BUS_CAPACITY).0
}

/// Publish an event. Having no subscribers is not an error.
pub(crate) fn publish(bus: &EventBus, event: AuthEvent) {
    let kind = event.kind;
    if bus.send(event).is_err() {
        debug!(event = %kind, "No auth event subscribers");
    }
}

#[async_trait]
pub trait SessionSource: Send + Sync {
    /// Current session, or `None` when nobody is signed in.
    async fn get_session(&self) -> AuthResult<Option<AuthSession>>;

    /// Subscribe to push notifications.
    fn subscribe(&self) -> broadcast::Receiver<AuthEvent>;

    /// Whether `event` is authoritative for this source right now.
    fn accepts(&self, _event: &AuthEvent) -> bool {
        true
    }
}

/// Account operations of the remote auth service.
#[async_trait]
pub trait AccountService: SessionSource {
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: Map<String, Value>,
    ) -> AuthResult<SignUpOutcome>;

    async fn sign_in_with_password(&self, email: &str, password: &str) -> AuthResult<AuthSession>;

    async fn sign_out(&self) -> AuthResult<()>;

    async fn update_user(&self, metadata: Map<String, Value>) -> AuthResult<AuthUser>;
}

/// Routes to the demo provider while demo mode is enabled, otherwise to the
/// remote source.
pub struct ModalSessionSource {
    remote: Arc<dyn SessionSource>,
    demo: Arc<DemoSessionProvider>,
    events: EventBus,
}

impl ModalSessionSource {
    pub fn new(
        remote: Arc<dyn SessionSource>,
        demo: Arc<DemoSessionProvider>,
        events: EventBus,
    ) -> Self {
        Self {
            remote,
            demo,
            events,
        }
    }

    pub fn active_origin(&self) -> SessionOrigin {
        if self.demo.is_enabled() {
            SessionOrigin::Demo
        } else {
            SessionOrigin::Remote
        }
    }

    pub fn demo(&self) -> &Arc<DemoSessionProvider> {
        &self.demo
    }
}

#[async_trait]
impl SessionSource for ModalSessionSource {
    async fn get_session(&self) -> AuthResult<Option<AuthSession>> {
        match self.active_origin() {
            SessionOrigin::Demo => self.demo.get_session(),
            SessionOrigin::Remote => self.remote.get_session().await,
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    fn accepts(&self, event: &AuthEvent) -> bool {
        let active = self.active_origin();
        // Clearing demo mode drops the flag before its SIGNED_OUT is delivered.
        event.origin == active
            || (event.origin == SessionOrigin::Demo && event.kind == AuthEventKind::SignedOut)
    }
}
