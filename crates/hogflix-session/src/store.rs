//! The session store the UI renders from.
//!
//! Written only by the reconciler (through [`SessionPatch`]); readers take
//! snapshots or subscribe to a `watch` channel.

use serde::Serialize;
use tokio::sync::watch;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionState {
    pub logged_in: bool,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub email: Option<String>,
    /// True until the first session check completes.
    pub loading: bool,
    pub user_id: Option<String>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            logged_in: false,
            display_name: String::new(),
            avatar_url: None,
            email: None,
            loading: true,
            user_id: None,
        }
    }
}

impl SessionState {
    pub fn logged_out() -> Self {
        Self {
            loading: false,
            ..Self::default()
        }
    }
}

/// Partial update. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionPatch {
    pub logged_in: Option<bool>,
    pub display_name: Option<String>,
    pub avatar_url: Option<Option<String>>,
    pub email: Option<Option<String>>,
    pub loading: Option<bool>,
    pub user_id: Option<Option<String>>,
}

impl SessionPatch {
    /// Apply to `state`, returning whether anything changed.
    pub fn apply(self, state: &mut SessionState) -> bool {
        let before = state.clone();
        if let Some(logged_in) = self.logged_in {
            state.logged_in = logged_in;
        }
        if let Some(display_name) = self.display_name {
            state.display_name = display_name;
        }
        if let Some(avatar_url) = self.avatar_url {
            state.avatar_url = avatar_url;
        }
        if let Some(email) = self.email {
            state.email = email;
        }
        if let Some(loading) = self.loading {
            state.loading = loading;
        }
        if let Some(user_id) = self.user_id {
            state.user_id = user_id;
        }
        *state != before
    }
}

#[derive(Debug)]
pub struct SessionStore {
    tx: watch::Sender<SessionState>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            tx: watch::channel(SessionState::default()).0,
        }
    }

    pub fn snapshot(&self) -> SessionState {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.tx.subscribe()
    }

    /// Apply a patch; subscribers are notified only when the state changed.
    pub fn update(&self, patch: SessionPatch) -> bool {
        self.tx.send_if_modified(|state| patch.apply(state))
    }

    /// Replace the state with the logged-out state.
    pub fn clear(&self) {
        self.tx.send_if_modified(|state| {
            let cleared = SessionState::logged_out();
            if *state == cleared {
                return false;
            }
            *state = cleared;
            true
        });
    }
}
