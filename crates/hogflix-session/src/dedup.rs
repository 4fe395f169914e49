//! Bounded memory of push events already applied.

use hogflix_auth::{AuthEvent, AuthEventKind, AuthSession, AuthUser, SessionOrigin};
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashSet, VecDeque};
use std::hash::{Hash, Hasher};

pub const DEFAULT_SEEN_CAPACITY: usize = 256;

/// Identity of a push event.
///
/// Two deliveries describe the same event when they come from the same
/// source, have the same kind and concern the same session (user id plus
/// expiry). `USER_UPDATED` also carries a fingerprint of the user record,
/// since updates keep the session. Sessionless events (`SIGNED_OUT`) are keyed
/// on the session they end.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventKey {
    pub origin: SessionOrigin,
    pub kind: AuthEventKind,
    pub user_id: Option<String>,
    pub expires_at_ms: Option<i64>,
    pub content: Option<u64>,
}

impl EventKey {
    pub fn for_event(event: &AuthEvent, current: Option<&AuthSession>) -> Self {
        let session = event.session.as_ref().or(current);
        let content = match (event.kind, &event.session) {
            (AuthEventKind::UserUpdated, Some(session)) => Some(user_fingerprint(&session.user)),
            _ => None,
        };
        Self {
            origin: event.origin,
            kind: event.kind,
            user_id: session.map(|s| s.user.id.clone()),
            expires_at_ms: session.map(|s| s.expires_at.timestamp_millis()),
            content,
        }
    }
}

fn user_fingerprint(user: &AuthUser) -> u64 {
    let mut hasher = DefaultHasher::new();
    user.email.hash(&mut hasher);
    // Map keys are ordered, so equal metadata serializes identically.
    serde_json::to_string(&user.user_metadata)
        .unwrap_or_default()
        .hash(&mut hasher);
    hasher.finish()
}

#[derive(Debug)]
pub struct SeenEvents {
    keys: HashSet<EventKey>,
    order: VecDeque<EventKey>,
    capacity: usize,
}

impl Default for SeenEvents {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_SEEN_CAPACITY)
    }
}

impl SeenEvents {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            keys: HashSet::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Record `key`. Returns false if it was already recorded.
    pub fn insert(&mut self, key: EventKey) -> bool {
        if self.keys.contains(&key) {
            return false;
        }
        if self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.keys.remove(&oldest);
            }
        }
        self.order.push_back(key.clone());
        self.keys.insert(key);
        true
    }

    /// Forget every key of `kind`, so the next such event is applied.
    pub fn forget_kind(&mut self, kind: AuthEventKind) {
        self.order.retain(|key| key.kind != kind);
        self.keys.retain(|key| key.kind != kind);
    }

    pub fn clear(&mut self) {
        self.keys.clear();
        self.order.clear();
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
