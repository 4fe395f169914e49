//! Identity and subscription mirroring on top of [`Analytics`].
//!
//! Two small caches live in the injected key-value store:
//! - `posthog_email_cache`: user id → email, so events emitted before a profile
//!   loads can still carry the email
//! - `posthog_last_identified_user`: the user last attached to this device, so
//!   a later run knows someone was signed in
//!
//! Skipping a repeated identify is decided per process: the analytics sink
//! starts anonymous on every run, so the first identify of a run is always sent.
//!
//! Storage failures are logged and ignored.

use crate::{Analytics, AppEvent, Properties};
use hogflix_storage::{read_json, write_json, SharedStore, StorageKeys};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Person attributes sent on identify.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IdentifiedUser {
    pub id: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub is_demo: bool,
}

/// Subscription state mirrored to analytics as a group plus person properties.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionSnapshot {
    pub plan_id: String,
    pub plan_name: String,
    pub price_cents: u32,
    pub status: String,
}

const SUBSCRIPTION_GROUP: &str = "subscription";

#[derive(Clone)]
pub struct IdentityMirror {
    analytics: Arc<dyn Analytics>,
    store: SharedStore,
    /// User identified on `analytics` during this run.
    identified: Arc<Mutex<Option<String>>>,
}

impl IdentityMirror {
    pub fn new(analytics: Arc<dyn Analytics>, store: SharedStore) -> Self {
        Self {
            analytics,
            store,
            identified: Arc::new(Mutex::new(None)),
        }
    }

    pub fn analytics(&self) -> &Arc<dyn Analytics> {
        &self.analytics
    }

    /// Identify `user` unless it was already identified in this run.
    ///
    /// Returns true when an identify call was sent.
    pub fn identify(&self, user: &IdentifiedUser) -> bool {
        if let Some(email) = user.email.as_deref().filter(|e| !e.is_empty()) {
            self.cache_email(&user.id, email);
        }

        {
            let mut identified = self.identified.lock();
            if identified.as_deref() == Some(user.id.as_str()) {
                debug!(user_id = %user.id, "User already identified, skipping");
                return false;
            }
            *identified = Some(user.id.clone());
        }

        let mut props = Properties::new();
        if let Some(email) = user.email.clone().or_else(|| self.cached_email(&user.id)) {
            props.insert("email".to_string(), Value::from(email));
        }
        if let Some(name) = &user.name {
            props.insert("name".to_string(), Value::from(name.as_str()));
        }
        props.insert("is_demo".to_string(), Value::Bool(user.is_demo));

        self.analytics.identify(&user.id, props);
        if let Err(e) = self
            .store
            .set(StorageKeys::ANALYTICS_LAST_IDENTIFIED_USER, &user.id)
        {
            warn!(error = %e, "Failed to persist last identified user");
        }
        true
    }

    /// Forget the identified user. The email cache is kept.
    pub fn reset(&self) {
        *self.identified.lock() = None;
        self.analytics.reset();
        if let Err(e) = self
            .store
            .delete(StorageKeys::ANALYTICS_LAST_IDENTIFIED_USER)
        {
            warn!(error = %e, "Failed to clear last identified user");
        }
    }

    /// User last identified on this device, possibly by an earlier run.
    pub fn last_identified(&self) -> Option<String> {
        match self.store.get(StorageKeys::ANALYTICS_LAST_IDENTIFIED_USER) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "Failed to read last identified user");
                None
            }
        }
    }

    pub fn cached_email(&self, user_id: &str) -> Option<String> {
        self.email_cache().remove(user_id)
    }

    /// Mirror the user's plan as the `subscription` group and as person properties.
    pub fn mirror_subscription(&self, subscription: &SubscriptionSnapshot) {
        let mut group_props = Properties::new();
        group_props.insert("name".to_string(), Value::from(subscription.plan_name.as_str()));
        group_props.insert("price_cents".to_string(), Value::from(subscription.price_cents));
        self.analytics
            .set_group(SUBSCRIPTION_GROUP, &subscription.plan_id, group_props);

        let mut person_props = Properties::new();
        person_props.insert(
            "subscription_plan".to_string(),
            Value::from(subscription.plan_id.as_str()),
        );
        person_props.insert(
            "subscription_status".to_string(),
            Value::from(subscription.status.as_str()),
        );
        person_props.insert(
            "subscription_price_cents".to_string(),
            Value::from(subscription.price_cents),
        );
        self.analytics.set_person_properties(person_props);
    }

    /// Emit a catalogue event, enriched with the cached email of the current user.
    pub fn track(&self, event: &AppEvent) {
        let mut props = event.properties();
        if let Some(email) = self
            .last_identified()
            .and_then(|user_id| self.cached_email(&user_id))
        {
            props.entry("email").or_insert(Value::from(email));
        }
        self.analytics.track_event(event.name(), props);
    }

    pub fn is_feature_enabled(&self, flag: &str) -> bool {
        self.analytics.is_feature_enabled(flag)
    }

    fn email_cache(&self) -> BTreeMap<String, String> {
        match read_json::<BTreeMap<String, String>>(
            self.store.as_ref(),
            StorageKeys::ANALYTICS_EMAIL_CACHE,
        ) {
            Ok(cache) => cache.unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "Discarding unreadable email cache");
                BTreeMap::new()
            }
        }
    }

    fn cache_email(&self, user_id: &str, email: &str) {
        let mut cache = self.email_cache();
        if cache.get(user_id).map(String::as_str) == Some(email) {
            return;
        }
        cache.insert(user_id.to_string(), email.to_string());
        if let Err(e) = write_json(self.store.as_ref(), StorageKeys::ANALYTICS_EMAIL_CACHE, &cache) {
            warn!(error = %e, "Failed to persist email cache");
        }
    }
}
