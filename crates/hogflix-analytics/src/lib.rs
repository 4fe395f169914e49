//! Analytics mirror for the Hogflix client.
//!
//! Analytics is a one-way sink: the application pushes identity, subscription
//! and behavioral events and never reads anything back except feature flags.
//! Every call is fire-and-forget. Implementations swallow and log their own
//! failures so an unavailable analytics backend never changes product behavior.
//!
//! # Architecture
//!
//! ```text
//! IdentityMirror ──► dyn Analytics ──► PosthogAnalytics ──► worker thread ──► POST /batch/
//!        │                      └────► NoopAnalytics / RecordingAnalytics
//!        └── KeyValueStore (email cache, last identified user)
//! ```

mod events;
mod mirror;
mod posthog;
mod recording;

pub use events::{AppEvent, LoginMethod};
pub use mirror::{IdentifiedUser, IdentityMirror, SubscriptionSnapshot};
pub use posthog::{PosthogAnalytics, PosthogConfig};
pub use recording::{AnalyticsCall, RecordingAnalytics};

use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::warn;

/// Event or person properties.
pub type Properties = Map<String, Value>;

/// Narrow analytics interface. The vendor behind it is swappable.
pub trait Analytics: Send + Sync {
    /// Associate subsequent events with `distinct_id` and set person properties.
    fn identify(&self, distinct_id: &str, properties: Properties);

    /// Capture a named event for the current distinct id.
    fn track_event(&self, event: &str, properties: Properties);

    /// Associate the current user with a group and set group properties.
    fn set_group(&self, group_type: &str, group_key: &str, properties: Properties);

    /// Set properties on the current person without an identify.
    fn set_person_properties(&self, properties: Properties);

    /// Forget the current identity (logout).
    fn reset(&self);

    /// Cached feature flag lookup. Unknown flags are disabled.
    fn is_feature_enabled(&self, flag: &str) -> bool;
}

/// Analytics that drops everything. Used when no project key is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAnalytics;

impl Analytics for NoopAnalytics {
    fn identify(&self, _distinct_id: &str, _properties: Properties) {}
    fn track_event(&self, _event: &str, _properties: Properties) {}
    fn set_group(&self, _group_type: &str, _group_key: &str, _properties: Properties) {}
    fn set_person_properties(&self, _properties: Properties) {}
    fn reset(&self) {}
    fn is_feature_enabled(&self, _flag: &str) -> bool {
        false
    }
}

/// Build the analytics backend for the given project key.
///
/// Falls back to [`NoopAnalytics`] when there is no key or the sink worker
/// cannot be started.
pub fn analytics_from_config(api_key: Option<&str>, host: &str) -> Arc<dyn Analytics> {
    let Some(api_key) = api_key.map(str::trim).filter(|key| !key.is_empty()) else {
        return Arc::new(NoopAnalytics);
    };

    match PosthogAnalytics::start(PosthogConfig::new(api_key, host)) {
        Ok(analytics) => Arc::new(analytics),
        Err(e) => {
            warn!(error = %e, "Failed to start analytics sink, analytics disabled");
            Arc::new(NoopAnalytics)
        }
    }
}

/// Build a [`Properties`] map from `key => value` pairs.
#[macro_export]
macro_rules! props {
    () => { $crate::Properties::new() };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut map = $crate::Properties::new();
        $( map.insert($key.to_string(), ::serde_json::json!($value)); )+
        map
    }};
}
