//! Storage key constants.

/// Keys used by the client crates.
pub struct StorageKeys;

impl StorageKeys {
    /// Persisted demo session (JSON).
    pub const DEMO_SESSION: &'static str = "hogflix_demo_session";

    /// Demo mode flag ("true" when enabled).
    pub const DEMO_MODE: &'static str = "hogflix_demo_mode";

    /// Supabase auth session: tokens plus user (JSON).
    pub const AUTH_SESSION: &'static str = "hogflix_auth_session";

    /// user id -> email map used to enrich analytics calls (JSON).
    pub const ANALYTICS_EMAIL_CACHE: &'static str = "posthog_email_cache";

    /// Distinct id last passed to analytics identify.
    pub const ANALYTICS_LAST_IDENTIFIED_USER: &'static str = "posthog_last_identified_user";

    /// Prefix for per-key rate limiter timestamp lists.
    pub const RATE_LIMIT_PREFIX: &'static str = "rateLimit_";

    /// Storage key holding the timestamps for a rate limiter key.
    pub fn rate_limit(key: &str) -> String {
        format!("{}{}", Self::RATE_LIMIT_PREFIX, key)
    }
}
