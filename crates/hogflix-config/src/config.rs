//! Configuration management for the Hogflix client.

use crate::{CoreError, CoreResult, Paths};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Default Supabase URL (can be overridden at compile time via SUPABASE_URL env var).
pub const DEFAULT_SUPABASE_URL: &str = match option_env!("SUPABASE_URL") {
    Some(url) => url,
    None => "https://hogflix.supabase.co",
};

/// Default Supabase anon key (can be overridden at compile time via SUPABASE_ANON_KEY env var).
pub const DEFAULT_SUPABASE_ANON_KEY: &str = match option_env!("SUPABASE_ANON_KEY") {
    Some(key) => key,
    None => "public-anon-key",
};

/// Default PostHog project key (compile time only, optional).
const DEFAULT_POSTHOG_API_KEY: Option<&str> = option_env!("POSTHOG_API_KEY");

/// Default PostHog ingest host.
pub const DEFAULT_POSTHOG_HOST: &str = "https://us.i.posthog.com";

/// Default object storage bucket for uploaded images.
pub const DEFAULT_STORAGE_BUCKET: &str = "media";

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Poll cadence for the session reconciler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Re-poll interval while the auth view is not yet stable.
    pub unstable_interval_ms: u64,
    /// Re-poll interval once the auth view is stable.
    pub stable_interval_ms: u64,
    /// Delay between a login commit and the profile fetch it schedules.
    pub profile_fetch_delay_ms: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            unstable_interval_ms: 2_000,
            stable_interval_ms: 15_000,
            profile_fetch_delay_ms: 100,
        }
    }
}

impl PollingConfig {
    pub fn unstable_interval(&self) -> Duration {
        Duration::from_millis(self.unstable_interval_ms)
    }

    pub fn stable_interval(&self) -> Duration {
        Duration::from_millis(self.stable_interval_ms)
    }

    pub fn profile_fetch_delay(&self) -> Duration {
        Duration::from_millis(self.profile_fetch_delay_ms)
    }
}

/// A request budget: at most `limit` calls per `window_secs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub limit: u32,
    pub window_secs: u64,
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

fn default_signup_rate_limit() -> RateLimitConfig {
    RateLimitConfig {
        limit: 3,
        window_secs: 3_600,
    }
}

fn default_privileged_rate_limit() -> RateLimitConfig {
    RateLimitConfig {
        limit: 50,
        window_secs: 3_600,
    }
}

fn default_supabase_url() -> String {
    DEFAULT_SUPABASE_URL.to_string()
}

fn default_supabase_anon_key() -> String {
    DEFAULT_SUPABASE_ANON_KEY.to_string()
}

fn default_posthog_api_key() -> Option<String> {
    DEFAULT_POSTHOG_API_KEY.map(|s| s.to_string())
}

fn default_posthog_host() -> String {
    DEFAULT_POSTHOG_HOST.to_string()
}

fn default_storage_bucket() -> String {
    DEFAULT_STORAGE_BUCKET.to_string()
}

/// Main client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
    /// Supabase project URL.
    #[serde(default = "default_supabase_url")]
    pub supabase_url: String,
    /// Supabase anon API key (public, safe to expose).
    #[serde(default = "default_supabase_anon_key")]
    pub supabase_anon_key: String,
    /// PostHog project API key. Analytics is disabled when absent.
    #[serde(default = "default_posthog_api_key")]
    pub posthog_api_key: Option<String>,
    /// PostHog ingest host.
    #[serde(default = "default_posthog_host")]
    pub posthog_host: String,
    /// Object storage bucket for images.
    #[serde(default = "default_storage_bucket")]
    pub storage_bucket: String,
    /// Start in demo mode regardless of the page URL.
    #[serde(default)]
    pub demo_mode: bool,
    /// Reconciler timing.
    #[serde(default)]
    pub polling: PollingConfig,
    /// Budget for signup attempts.
    #[serde(default = "default_signup_rate_limit")]
    pub signup_rate_limit: RateLimitConfig,
    /// Budget applied instead of `signup_rate_limit` for privileged emails.
    #[serde(default = "default_privileged_rate_limit")]
    pub privileged_rate_limit: RateLimitConfig,
    /// Emails allowed to use `privileged_rate_limit`.
    #[serde(default)]
    pub privileged_emails: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            supabase_url: default_supabase_url(),
            supabase_anon_key: default_supabase_anon_key(),
            posthog_api_key: default_posthog_api_key(),
            posthog_host: default_posthog_host(),
            storage_bucket: default_storage_bucket(),
            demo_mode: false,
            polling: PollingConfig::default(),
            signup_rate_limit: default_signup_rate_limit(),
            privileged_rate_limit: default_privileged_rate_limit(),
            privileged_emails: Vec::new(),
        }
    }
}

impl Config {
    /// Create a new Config with default values, then override from environment.
    pub fn new() -> Self {
        let mut config = Self::default();
        config.load_from_env();
        config
    }

    /// Load configuration from `~/.hogflix/config.json`, falling back to defaults.
    /// Environment variables are applied last.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.load_from_env();
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a file.
    pub fn save(&self, paths: &Paths) -> CoreResult<()> {
        paths.ensure_dirs()?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(paths.config_file(), content)?;
        Ok(())
    }

    fn load_from_env(&mut self) {
        if let Some(log_level) = env_non_empty("HOGFLIX_LOG_LEVEL") {
            self.log_level = log_level;
        }
        if let Some(api_key) = env_non_empty("HOGFLIX_POSTHOG_API_KEY") {
            self.posthog_api_key = Some(api_key);
        }
        if let Some(host) = env_non_empty("HOGFLIX_POSTHOG_HOST") {
            self.posthog_host = host;
        }
    }

    /// Reject settings that would make the reconciler or rate limiter misbehave.
    pub fn validate(&self) -> CoreResult<()> {
        self.supabase_url()?;
        if self.polling.unstable_interval_ms == 0 || self.polling.stable_interval_ms == 0 {
            return Err(CoreError::Config(
                "poll intervals must be greater than zero".to_string(),
            ));
        }
        if self.signup_rate_limit.limit == 0 {
            return Err(CoreError::Config(
                "signup_rate_limit.limit must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Get the Supabase URL as a parsed URL.
    pub fn supabase_url(&self) -> CoreResult<Url> {
        Url::parse(&self.supabase_url).map_err(CoreError::from)
    }

    /// Whether `email` may use the privileged rate limit.
    pub fn is_privileged(&self, email: &str) -> bool {
        let email = email.trim();
        self.privileged_emails
            .iter()
            .any(|candidate| candidate.trim().eq_ignore_ascii_case(email))
    }
}

fn env_non_empty(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|raw| raw.trim().to_string())
        .filter(|value| !value.is_empty())
}
