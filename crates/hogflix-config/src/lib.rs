//! Configuration, file-system paths and logging setup for the Hogflix client crates.

mod config;
mod error;
mod logging;
mod paths;

pub use config::{
    Config, PollingConfig, RateLimitConfig, DEFAULT_LOG_LEVEL, DEFAULT_POSTHOG_HOST,
    DEFAULT_STORAGE_BUCKET, DEFAULT_SUPABASE_ANON_KEY, DEFAULT_SUPABASE_URL,
};
pub use error::{CoreError, CoreResult};
pub use logging::{init_logging, parse_level};
pub use paths::Paths;
