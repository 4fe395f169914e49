//! Client-side sliding-window throttle.
//!
//! Each key keeps a JSON array of millisecond timestamps under
//! `rateLimit_<key>`. This is a soft guard only: there is no locking across
//! processes and the authoritative limit lives server-side.

use chrono::Utc;
use hogflix_config::RateLimitConfig;
use hogflix_storage::{read_json, write_json, SharedStore, StorageKeys};
use tracing::{debug, warn};

pub struct RateLimiter {
    store: SharedStore,
}

impl RateLimiter {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    pub fn allow(
        &self,
        key: &str,
        limit: RateLimitConfig,
        override_limit: Option<RateLimitConfig>,
    ) -> bool {
        self.allow_at(key, limit, override_limit, Utc::now().timestamp_millis())
    }

    /// Check and record an attempt at `now_ms`.
    ///
    /// A denied attempt leaves the stored list untouched.
    pub fn allow_at(
        &self,
        key: &str,
        limit: RateLimitConfig,
        override_limit: Option<RateLimitConfig>,
        now_ms: i64,
    ) -> bool {
        let effective = override_limit.unwrap_or(limit);
        let storage_key = StorageKeys::rate_limit(key);
        let window_ms = i64::try_from(effective.window().as_millis()).unwrap_or(i64::MAX);
        let cutoff = now_ms.saturating_sub(window_ms);

        let mut recent: Vec<i64> = self
            .load(&storage_key)
            .into_iter()
            .filter(|&ts| ts > cutoff)
            .collect();

        if recent.len() >= effective.limit as usize {
            debug!(key, count = recent.len(), limit = effective.limit, "Rate limit reached");
            return false;
        }

        recent.push(now_ms);
        if let Err(e) = write_json(self.store.as_ref(), &storage_key, &recent) {
            warn!(key, error = %e, "Failed to record rate limit attempt");
        }
        true
    }

    /// Forget all attempts for `key`.
    pub fn reset(&self, key: &str) {
        if let Err(e) = self.store.delete(&StorageKeys::rate_limit(key)) {
            warn!(key, error = %e, "Failed to reset rate limit");
        }
    }

    fn load(&self, storage_key: &str) -> Vec<i64> {
        match read_json::<Vec<i64>>(self.store.as_ref(), storage_key) {
            Ok(timestamps) => timestamps.unwrap_or_default(),
            Err(e) => {
                warn!(key = storage_key, error = %e, "Discarding unreadable rate limit entry");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hogflix_storage::memory_store;

    const HOUR_MS: i64 = 3_600_000;

    fn three_per_hour() -> RateLimitConfig {
        RateLimitConfig {
            limit: 3,
            window_secs: 3_600,
        }
    }

    #[test]
    fn test_fourth_call_denied_then_allowed_after_window() {
        let limiter = RateLimiter::new(memory_store());
        let start = 1_700_000_000_000;

        for i in 0..3 {
            assert!(limiter.allow_at("signup", three_per_hour(), None, start + i * 1_000));
        }
        assert!(!limiter.allow_at("signup", three_per_hour(), None, start + 10_000));

        // The first attempt falls out of the window one hour later.
        assert!(limiter.allow_at("signup", three_per_hour(), None, start + HOUR_MS + 1));
    }

    #[test]
    fn test_denied_call_does_not_mutate_stored_list() {
        let store = memory_store();
        let limiter = RateLimiter::new(store.clone());
        let start = 1_700_000_000_000;

        for i in 0..3 {
            limiter.allow_at("signup", three_per_hour(), None, start + i);
        }
        let before = store.get("rateLimit_signup").unwrap();
        assert!(!limiter.allow_at("signup", three_per_hour(), None, start + 100));
        assert_eq!(store.get("rateLimit_signup").unwrap(), before);
    }

    #[test]
    fn test_keys_are_independent() {
        let limiter = RateLimiter::new(memory_store());
        let now = 1_700_000_000_000;
        for _ in 0..3 {
            limiter.allow_at("signup", three_per_hour(), None, now);
        }
        assert!(!limiter.allow_at("signup", three_per_hour(), None, now));
        assert!(limiter.allow_at("login", three_per_hour(), None, now));
    }

    #[test]
    fn test_override_replaces_limit() {
        let limiter = RateLimiter::new(memory_store());
        let generous = RateLimitConfig {
            limit: 10,
            window_secs: 3_600,
        };
        let now = 1_700_000_000_000;
        for i in 0..10 {
            assert!(limiter.allow_at("signup", three_per_hour(), Some(generous), now + i));
        }
        assert!(!limiter.allow_at("signup", three_per_hour(), Some(generous), now + 10));
    }

    #[test]
    fn test_corrupt_entry_is_treated_as_empty() {
        let store = memory_store();
        store.set("rateLimit_signup", "not json").unwrap();
        let limiter = RateLimiter::new(store);
        assert!(limiter.allow_at("signup", three_per_hour(), None, 1_700_000_000_000));
    }

    #[test]
    fn test_reset_clears_attempts() {
        let limiter = RateLimiter::new(memory_store());
        let now = 1_700_000_000_000;
        for _ in 0..3 {
            limiter.allow_at("signup", three_per_hour(), None, now);
        }
        limiter.reset("signup");
        assert!(limiter.allow_at("signup", three_per_hour(), None, now));
    }
}
