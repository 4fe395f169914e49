//! Profile fetching with a per-process seen-cache.
//!
//! Each user id is fetched from the remote table at most once per process;
//! later calls are answered from the cache until [`ProfileFetcher::refresh`]
//! or [`ProfileFetcher::invalidate`] is used. Remote errors are logged and
//! reported as "no profile" so the UI always has something to show.

use crate::error::ProfileResult;
use crate::record::{ProfileRecord, ProfileUpdate};
use crate::store::ProfileStore;
use hogflix_auth::AuthSession;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// `None` means the user has no row and defaults were used.
type CacheEntry = Option<ProfileRecord>;

/// One cell per user: concurrent fetches for a user share its initialization,
/// fetches for different users run independently.
type Slot = Arc<OnceCell<CacheEntry>>;

pub struct ProfileFetcher {
    store: Arc<dyn ProfileStore>,
    cache: Mutex<HashMap<String, Slot>>,
}

impl ProfileFetcher {
    pub fn new(store: Arc<dyn ProfileStore>) -> Self {
        Self {
            store,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Profile for the session's user.
    ///
    /// Returns `None` when defaults were used: the row was missing (a default
    /// row is created), the remote call failed, or the session is a demo session.
    pub async fn fetch(&self, session: &AuthSession) -> Option<ProfileRecord> {
        let user_id = session.user_id();
        if session.is_demo() {
            return self.cached(user_id);
        }

        let slot = self.slot(user_id);
        if let Some(entry) = slot.get() {
            debug!(user_id, "Profile served from cache");
            return entry.clone();
        }

        // Errors leave the cell empty, so the next call retries.
        match slot.get_or_try_init(|| self.fetch_remote(session)).await {
            Ok(entry) => entry.clone(),
            Err(e) => {
                warn!(user_id, error = %e, "Profile fetch failed, using defaults");
                None
            }
        }
    }

    /// Fetch bypassing the cache.
    pub async fn refresh(&self, session: &AuthSession) -> Option<ProfileRecord> {
        self.invalidate(session.user_id());
        self.fetch(session).await
    }

    /// Profile to display: the fetched record or the shared default.
    pub async fn resolve(&self, session: &AuthSession) -> ProfileRecord {
        self.fetch(session)
            .await
            .unwrap_or_else(|| ProfileRecord::default_for(&session.user))
    }

    /// Validate and save changes from the profile management screen.
    ///
    /// Demo sessions are updated locally only.
    pub async fn update(
        &self,
        session: &AuthSession,
        update: &ProfileUpdate,
    ) -> ProfileResult<ProfileRecord> {
        update.validate()?;
        let user_id = session.user_id();

        if update.is_empty() {
            return Ok(self.resolve(session).await);
        }

        let record = if session.is_demo() {
            let mut record = self.resolve(session).await;
            record.apply(update);
            record
        } else {
            let row = self
                .store
                .update(user_id, &update.to_patch(), &session.access_token)
                .await?;
            ProfileRecord::from_row(row, &session.user)
        };

        info!(user_id, fields = ?update.changed_fields(), "Profile updated");
        self.store_cached(user_id, Some(record.clone()));
        Ok(record)
    }

    /// Create (or merge) the row for a new account, optionally with a chosen name.
    pub async fn create_default(
        &self,
        session: &AuthSession,
        display_name: Option<&str>,
    ) -> ProfileResult<ProfileRecord> {
        let mut record = ProfileRecord::default_for(&session.user);
        if let Some(name) = display_name.map(str::trim).filter(|name| !name.is_empty()) {
            record.display_name = name.to_string();
        }
        if !session.is_demo() {
            self.store
                .upsert(&record.to_row(), &session.access_token)
                .await?;
        }

        self.store_cached(session.user_id(), Some(record.clone()));
        Ok(record)
    }

    /// Forget the user's cached profile. A fetch already in flight still
    /// completes but its result is not kept.
    pub fn invalidate(&self, user_id: &str) {
        self.cache.lock().remove(user_id);
    }

    /// Drop every cached profile (logout).
    pub fn clear(&self) {
        self.cache.lock().clear();
    }

    fn cached(&self, user_id: &str) -> Option<ProfileRecord> {
        self.cache
            .lock()
            .get(user_id)
            .and_then(|slot| slot.get().cloned())
            .flatten()
    }

    fn slot(&self, user_id: &str) -> Slot {
        Arc::clone(self.cache.lock().entry(user_id.to_string()).or_default())
    }

    fn store_cached(&self, user_id: &str, entry: CacheEntry) {
        self.cache
            .lock()
            .insert(user_id.to_string(), Arc::new(OnceCell::from(entry)));
    }

    async fn fetch_remote(&self, session: &AuthSession) -> ProfileResult<CacheEntry> {
        let user = &session.user;
        match self.store.fetch(&user.id, &session.access_token).await? {
            Some(row) => Ok(Some(ProfileRecord::from_row(row, user))),
            None => {
                info!(user_id = %user.id, "No profile row, creating default");
                let defaults = ProfileRecord::default_for(user);
                if let Err(e) = self
                    .store
                    .upsert(&defaults.to_row(), &session.access_token)
                    .await
                {
                    warn!(user_id = %user.id, error = %e, "Failed to create default profile");
                }
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProfileError;
    use crate::record::ProfileRow;
    use async_trait::async_trait;
    use chrono::{Duration, Utc};
    use hogflix_auth::{AuthUser, SessionOrigin};
    use serde_json::{Map, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn session(user_id: &str, origin: SessionOrigin) -> AuthSession {
        AuthSession {
            access_token: "at".to_string(),
            refresh_token: None,
            expires_at: Utc::now() + Duration::hours(1),
            user: AuthUser::new(user_id, Some(format!("{user_id}@hogflix.dev"))),
            origin,
        }
    }

    #[derive(Default)]
    struct FakeStore {
        rows: parking_lot::Mutex<Vec<ProfileRow>>,
        fetches: AtomicUsize,
        upserts: AtomicUsize,
        fail: bool,
        /// Fetches for `slow` wait for a permit.
        gate: Option<Arc<tokio::sync::Notify>>,
    }

    #[async_trait]
    impl ProfileStore for FakeStore {
        async fn fetch(&self, user_id: &str, _token: &str) -> ProfileResult<Option<ProfileRow>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if let (Some(gate), "slow") = (&self.gate, user_id) {
                gate.notified().await;
            }
            if self.fail {
                return Err(ProfileError::Supabase {
                    status: 500,
                    message: "boom".to_string(),
                });
            }
            Ok(self.rows.lock().iter().find(|r| r.id == user_id).cloned())
        }

        async fn upsert(&self, row: &ProfileRow, _token: &str) -> ProfileResult<()> {
            self.upserts.fetch_add(1, Ordering::SeqCst);
            let mut rows = self.rows.lock();
            rows.retain(|r| r.id != row.id);
            rows.push(row.clone());
            Ok(())
        }

        async fn update(
            &self,
            user_id: &str,
            patch: &Map<String, Value>,
            _token: &str,
        ) -> ProfileResult<ProfileRow> {
            let mut rows = self.rows.lock();
            let row = rows
                .iter_mut()
                .find(|r| r.id == user_id)
                .ok_or_else(|| ProfileError::NotFound(user_id.to_string()))?;
            if let Some(name) = patch.get("name").and_then(Value::as_str) {
                row.name = Some(name.to_string());
            }
            if let Some(language) = patch.get("language").and_then(Value::as_str) {
                row.language = Some(language.to_string());
            }
            Ok(row.clone())
        }
    }

    fn row(id: &str, name: &str) -> ProfileRow {
        ProfileRow {
            id: id.to_string(),
            name: Some(name.to_string()),
            avatar_url: None,
            language: Some("en".to_string()),
            is_kids: Some(false),
            email: None,
        }
    }

    #[tokio::test]
    async fn test_fetch_is_cached_per_user() {
        let store = Arc::new(FakeStore::default());
        store.rows.lock().push(row("u1", "Jane"));
        let fetcher = ProfileFetcher::new(store.clone());
        let s = session("u1", SessionOrigin::Remote);

        assert_eq!(fetcher.fetch(&s).await.unwrap().display_name, "Jane");
        assert_eq!(fetcher.fetch(&s).await.unwrap().display_name, "Jane");
        assert_eq!(store.fetches.load(Ordering::SeqCst), 1);

        store.rows.lock()[0].name = Some("Janet".to_string());
        assert_eq!(fetcher.refresh(&s).await.unwrap().display_name, "Janet");
        assert_eq!(store.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_slow_fetch_is_shared_and_blocks_nobody_else() {
        let gate = Arc::new(tokio::sync::Notify::new());
        let store = Arc::new(FakeStore {
            gate: Some(gate.clone()),
            ..Default::default()
        });
        store.rows.lock().push(row("slow", "Jane"));
        store.rows.lock().push(row("fast", "Bob"));
        let fetcher = Arc::new(ProfileFetcher::new(store.clone()));

        let spawn_slow = || {
            let fetcher = Arc::clone(&fetcher);
            tokio::spawn(async move { fetcher.fetch(&session("slow", SessionOrigin::Remote)).await })
        };
        let first = spawn_slow();
        let second = spawn_slow();
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(store.fetches.load(Ordering::SeqCst), 1);

        // Another user and a logout-style clear go through while "slow" is pending.
        let fast = fetcher.fetch(&session("fast", SessionOrigin::Remote)).await;
        assert_eq!(fast.unwrap().display_name, "Bob");
        fetcher.clear();

        gate.notify_one();
        assert_eq!(first.await.unwrap().unwrap().display_name, "Jane");
        assert_eq!(second.await.unwrap().unwrap().display_name, "Jane");
        assert_eq!(store.fetches.load(Ordering::SeqCst), 2);
        assert!(fetcher.cached("slow").is_none());
    }

    #[tokio::test]
    async fn test_missing_row_creates_default_and_returns_none() {
        let store = Arc::new(FakeStore::default());
        let fetcher = ProfileFetcher::new(store.clone());
        let s = session("u2", SessionOrigin::Remote);

        assert!(fetcher.fetch(&s).await.is_none());
        assert_eq!(store.upserts.load(Ordering::SeqCst), 1);
        let created = store.rows.lock()[0].clone();
        assert_eq!(created.name.as_deref(), Some("u2"));

        assert_eq!(fetcher.resolve(&s).await.display_name, "u2");
    }

    #[tokio::test]
    async fn test_errors_are_treated_as_no_profile_and_not_cached() {
        let store = Arc::new(FakeStore {
            fail: true,
            ..Default::default()
        });
        let fetcher = ProfileFetcher::new(store.clone());
        let s = session("u3", SessionOrigin::Remote);

        assert!(fetcher.fetch(&s).await.is_none());
        assert!(fetcher.fetch(&s).await.is_none());
        assert_eq!(store.fetches.load(Ordering::SeqCst), 2);
        assert_eq!(fetcher.resolve(&s).await.display_name, "u3");
    }

    #[tokio::test]
    async fn test_demo_sessions_never_hit_the_store() {
        let store = Arc::new(FakeStore::default());
        let fetcher = ProfileFetcher::new(store.clone());
        let s = session("demo-abc", SessionOrigin::Demo);

        assert!(fetcher.fetch(&s).await.is_none());
        let updated = fetcher
            .update(
                &s,
                &ProfileUpdate {
                    display_name: Some("Demo Viewer".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.display_name, "Demo Viewer");
        assert_eq!(fetcher.resolve(&s).await.display_name, "Demo Viewer");
        assert_eq!(store.fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_update_patches_and_refreshes_cache() {
        let store = Arc::new(FakeStore::default());
        store.rows.lock().push(row("u4", "Old"));
        let fetcher = ProfileFetcher::new(store.clone());
        let s = session("u4", SessionOrigin::Remote);

        let updated = fetcher
            .update(
                &s,
                &ProfileUpdate {
                    display_name: Some("New".to_string()),
                    language: Some("pt-BR".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.display_name, "New");
        assert_eq!(updated.language, "pt-BR");
        assert_eq!(fetcher.fetch(&s).await.unwrap().display_name, "New");
        assert_eq!(store.fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_create_default_uses_chosen_name() {
        let store = Arc::new(FakeStore::default());
        let fetcher = ProfileFetcher::new(store.clone());
        let s = session("u6", SessionOrigin::Remote);

        let record = fetcher.create_default(&s, Some(" Jane ")).await.unwrap();
        assert_eq!(record.display_name, "Jane");
        assert_eq!(store.rows.lock()[0].name.as_deref(), Some("Jane"));
        assert_eq!(fetcher.fetch(&s).await.unwrap().display_name, "Jane");
        assert_eq!(store.fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_update_rejects_invalid_input() {
        let fetcher = ProfileFetcher::new(Arc::new(FakeStore::default()));
        let s = session("u5", SessionOrigin::Remote);
        let result = fetcher
            .update(
                &s,
                &ProfileUpdate {
                    display_name: Some(String::new()),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(result, Err(ProfileError::Validation(_))));
    }
}
