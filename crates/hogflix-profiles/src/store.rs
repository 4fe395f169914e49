//! Profile persistence: the `ProfileStore` seam and its Supabase REST client.

use crate::error::{ProfileError, ProfileResult};
use crate::record::ProfileRow;
use async_trait::async_trait;
use hogflix_config::Config;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, error};

const PROFILES_TABLE: &str = "profiles";

#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Row for `user_id`, or `None` when no row exists.
    async fn fetch(&self, user_id: &str, access_token: &str) -> ProfileResult<Option<ProfileRow>>;

    /// Insert or merge a full row.
    async fn upsert(&self, row: &ProfileRow, access_token: &str) -> ProfileResult<()>;

    /// Patch columns of an existing row and return the updated row.
    async fn update(
        &self,
        user_id: &str,
        patch: &Map<String, Value>,
        access_token: &str,
    ) -> ProfileResult<ProfileRow>;
}

/// PostgREST client for the `profiles` table.
#[derive(Clone)]
pub struct SupabaseProfileStore {
    http_client: reqwest::Client,
    api_url: String,
    anon_key: String,
}

impl SupabaseProfileStore {
    /// # Arguments
    /// * `api_url` - The Supabase project API URL (e.g., `https://xyz.supabase.co`)
    /// * `anon_key` - The Supabase anonymous API key
    pub fn new(api_url: impl Into<String>, anon_key: impl Into<String>) -> Self {
        let api_url: String = api_url.into();
        Self {
            http_client: reqwest::Client::new(),
            api_url: api_url.trim_end_matches('/').to_string(),
            anon_key: anon_key.into(),
        }
    }

    pub fn from_config(config: &Config) -> ProfileResult<Self> {
        let url = config.supabase_url()?;
        Ok(Self::new(url.as_str(), config.supabase_anon_key.clone()))
    }

    fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.api_url, table)
    }

    fn row_url(&self, user_id: &str) -> String {
        format!("{}?id=eq.{}", self.rest_url(PROFILES_TABLE), user_id)
    }

    async fn check_response(&self, response: reqwest::Response) -> ProfileResult<reqwest::Response> {
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            error!("Supabase profile request failed: {} - {}", status, body);
            return Err(ProfileError::Supabase {
                status,
                message: body,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl ProfileStore for SupabaseProfileStore {
    async fn fetch(&self, user_id: &str, access_token: &str) -> ProfileResult<Option<ProfileRow>> {
        let url = format!("{}&select=*", self.row_url(user_id));
        debug!(user_id, "Fetching profile");

        let response = self
            .http_client
            .get(&url)
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {}", access_token))
            .send()
            .await?;
        let response = self.check_response(response).await?;

        let rows: Vec<ProfileRow> = response.json().await?;
        Ok(rows.into_iter().next())
    }

    async fn upsert(&self, row: &ProfileRow, access_token: &str) -> ProfileResult<()> {
        debug!(user_id = %row.id, "Upserting profile");
        upsert_json(self, &self.rest_url(PROFILES_TABLE), row, access_token).await
    }

    async fn update(
        &self,
        user_id: &str,
        patch: &Map<String, Value>,
        access_token: &str,
    ) -> ProfileResult<ProfileRow> {
        debug!(user_id, fields = patch.len(), "Updating profile");

        let response = self
            .http_client
            .patch(self.row_url(user_id))
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {}", access_token))
            .header("Content-Type", "application/json")
            .header("Prefer", "return=representation")
            .json(patch)
            .send()
            .await?;
        let response = self.check_response(response).await?;

        let rows: Vec<ProfileRow> = response.json().await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| ProfileError::NotFound(user_id.to_string()))
    }
}

/// POST with merge-duplicates.
async fn upsert_json<T: Serialize + ?Sized>(
    store: &SupabaseProfileStore,
    url: &str,
    body: &T,
    access_token: &str,
) -> ProfileResult<()> {
    let response = store
        .http_client
        .post(url)
        .header("apikey", &store.anon_key)
        .header("Authorization", format!("Bearer {}", access_token))
        .header("Content-Type", "application/json")
        .header("Prefer", "resolution=merge-duplicates")
        .json(body)
        .send()
        .await?;

    store.check_response(response).await?;
    Ok(())
}

impl std::fmt::Debug for SupabaseProfileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupabaseProfileStore")
            .field("api_url", &self.api_url)
            .finish_non_exhaustive()
    }
}
