//! Supabase Storage client for one bucket.

use crate::error::{MediaError, MediaResult};
use async_trait::async_trait;
use hogflix_config::Config;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{debug, error, info};

/// Page size for list requests.
const LIST_LIMIT: u32 = 1000;

#[derive(Debug, Serialize)]
struct ListRequest<'a> {
    prefix: &'a str,
    limit: u32,
    offset: u32,
    #[serde(rename = "sortBy")]
    sort_by: SortBy,
}

#[derive(Debug, Serialize)]
struct SortBy {
    column: &'static str,
    order: &'static str,
}

/// Entry returned by the list endpoint. Folders have no `id`.
#[derive(Debug, Deserialize)]
struct ListEntry {
    name: String,
    #[serde(default)]
    id: Option<String>,
}

/// Object storage as the app uses it.
#[async_trait]
pub trait MediaStore: Send + Sync {
    /// Store `bytes` at `path` and return the object's public URL.
    async fn upload(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
        access_token: &str,
    ) -> MediaResult<String>;

    /// Public URLs of every object under `prefix`.
    async fn list(&self, prefix: &str, access_token: &str) -> MediaResult<Vec<String>>;
}

#[derive(Clone)]
pub struct StorageClient {
    http_client: reqwest::Client,
    api_url: String,
    anon_key: String,
    bucket: String,
}

impl StorageClient {
    pub fn new(
        api_url: impl Into<String>,
        anon_key: impl Into<String>,
        bucket: impl Into<String>,
    ) -> Self {
        let api_url: String = api_url.into();
        Self {
            http_client: reqwest::Client::new(),
            api_url: api_url.trim_end_matches('/').to_string(),
            anon_key: anon_key.into(),
            bucket: bucket.into(),
        }
    }

    pub fn from_config(config: &Config) -> MediaResult<Self> {
        let url = config.supabase_url()?;
        Ok(Self::new(
            url.as_str(),
            config.supabase_anon_key.clone(),
            config.storage_bucket.clone(),
        ))
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Public URL of an object in this bucket.
    pub fn public_url(&self, path: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.api_url,
            self.bucket,
            path.trim_start_matches('/')
        )
    }

    /// Upload (or overwrite) an object and return its public URL.
    pub async fn upload(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
        access_token: &str,
    ) -> MediaResult<String> {
        let path = normalize_path(path)?;
        let url = format!(
            "{}/storage/v1/object/{}/{}",
            self.api_url, self.bucket, path
        );
        let size = bytes.len();
        debug!(path = %path, size, content_type, "Uploading object");

        let response = self
            .http_client
            .post(&url)
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {}", access_token))
            .header("Content-Type", content_type)
            .header("x-upsert", "true")
            .body(bytes)
            .send()
            .await?;
        check_response(response).await?;

        info!(path = %path, size, "Object uploaded");
        Ok(self.public_url(&path))
    }

    /// Public URLs of every object under `prefix`, descending into folders.
    pub async fn list(&self, prefix: &str, access_token: &str) -> MediaResult<Vec<String>> {
        let mut urls = Vec::new();
        let mut pending = VecDeque::from([prefix.trim_matches('/').to_string()]);

        while let Some(folder) = pending.pop_front() {
            for entry in self.list_folder(&folder, access_token).await? {
                let child = join_path(&folder, &entry.name);
                if entry.id.is_none() {
                    pending.push_back(child);
                } else {
                    urls.push(self.public_url(&child));
                }
            }
        }

        debug!(prefix, count = urls.len(), "Listed objects");
        Ok(urls)
    }

    async fn list_folder(&self, folder: &str, access_token: &str) -> MediaResult<Vec<ListEntry>> {
        let url = format!("{}/storage/v1/object/list/{}", self.api_url, self.bucket);
        let body = ListRequest {
            prefix: folder,
            limit: LIST_LIMIT,
            offset: 0,
            sort_by: SortBy {
                column: "name",
                order: "asc",
            },
        };

        let response = self
            .http_client
            .post(&url)
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {}", access_token))
            .json(&body)
            .send()
            .await?;
        let response = check_response(response).await?;
        Ok(response.json().await?)
    }
}

#[async_trait]
impl MediaStore for StorageClient {
    async fn upload(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
        access_token: &str,
    ) -> MediaResult<String> {
        StorageClient::upload(self, path, bytes, content_type, access_token).await
    }

    async fn list(&self, prefix: &str, access_token: &str) -> MediaResult<Vec<String>> {
        StorageClient::list(self, prefix, access_token).await
    }
}

impl std::fmt::Debug for StorageClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageClient")
            .field("api_url", &self.api_url)
            .field("bucket", &self.bucket)
            .finish_non_exhaustive()
    }
}

async fn check_response(response: reqwest::Response) -> MediaResult<reqwest::Response> {
    if !response.status().is_success() {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        error!("Storage request failed: {} - {}", status, body);
        return Err(MediaError::Storage {
            status,
            message: body,
        });
    }
    Ok(response)
}

fn normalize_path(path: &str) -> MediaResult<String> {
    let trimmed = path.trim().trim_matches('/');
    if trimmed.is_empty() || trimmed.split('/').any(|seg| seg.is_empty() || seg == "..") {
        return Err(MediaError::InvalidPath(path.to_string()));
    }
    Ok(trimmed.to_string())
}

fn join_path(folder: &str, name: &str) -> String {
    if folder.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", folder, name)
    }
}
