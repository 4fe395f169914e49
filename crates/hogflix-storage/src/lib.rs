//! Injected key-value storage for the Hogflix client.
//!
//! This crate provides:
//! - [`KeyValueStore`], the capability every persisted cache is written against
//! - [`MemoryStorage`] for tests and ephemeral sessions
//! - [`JsonFileStorage`], a file-backed stand-in for browser local storage
//! - typed JSON helpers ([`read_json`], [`write_json`])

mod file;
mod keys;
mod memory;
mod traits;

pub use file::JsonFileStorage;
pub use keys::StorageKeys;
pub use memory::MemoryStorage;
pub use traits::KeyValueStore;

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

/// Shared, thread-safe handle to a store.
pub type SharedStore = Arc<dyn KeyValueStore>;

/// Error type for storage operations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Encoding/decoding error
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Read and deserialize a JSON value.
pub fn read_json<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> StorageResult<Option<T>> {
    match store.get(key)? {
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| StorageError::Encoding(format!("{}: {}", key, e))),
        None => Ok(None),
    }
}

/// Serialize and store a JSON value.
pub fn write_json<T: Serialize + ?Sized>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
) -> StorageResult<()> {
    let raw = serde_json::to_string(value).map_err(|e| StorageError::Encoding(e.to_string()))?;
    store.set(key, &raw)
}

/// Create an in-memory shared store.
pub fn memory_store() -> SharedStore {
    Arc::new(MemoryStorage::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        id: String,
        count: u32,
    }

    #[test]
    fn test_memory_storage() {
        let storage = MemoryStorage::new();

        storage.set("test_key", "test_value").unwrap();
        assert_eq!(
            storage.get("test_key").unwrap(),
            Some("test_value".to_string())
        );

        assert!(storage.has("test_key").unwrap());
        assert!(!storage.has("nonexistent").unwrap());

        assert!(storage.delete("test_key").unwrap());
        assert!(!storage.delete("test_key").unwrap());
        assert_eq!(storage.get("test_key").unwrap(), None);
        assert!(storage.is_empty());
    }

    #[test]
    fn test_list_keys_with_prefix() {
        let storage = MemoryStorage::new();
        storage.set(&StorageKeys::rate_limit("signup"), "[]").unwrap();
        storage.set(&StorageKeys::rate_limit("login"), "[]").unwrap();
        storage.set(StorageKeys::DEMO_MODE, "true").unwrap();

        let mut keys = storage
            .list_keys_with_prefix(StorageKeys::RATE_LIMIT_PREFIX)
            .unwrap();
        keys.sort();
        assert_eq!(keys, vec!["rateLimit_login", "rateLimit_signup"]);
    }

    #[test]
    fn test_json_helpers() {
        let store = memory_store();
        let sample = Sample {
            id: "a".to_string(),
            count: 2,
        };

        write_json(store.as_ref(), "sample", &sample).unwrap();
        let loaded: Option<Sample> = read_json(store.as_ref(), "sample").unwrap();
        assert_eq!(loaded, Some(sample));

        let missing: Option<Sample> = read_json(store.as_ref(), "missing").unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn test_read_json_reports_corrupt_values() {
        let store = memory_store();
        store.set("sample", "not json").unwrap();

        let result: StorageResult<Option<Sample>> = read_json(store.as_ref(), "sample");
        assert!(matches!(result, Err(StorageError::Encoding(_))));
    }

    #[test]
    fn test_storage_keys_constants() {
        let keys = [
            StorageKeys::DEMO_SESSION,
            StorageKeys::DEMO_MODE,
            StorageKeys::AUTH_SESSION,
            StorageKeys::ANALYTICS_EMAIL_CACHE,
            StorageKeys::ANALYTICS_LAST_IDENTIFIED_USER,
        ];
        let unique: std::collections::HashSet<_> = keys.iter().collect();
        assert_eq!(unique.len(), keys.len(), "Storage keys must be unique");
        assert_eq!(StorageKeys::rate_limit("signup"), "rateLimit_signup");
    }
}
