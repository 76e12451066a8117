//! Storage backends for ledger collections
//!
//! A backend only knows how to load and save a whole named collection as a
//! JSON document. Caching, coalescing and retries live in the store above it.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::RwLock;
use thiserror::Error;

use crate::error::ShopError;

/// Backend-level failures
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Backend unavailable: {0}")]
    Unavailable(String),
}

impl From<StoreError> for ShopError {
    fn from(err: StoreError) -> Self {
        ShopError::Persistence(err.to_string())
    }
}

/// Read/write contract every persistence mechanism must satisfy
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Load a collection, `None` when it has never been written
    async fn load(&self, collection: &str) -> Result<Option<Value>, StoreError>;

    /// Replace a collection with `body`
    async fn save(&self, collection: &str, body: &Value) -> Result<(), StoreError>;

    fn describe(&self) -> String;
}

/// One pretty-printed `<collection>.json` file per collection
pub struct FileBackend {
    dir: PathBuf,
}

impl FileBackend {
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    fn path_for(&self, collection: &str) -> PathBuf {
        self.dir.join(format!("{}.json", collection))
    }
}

#[async_trait]
impl StorageBackend for FileBackend {
    async fn load(&self, collection: &str) -> Result<Option<Value>, StoreError> {
        match tokio::fs::read(self.path_for(collection)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, collection: &str, body: &Value) -> Result<(), StoreError> {
        let target = self.path_for(collection);
        let tmp = self.dir.join(format!(".{}.json.tmp", collection));
        let bytes = serde_json::to_vec_pretty(body)?;
        tokio::fs::write(&tmp, &bytes).await?;
        // rename is atomic on the same filesystem, readers never see a torn file
        tokio::fs::rename(&tmp, &target).await?;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("file:{}", self.dir.display())
    }
}

/// In-process backend used by tests and ephemeral deployments
#[derive(Default)]
pub struct MemoryBackend {
    collections: RwLock<HashMap<String, Value>>,
    failing_saves: AtomicU32,
    failing_loads: AtomicU32,
    saves: AtomicU64,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` saves fail with an I/O error
    pub fn fail_next_saves(&self, n: u32) {
        self.failing_saves.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` loads fail with an I/O error
    pub fn fail_next_loads(&self, n: u32) {
        self.failing_loads.store(n, Ordering::SeqCst);
    }

    /// Number of successful saves so far
    pub fn save_count(&self) -> u64 {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self, collection: &str) -> Option<Value> {
        self.collections
            .read()
            .ok()
            .and_then(|map| map.get(collection).cloned())
    }

    pub fn insert(&self, collection: &str, body: Value) {
        if let Ok(mut map) = self.collections.write() {
            map.insert(collection.to_string(), body);
        }
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn load(&self, collection: &str) -> Result<Option<Value>, StoreError> {
        if Self::take_failure(&self.failing_loads) {
            return Err(StoreError::Io(std::io::Error::new(
                ErrorKind::Other,
                "injected load failure",
            )));
        }
        let map = self
            .collections
            .read()
            .map_err(|_| StoreError::Unavailable("memory backend poisoned".to_string()))?;
        Ok(map.get(collection).cloned())
    }

    async fn save(&self, collection: &str, body: &Value) -> Result<(), StoreError> {
        if Self::take_failure(&self.failing_saves) {
            return Err(StoreError::Io(std::io::Error::new(
                ErrorKind::Other,
                "injected save failure",
            )));
        }
        let mut map = self
            .collections
            .write()
            .map_err(|_| StoreError::Unavailable("memory backend poisoned".to_string()))?;
        map.insert(collection.to_string(), body.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_file_backend_missing_collection_is_none() {
        let dir = std::env::temp_dir().join(format!("keyshop-{}", uuid::Uuid::new_v4()));
        let backend = FileBackend::open(&dir).await.unwrap();
        assert!(backend.load("users").await.unwrap().is_none());
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn test_file_backend_save_then_load() {
        let dir = std::env::temp_dir().join(format!("keyshop-{}", uuid::Uuid::new_v4()));
        let backend = FileBackend::open(&dir).await.unwrap();

        backend.save("promo_codes", &json!([{"code": "WELCOME"}])).await.unwrap();
        let loaded = backend.load("promo_codes").await.unwrap().unwrap();
        assert_eq!(loaded[0]["code"], "WELCOME");
        assert!(!dir.join(".promo_codes.json.tmp").exists());

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn test_memory_backend_injected_failures() {
        let backend = MemoryBackend::new();
        backend.fail_next_saves(1);

        assert!(backend.save("stock", &json!({})).await.is_err());
        assert!(backend.save("stock", &json!({})).await.is_ok());
        assert_eq!(backend.save_count(), 1);

        backend.fail_next_loads(1);
        assert!(backend.load("stock").await.is_err());
        assert_eq!(backend.load("stock").await.unwrap(), Some(json!({})));
    }
}
