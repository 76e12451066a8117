//! Read-through cached collection backed by a `StorageBackend`

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Notify};

use crate::error::{ShopError, ShopResult};
use crate::store::backend::StorageBackend;
use crate::store::retry::RetryPolicy;

struct Cached<T> {
    data: T,
    loaded_at: Instant,
    dirty: bool,
    version: u64,
}

/// A named collection persisted as one JSON document.
///
/// Reads are served from memory while the entry is dirty or younger than the
/// TTL. Writes replace the cached value and are persisted later by a flush.
pub struct Collection<T> {
    name: &'static str,
    backend: Arc<dyn StorageBackend>,
    ttl: Duration,
    retry: RetryPolicy,
    state: Mutex<Option<Cached<T>>>,
    flush_lock: Mutex<()>,
    notify: Arc<Notify>,
}

impl<T> Collection<T>
where
    T: Clone + Default + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn new(
        name: &'static str,
        backend: Arc<dyn StorageBackend>,
        ttl: Duration,
        retry: RetryPolicy,
        notify: Arc<Notify>,
    ) -> Self {
        Self {
            name,
            backend,
            ttl,
            retry,
            state: Mutex::new(None),
            flush_lock: Mutex::new(()),
            notify,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    async fn load_from_backend(&self) -> ShopResult<T> {
        match self.backend.load(self.name).await? {
            Some(body) => serde_json::from_value(body).map_err(|e| {
                ShopError::Persistence(format!("Corrupt collection '{}': {}", self.name, e))
            }),
            None => Ok(T::default()),
        }
    }

    /// Bring the cache up to date. Caller holds the state lock.
    async fn refresh(&self, slot: &mut Option<Cached<T>>) -> ShopResult<()> {
        if let Some(cached) = slot.as_ref() {
            if cached.dirty || cached.loaded_at.elapsed() < self.ttl {
                return Ok(());
            }
        }

        match self.load_from_backend().await {
            Ok(data) => {
                let version = slot.as_ref().map(|c| c.version).unwrap_or(0);
                *slot = Some(Cached {
                    data,
                    loaded_at: Instant::now(),
                    dirty: false,
                    version,
                });
                Ok(())
            }
            Err(err) if slot.is_some() => {
                tracing::warn!(
                    collection = self.name,
                    error = %err,
                    "Reload failed, serving last known good data"
                );
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Get-or-default read of the whole collection
    pub async fn read(&self) -> ShopResult<T> {
        self.view(|data| data.clone()).await
    }

    /// Run `f` against the current value without cloning it
    pub async fn view<R>(&self, f: impl FnOnce(&T) -> R) -> ShopResult<R> {
        let mut slot = self.state.lock().await;
        self.refresh(&mut slot).await?;
        match slot.as_ref() {
            Some(cached) => Ok(f(&cached.data)),
            None => Err(ShopError::Persistence(format!(
                "Collection '{}' unavailable",
                self.name
            ))),
        }
    }

    /// Read-modify-write. `f` works on a copy; the cache only changes when it
    /// returns `Ok`.
    pub async fn update<R>(&self, f: impl FnOnce(&mut T) -> ShopResult<R>) -> ShopResult<R> {
        let mut slot = self.state.lock().await;
        self.refresh(&mut slot).await?;
        let cached = slot.as_mut().ok_or_else(|| {
            ShopError::Persistence(format!("Collection '{}' unavailable", self.name))
        })?;

        let mut working = cached.data.clone();
        let out = f(&mut working)?;

        cached.data = working;
        cached.dirty = true;
        cached.version += 1;
        drop(slot);

        self.notify.notify_one();
        Ok(out)
    }

    /// Persist the cached value if it has unsaved changes.
    ///
    /// Returns `Ok(true)` when something was written.
    pub async fn flush(&self) -> ShopResult<bool> {
        let _flushing = self.flush_lock.lock().await;

        let (body, version) = {
            let slot = self.state.lock().await;
            match slot.as_ref() {
                Some(cached) if cached.dirty => {
                    let body = serde_json::to_value(&cached.data).map_err(|e| {
                        ShopError::Persistence(format!("Encode '{}': {}", self.name, e))
                    })?;
                    (body, cached.version)
                }
                _ => return Ok(false),
            }
        };

        let backend = &self.backend;
        let name = self.name;
        let body = &body;
        let saved = self
            .retry
            .retry_async(move |_| async move { backend.save(name, body).await })
            .await;

        if let Err(err) = saved {
            tracing::error!(
                collection = self.name,
                error = %err,
                "Write retries exhausted, collection stays dirty"
            );
            return Err(err.into());
        }

        let mut slot = self.state.lock().await;
        if let Some(cached) = slot.as_mut() {
            if cached.version == version {
                cached.dirty = false;
                cached.loaded_at = Instant::now();
            }
        }
        tracing::debug!(collection = self.name, version, "Collection flushed");
        Ok(true)
    }

    pub async fn is_dirty(&self) -> bool {
        self.state
            .lock()
            .await
            .as_ref()
            .map(|c| c.dirty)
            .unwrap_or(false)
    }
}

/// Object-safe view over collections of any element type
#[async_trait]
pub trait Flushable: Send + Sync {
    fn collection_name(&self) -> &'static str;
    async fn flush_dirty(&self) -> ShopResult<bool>;
    async fn has_pending_writes(&self) -> bool;
}

#[async_trait]
impl<T> Flushable for Collection<T>
where
    T: Clone + Default + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn collection_name(&self) -> &'static str {
        self.name
    }

    async fn flush_dirty(&self) -> ShopResult<bool> {
        self.flush().await
    }

    async fn has_pending_writes(&self) -> bool {
        self.is_dirty().await
    }
}
