//! Ledger Store
//!
//! Durable state for users, stock, purchases, top-ups, promo codes, receipt
//! hashes and the key reset log. Each collection is cached in memory and
//! written back by a debounced flusher.

pub mod backend;
pub mod collection;
pub mod retry;

pub use backend::{FileBackend, MemoryBackend, StorageBackend, StoreError};
pub use collection::{Collection, Flushable};
pub use retry::RetryPolicy;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::coordinator::Purchase;
use crate::error::ShopResult;
use crate::promo::PromoCode;
use crate::receipt::HashRing;
use crate::resets::ResetLog;
use crate::stock::StockBook;
use crate::topup::TopupBook;
use crate::users::User;

/// Cache and write-back tuning
#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub cache_ttl: Duration,
    pub write_debounce: Duration,
    pub retry: RetryPolicy,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_millis(5_000),
            write_debounce: Duration::from_millis(100),
            retry: RetryPolicy::for_writes(5),
        }
    }
}

impl StoreSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            cache_ttl: config.cache_ttl,
            write_debounce: config.write_debounce,
            retry: RetryPolicy::for_writes(config.write_retry_attempts as usize),
        }
    }
}

/// Handle to every ledger collection
pub struct LedgerStore {
    pub users: Collection<Vec<User>>,
    pub stock: Collection<StockBook>,
    pub purchases: Collection<Vec<Purchase>>,
    pub topups: Collection<TopupBook>,
    pub promo_codes: Collection<Vec<PromoCode>>,
    pub receipt_hashes: Collection<HashRing>,
    pub reset_log: Collection<ResetLog>,
    backend: Arc<dyn StorageBackend>,
    notify: Arc<Notify>,
    write_debounce: Duration,
}

impl LedgerStore {
    pub fn new(backend: Arc<dyn StorageBackend>, settings: StoreSettings) -> Self {
        let notify = Arc::new(Notify::new());
        let ttl = settings.cache_ttl;
        let retry = settings.retry;

        Self {
            users: Collection::new("users", backend.clone(), ttl, retry.clone(), notify.clone()),
            stock: Collection::new("stock", backend.clone(), ttl, retry.clone(), notify.clone()),
            purchases: Collection::new("purchases", backend.clone(), ttl, retry.clone(), notify.clone()),
            topups: Collection::new("topups", backend.clone(), ttl, retry.clone(), notify.clone()),
            promo_codes: Collection::new("promo_codes", backend.clone(), ttl, retry.clone(), notify.clone()),
            receipt_hashes: Collection::new("receipt_hashes", backend.clone(), ttl, retry.clone(), notify.clone()),
            reset_log: Collection::new("reset_log", backend.clone(), ttl, retry, notify.clone()),
            backend,
            notify,
            write_debounce: settings.write_debounce,
        }
    }

    /// Store over a fresh `MemoryBackend`, mostly for tests
    pub fn in_memory() -> (Arc<Self>, Arc<MemoryBackend>) {
        let backend = Arc::new(MemoryBackend::new());
        let store = Arc::new(Self::new(backend.clone(), StoreSettings::default()));
        (store, backend)
    }

    pub fn describe(&self) -> String {
        self.backend.describe()
    }

    fn collections(&self) -> [&dyn Flushable; 7] {
        [
            &self.users,
            &self.stock,
            &self.purchases,
            &self.topups,
            &self.promo_codes,
            &self.receipt_hashes,
            &self.reset_log,
        ]
    }

    /// Write every dirty collection now.
    ///
    /// All collections are attempted even if one fails; the first error is
    /// returned.
    pub async fn flush(&self) -> ShopResult<usize> {
        let mut written = 0;
        let mut first_err = None;

        for collection in self.collections() {
            match collection.flush_dirty().await {
                Ok(true) => written += 1,
                Ok(false) => {}
                Err(err) => {
                    if first_err.is_none() {
                        first_err = Some(err);
                    }
                }
            }
        }

        match first_err {
            Some(err) => Err(err),
            None => Ok(written),
        }
    }

    /// Names of collections with unsaved changes
    pub async fn pending_writes(&self) -> Vec<&'static str> {
        let mut pending = Vec::new();
        for collection in self.collections() {
            if collection.has_pending_writes().await {
                pending.push(collection.collection_name());
            }
        }
        pending
    }

    /// Spawn the background write-back task.
    ///
    /// Each wakeup waits out the debounce window so bursts of updates become
    /// one save per collection. Failed collections stay dirty and the task
    /// re-arms itself.
    pub fn spawn_flusher(self: &Arc<Self>) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            tracing::info!(
                backend = %store.describe(),
                debounce_ms = store.write_debounce.as_millis() as u64,
                "Ledger flusher started"
            );
            loop {
                store.notify.notified().await;
                tokio::time::sleep(store.write_debounce).await;

                match store.flush().await {
                    Ok(0) => {}
                    Ok(written) => tracing::debug!(written, "Flushed ledger collections"),
                    Err(err) => {
                        tracing::warn!(error = %err, "Flush round incomplete, will retry");
                        store.notify.notify_one();
                    }
                }
            }
        })
    }
}
