//! Stock ledger: FIFO dispensing and administrative bulk operations

use std::collections::HashSet;
use std::sync::Arc;

use crate::error::{ShopError, ShopResult};
use crate::locks::KeyedLocks;
use crate::stock::{AddKeysOutcome, BucketKey, RemoveOutcome, StockSummary};
use crate::store::LedgerStore;

/// Mutations of one bucket run under that bucket's lock
#[derive(Clone)]
pub struct StockLedger {
    store: Arc<LedgerStore>,
    locks: Arc<KeyedLocks<BucketKey>>,
}

impl StockLedger {
    pub fn new(store: Arc<LedgerStore>, locks: Arc<KeyedLocks<BucketKey>>) -> Self {
        Self { store, locks }
    }

    pub fn locks(&self) -> &Arc<KeyedLocks<BucketKey>> {
        &self.locks
    }

    /// Remove and return the oldest key of the bucket, `None` when empty
    pub async fn take(&self, bucket: &BucketKey) -> ShopResult<Option<String>> {
        let _guard = self.locks.lock(bucket).await;
        self.take_locked(bucket).await
    }

    /// Size of the bucket. Advisory only, it may change before any `take`.
    pub async fn count(&self, bucket: &BucketKey) -> ShopResult<usize> {
        self.store.stock.view(|book| book.count(bucket)).await
    }

    /// Append keys to the tail. Keys already in the bucket, repeated within
    /// the batch, or blank are dropped and counted as duplicates.
    pub async fn add_many(&self, bucket: &BucketKey, keys: Vec<String>) -> ShopResult<AddKeysOutcome> {
        let _guard = self.locks.lock(bucket).await;
        self.add_many_locked(bucket, keys).await
    }

    /// Drop up to `n` keys from the head
    pub async fn remove_n(&self, bucket: &BucketKey, n: usize) -> ShopResult<RemoveOutcome> {
        let _guard = self.locks.lock(bucket).await;
        let key = bucket.clone();
        let outcome = self
            .store
            .stock
            .update(move |book| {
                let Some(keys) = book.bucket_mut(&key) else {
                    return Ok(RemoveOutcome {
                        removed: 0,
                        remaining: 0,
                    });
                };
                let removed = n.min(keys.len());
                keys.drain(..removed);
                Ok(RemoveOutcome {
                    removed,
                    remaining: keys.len(),
                })
            })
            .await?;

        tracing::info!(bucket = %bucket, removed = outcome.removed, remaining = outcome.remaining, "Stock removed");
        Ok(outcome)
    }

    /// Empty one duration of a product, or all of them when `duration` is
    /// `None`. Returns the number of keys discarded.
    pub async fn clear(&self, category: &str, product: &str, duration: Option<&str>) -> ShopResult<usize> {
        let durations = match duration {
            Some(d) => vec![d.to_string()],
            None => {
                self.store
                    .stock
                    .view(|book| book.durations(category, product))
                    .await?
            }
        };

        let mut cleared = 0;
        // one bucket at a time, each under its own lock
        for duration in durations {
            let bucket = BucketKey::new(category, product, duration);
            let _guard = self.locks.lock(&bucket).await;
            let key = bucket.clone();
            cleared += self
                .store
                .stock
                .update(move |book| {
                    Ok(book
                        .bucket_mut(&key)
                        .map(|keys| {
                            let n = keys.len();
                            keys.clear();
                            n
                        })
                        .unwrap_or(0))
                })
                .await?;
        }

        tracing::info!(category, product, duration = ?duration, cleared, "Stock cleared");
        Ok(cleared)
    }

    pub async fn summary(&self) -> ShopResult<StockSummary> {
        self.store
            .stock
            .view(|book| StockSummary {
                stock: book.counts(),
                total_keys: book.total(),
            })
            .await
    }

    /// Keys currently waiting in the bucket
    pub(crate) async fn keys_in(&self, bucket: &BucketKey) -> ShopResult<HashSet<String>> {
        self.store
            .stock
            .view(|book| {
                book.bucket(bucket)
                    .map(|keys| keys.iter().cloned().collect())
                    .unwrap_or_default()
            })
            .await
    }

    /// Caller holds the bucket lock
    pub(crate) async fn take_locked(&self, bucket: &BucketKey) -> ShopResult<Option<String>> {
        if self.count(bucket).await? == 0 {
            return Ok(None);
        }
        let key = bucket.clone();
        let taken = self
            .store
            .stock
            .update(move |book| Ok(book.bucket_mut(&key).and_then(|keys| keys.pop_front())))
            .await?;

        if taken.is_some() {
            tracing::debug!(bucket = %bucket, "Key dispensed from stock");
        }
        Ok(taken)
    }

    /// Caller holds the bucket lock
    pub(crate) async fn add_many_locked(
        &self,
        bucket: &BucketKey,
        keys: Vec<String>,
    ) -> ShopResult<AddKeysOutcome> {
        if bucket.category.trim().is_empty()
            || bucket.product.trim().is_empty()
            || bucket.duration.trim().is_empty()
        {
            return Err(ShopError::validation(
                "Category, product and duration are required",
            ));
        }

        let key = bucket.clone();
        let outcome = self
            .store
            .stock
            .update(move |book| {
                let queue = book.bucket_entry(&key);
                let mut present: HashSet<String> = queue.iter().cloned().collect();
                let offered = keys.len();
                let mut added = 0;

                for candidate in keys {
                    let candidate = candidate.trim().to_string();
                    if candidate.is_empty() || !present.insert(candidate.clone()) {
                        continue;
                    }
                    queue.push_back(candidate);
                    added += 1;
                }

                Ok(AddKeysOutcome {
                    added,
                    duplicates: offered - added,
                    total: queue.len(),
                })
            })
            .await?;

        if outcome.duplicates > 0 {
            tracing::warn!(bucket = %bucket, duplicates = outcome.duplicates, "Duplicate keys rejected");
        }
        tracing::info!(bucket = %bucket, added = outcome.added, total = outcome.total, "Stock added");
        Ok(outcome)
    }
}
