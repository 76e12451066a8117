//! Key reset requests and the staff view of the reset log

use chrono::Utc;

use crate::coordinator::TransactionCoordinator;
use crate::error::ShopResult;
use crate::events::ShopEvent;
use crate::resets::{normalize_reset_key, ResetEntry, ResetListQuery, ResetPage, ResetStats};
use crate::users::{Actor, Capability};

impl TransactionCoordinator {
    /// Record a reset request for `key`.
    ///
    /// Always accepted for a valid key; the entry carries the bucket when the
    /// key was bought by the caller.
    pub async fn request_key_reset(&self, actor: Actor, key: &str) -> ShopResult<ResetEntry> {
        actor.require(Capability::Purchase)?;
        let key = normalize_reset_key(key)?;
        let user = self.users.get(actor.user_id).await?;

        let bucket = {
            let key = key.clone();
            self.store
                .purchases
                .view(move |purchases| {
                    purchases
                        .iter()
                        .rev()
                        .find(|p| p.user_id == actor.user_id && p.key == key)
                        .map(|p| p.bucket.clone())
                })
                .await?
        };

        let entry = self
            .store
            .reset_log
            .update(move |log| {
                Ok(log.record(user.id, user.username, key, bucket, Utc::now()))
            })
            .await?;

        tracing::info!(
            reset_id = entry.id,
            user_id = entry.user_id,
            owned = entry.bucket.is_some(),
            "Key reset requested"
        );
        self.events.publish(ShopEvent::KeyResetRequested {
            reset_id: entry.id,
            user_id: entry.user_id,
            bucket: entry.bucket.clone(),
        });
        Ok(entry)
    }

    pub async fn list_resets(&self, actor: Actor, query: ResetListQuery) -> ShopResult<ResetPage> {
        actor.require(Capability::ViewReports)?;
        self.store.reset_log.view(|log| log.page(&query)).await
    }

    pub async fn reset_stats(&self, actor: Actor) -> ShopResult<ResetStats> {
        actor.require(Capability::ViewReports)?;
        self.store.reset_log.view(|log| log.stats(Utc::now())).await
    }
}
