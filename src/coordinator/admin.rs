//! Administrative operations: stock, promo codes, users, balances

use rust_decimal::Decimal;
use std::collections::HashSet;

use crate::coordinator::{GeneratedStock, TransactionCoordinator};
use crate::error::{ShopError, ShopResult};
use crate::promo::{NewPromo, PromoCode, PromoListing, PromoUpdate};
use crate::stock::{generate_unique_keys, AddKeysOutcome, BucketKey, RemoveOutcome, StockSummary};
use crate::users::{Actor, BalanceDirection, Capability, Role, User, UserProfile};

pub const MAX_GENERATED_KEYS: usize = 1000;

impl TransactionCoordinator {
    /// Keys ever dispensed from `bucket`
    async fn dispensed_keys(&self, bucket: &BucketKey) -> ShopResult<HashSet<String>> {
        self.store
            .purchases
            .view(|purchases| {
                purchases
                    .iter()
                    .filter(|p| &p.bucket == bucket)
                    .map(|p| p.key.clone())
                    .collect()
            })
            .await
    }

    /// Generate `count` fresh keys in the product's key format
    pub async fn admin_add_stock(
        &self,
        actor: Actor,
        category: &str,
        product: &str,
        duration: &str,
        count: usize,
    ) -> ShopResult<GeneratedStock> {
        actor.require(Capability::ManageStock)?;
        if count == 0 || count > MAX_GENERATED_KEYS {
            return Err(ShopError::validation(format!(
                "Count must be between 1 and {}",
                MAX_GENERATED_KEYS
            )));
        }
        let bucket = self.catalog.resolve(category, product, duration)?;
        let format = self.catalog.key_format(&bucket.category, &bucket.product);

        let _guard = self.stock.locks().lock(&bucket).await;
        let mut existing = self.stock.keys_in(&bucket).await?;
        existing.extend(self.dispensed_keys(&bucket).await?);

        let keys = generate_unique_keys(format, &bucket.product, count, &existing)?;
        let outcome = self.stock.add_many_locked(&bucket, keys.clone()).await?;

        tracing::info!(
            admin_id = actor.user_id,
            bucket = %bucket,
            generated = keys.len(),
            total = outcome.total,
            "Stock generated"
        );
        Ok(GeneratedStock {
            bucket,
            keys,
            total: outcome.total,
        })
    }

    /// Add externally supplied keys. Keys already sold from the bucket are
    /// dropped like in-bucket duplicates.
    pub async fn import_keys(
        &self,
        actor: Actor,
        category: &str,
        product: &str,
        duration: &str,
        keys: Vec<String>,
    ) -> ShopResult<AddKeysOutcome> {
        actor.require(Capability::ManageStock)?;
        let bucket = self.catalog.resolve(category, product, duration)?;

        let _guard = self.stock.locks().lock(&bucket).await;
        let dispensed = self.dispensed_keys(&bucket).await?;
        let offered = keys.len();
        let fresh: Vec<String> = keys
            .into_iter()
            .filter(|k| !dispensed.contains(k.trim()))
            .collect();
        let resold = offered - fresh.len();

        let mut outcome = self.stock.add_many_locked(&bucket, fresh).await?;
        outcome.duplicates += resold;
        Ok(outcome)
    }

    pub async fn remove_stock(
        &self,
        actor: Actor,
        category: &str,
        product: &str,
        duration: &str,
        count: usize,
    ) -> ShopResult<RemoveOutcome> {
        actor.require(Capability::ManageStock)?;
        let bucket = self.catalog.resolve(category, product, duration)?;
        self.stock.remove_n(&bucket, count).await
    }

    /// Clear one duration, or the whole product when `duration` is absent or "all"
    pub async fn clear_stock(
        &self,
        actor: Actor,
        category: &str,
        product: &str,
        duration: Option<&str>,
    ) -> ShopResult<usize> {
        actor.require(Capability::ManageStock)?;
        let duration = duration.filter(|d| !d.eq_ignore_ascii_case("all"));
        match duration {
            Some(d) => {
                let bucket = self.catalog.resolve(category, product, d)?;
                self.stock
                    .clear(&bucket.category, &bucket.product, Some(&bucket.duration))
                    .await
            }
            None => {
                let entry = self.catalog.product(category, product).ok_or_else(|| {
                    ShopError::validation(format!("Unknown product '{} / {}'", category, product))
                })?;
                self.stock.clear(&entry.category, &entry.product, None).await
            }
        }
    }

    pub async fn stock_summary(&self, actor: Actor) -> ShopResult<StockSummary> {
        actor.require(Capability::ManageStock)?;
        self.stock.summary().await
    }

    // ========================================================================
    // Promo codes
    // ========================================================================

    pub async fn create_promo(&self, actor: Actor, promo: NewPromo) -> ShopResult<PromoCode> {
        actor.require(Capability::ManagePromos)?;
        self.promos.create(promo).await
    }

    pub async fn update_promo(
        &self,
        actor: Actor,
        code: &str,
        changes: PromoUpdate,
    ) -> ShopResult<PromoCode> {
        actor.require(Capability::ManagePromos)?;
        self.promos.update(code, changes).await
    }

    pub async fn toggle_promo(&self, actor: Actor, code: &str) -> ShopResult<PromoCode> {
        actor.require(Capability::ManagePromos)?;
        self.promos.toggle(code).await
    }

    pub async fn delete_promo(&self, actor: Actor, code: &str) -> ShopResult<()> {
        actor.require(Capability::ManagePromos)?;
        self.promos.delete(code).await
    }

    pub async fn list_promos(&self, actor: Actor) -> ShopResult<Vec<PromoListing>> {
        actor.require(Capability::ManagePromos)?;
        self.promos.list().await
    }

    // ========================================================================
    // Users
    // ========================================================================

    pub async fn create_user(
        &self,
        actor: Actor,
        username: &str,
        password: &str,
        role: Role,
    ) -> ShopResult<UserProfile> {
        actor.require(Capability::ManageUsers)?;
        let user = self.users.create_user(username, password, role).await?;
        Ok(UserProfile::from(&user))
    }

    pub async fn list_users(&self, actor: Actor) -> ShopResult<Vec<UserProfile>> {
        actor.require(Capability::ManageUsers)?;
        let users = self.users.list().await?;
        Ok(users.iter().map(UserProfile::from).collect())
    }

    pub async fn set_role(&self, actor: Actor, user_id: u64, role: Role) -> ShopResult<UserProfile> {
        actor.require(Capability::ManageUsers)?;
        if actor.user_id == user_id && role != Role::Admin && actor.role == Role::Admin {
            return Err(ShopError::validation("Admins cannot demote themselves"));
        }
        let user = self.users.set_role(user_id, role).await?;
        tracing::info!(admin_id = actor.user_id, user_id, role = %role, "Role changed");
        Ok(UserProfile::from(&user))
    }

    pub async fn delete_user(&self, actor: Actor, user_id: u64) -> ShopResult<User> {
        actor.require(Capability::ManageUsers)?;
        if actor.user_id == user_id {
            return Err(ShopError::validation("Cannot delete your own account"));
        }
        let _guard = self.balances.locks().lock(&user_id).await;
        self.users.delete_user(user_id).await
    }

    /// Manual balance correction; removal floors at zero
    pub async fn adjust_balance(
        &self,
        actor: Actor,
        user_id: u64,
        amount: Decimal,
        direction: BalanceDirection,
    ) -> ShopResult<Decimal> {
        actor.require(Capability::AdjustBalance)?;
        let balance = match direction {
            BalanceDirection::Add => self.balances.credit(user_id, amount).await?,
            BalanceDirection::Remove => self.balances.debit(user_id, amount).await?,
        };
        tracing::info!(
            admin_id = actor.user_id,
            user_id,
            amount = %amount,
            direction = ?direction,
            balance = %balance,
            "Balance adjusted"
        );
        Ok(balance)
    }
}
