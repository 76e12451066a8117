//! Promo engine: validation, redemption and administration

use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;

use crate::error::{ShopError, ShopResult};
use crate::locks::KeyedLocks;
use crate::promo::model::normalize_code;
use crate::promo::{DiscountType, NewPromo, PromoCode, PromoListing, PromoRejection, PromoUpdate, PromoUse};
use crate::store::LedgerStore;

#[derive(Clone)]
pub struct PromoEngine {
    store: Arc<LedgerStore>,
    locks: Arc<KeyedLocks<String>>,
}

fn validate_new_code(code: &str) -> ShopResult<()> {
    let len = code.chars().count();
    if !(3..=20).contains(&len) || !code.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(ShopError::validation(
            "Promo code must be 3-20 letters or digits",
        ));
    }
    Ok(())
}

impl PromoEngine {
    pub fn new(store: Arc<LedgerStore>, locks: Arc<KeyedLocks<String>>) -> Self {
        Self { store, locks }
    }

    pub fn locks(&self) -> &Arc<KeyedLocks<String>> {
        &self.locks
    }

    pub async fn find(&self, code: &str) -> ShopResult<Option<PromoCode>> {
        let code = normalize_code(code);
        self.store
            .promo_codes
            .view(|codes| codes.iter().find(|p| p.code == code).cloned())
            .await
    }

    /// Check every rule in order; the first failure is reported
    pub async fn validate(
        &self,
        code: &str,
        user_id: u64,
        purchase_amount: Decimal,
    ) -> ShopResult<PromoCode> {
        let promo = self
            .find(code)
            .await?
            .ok_or(ShopError::PromoInvalid(PromoRejection::NotFound))?;
        promo
            .check(user_id, purchase_amount, Utc::now())
            .map_err(ShopError::PromoInvalid)?;
        Ok(promo)
    }

    /// Record a use of the code by `user_id`.
    ///
    /// Re-checks every rule except the minimum purchase, so a code can never
    /// exceed `max_uses` or be used twice by one user.
    pub async fn redeem(&self, code: &str, user_id: u64) -> ShopResult<PromoCode> {
        let code = normalize_code(code);
        let _guard = self.locks.lock(&code).await;
        self.redeem_locked(&code, user_id).await
    }

    /// Caller holds the promo lock
    pub(crate) async fn redeem_locked(&self, code: &str, user_id: u64) -> ShopResult<PromoCode> {
        let code = normalize_code(code);
        let redeemed = self
            .store
            .promo_codes
            .update(move |codes| {
                let promo = codes
                    .iter_mut()
                    .find(|p| p.code == code)
                    .ok_or(ShopError::PromoInvalid(PromoRejection::NotFound))?;
                let now = Utc::now();
                promo
                    .check_redeemable(user_id, now)
                    .map_err(ShopError::PromoInvalid)?;
                promo.used_by.push(PromoUse {
                    user_id,
                    used_at: now,
                });
                Ok(promo.clone())
            })
            .await?;

        tracing::info!(code = %redeemed.code, user_id, uses = redeemed.uses(), "Promo code redeemed");
        Ok(redeemed)
    }

    pub async fn create(&self, new: NewPromo) -> ShopResult<PromoCode> {
        let code = normalize_code(&new.code);
        validate_new_code(&code)?;

        if new.amount <= Decimal::ZERO {
            return Err(ShopError::InvalidAmount(new.amount));
        }
        if new.discount_type == DiscountType::Percentage && new.amount > Decimal::ONE_HUNDRED {
            return Err(ShopError::validation("Percentage discount cannot exceed 100"));
        }
        if new.min_purchase < Decimal::ZERO {
            return Err(ShopError::validation("Minimum purchase cannot be negative"));
        }

        let promo = PromoCode {
            code: code.clone(),
            discount_type: new.discount_type,
            amount: new.amount,
            min_purchase: new.min_purchase,
            max_uses: new.max_uses,
            used_by: Vec::new(),
            expires_at: new.expires_at,
            active: true,
            created_at: Utc::now(),
        };

        let created = self
            .store
            .promo_codes
            .update(move |codes| {
                if codes.iter().any(|p| p.code == code) {
                    return Err(ShopError::Conflict(format!(
                        "Promo code '{}' already exists",
                        code
                    )));
                }
                codes.push(promo.clone());
                Ok(promo)
            })
            .await?;

        tracing::info!(code = %created.code, discount_type = ?created.discount_type, amount = %created.amount, "Promo code created");
        Ok(created)
    }

    pub async fn update(&self, code: &str, changes: PromoUpdate) -> ShopResult<PromoCode> {
        if let Some(min) = changes.min_purchase {
            if min < Decimal::ZERO {
                return Err(ShopError::validation("Minimum purchase cannot be negative"));
            }
        }
        self.modify(code, move |promo| {
            if let Some(max_uses) = changes.max_uses {
                if max_uses > 0 && (max_uses as usize) < promo.uses() {
                    return Err(ShopError::validation(format!(
                        "Max uses cannot drop below the {} recorded uses",
                        promo.uses()
                    )));
                }
                promo.max_uses = max_uses;
            }
            if let Some(active) = changes.active {
                promo.active = active;
            }
            if let Some(min) = changes.min_purchase {
                promo.min_purchase = min;
            }
            if let Some(expires_at) = changes.expires_at {
                promo.expires_at = expires_at;
            }
            Ok(())
        })
        .await
    }

    /// Flip the active flag
    pub async fn toggle(&self, code: &str) -> ShopResult<PromoCode> {
        let toggled = self
            .modify(code, |promo| {
                promo.active = !promo.active;
                Ok(())
            })
            .await?;
        tracing::info!(code = %toggled.code, active = toggled.active, "Promo code toggled");
        Ok(toggled)
    }

    pub async fn delete(&self, code: &str) -> ShopResult<()> {
        let code = normalize_code(code);
        let _guard = self.locks.lock(&code).await;
        self.store
            .promo_codes
            .update(move |codes| {
                let index = codes
                    .iter()
                    .position(|p| p.code == code)
                    .ok_or_else(|| ShopError::not_found(format!("Promo code '{}'", code)))?;
                codes.remove(index);
                Ok(())
            })
            .await
    }

    pub async fn list(&self) -> ShopResult<Vec<PromoListing>> {
        let codes = self.store.promo_codes.read().await?;
        Ok(codes.into_iter().map(PromoListing::from).collect())
    }

    /// Apply `f` under the promo lock; an error from `f` leaves the code untouched
    async fn modify(
        &self,
        code: &str,
        f: impl FnOnce(&mut PromoCode) -> ShopResult<()>,
    ) -> ShopResult<PromoCode> {
        let code = normalize_code(code);
        let _guard = self.locks.lock(&code).await;
        self.store
            .promo_codes
            .update(move |codes| {
                let promo = codes
                    .iter_mut()
                    .find(|p| p.code == code)
                    .ok_or_else(|| ShopError::not_found(format!("Promo code '{}'", code)))?;
                f(promo)?;
                Ok(promo.clone())
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn engine() -> PromoEngine {
        let (store, _) = LedgerStore::in_memory();
        PromoEngine::new(store, Arc::new(KeyedLocks::new()))
    }

    fn new_promo(code: &str, max_uses: u32) -> NewPromo {
        NewPromo {
            code: code.into(),
            discount_type: DiscountType::Percentage,
            amount: Decimal::new(10, 0),
            min_purchase: Decimal::ZERO,
            max_uses,
            expires_at: None,
        }
    }

    fn rejection(err: ShopError) -> PromoRejection {
        match err {
            ShopError::PromoInvalid(reason) => reason,
            other => panic!("expected promo rejection, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_create_normalizes_and_rejects_duplicates() {
        let promos = engine();
        let created = promos.create(new_promo("welcome10", 0)).await.unwrap();
        assert_eq!(created.code, "WELCOME10");

        let err = promos.create(new_promo("Welcome10", 0)).await.unwrap_err();
        assert!(matches!(err, ShopError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_create_validation() {
        let promos = engine();
        assert!(matches!(
            promos.create(new_promo("AB", 0)).await,
            Err(ShopError::Validation(_))
        ));
        assert!(matches!(
            promos.create(new_promo("HAS-DASH", 0)).await,
            Err(ShopError::Validation(_))
        ));

        let mut over = new_promo("OVER", 0);
        over.amount = Decimal::new(101, 0);
        assert!(matches!(promos.create(over).await, Err(ShopError::Validation(_))));

        let mut zero = new_promo("ZERO", 0);
        zero.amount = Decimal::ZERO;
        assert!(matches!(promos.create(zero).await, Err(ShopError::InvalidAmount(_))));
    }

    #[tokio::test]
    async fn test_validate_reports_specific_reason() {
        let promos = engine();
        assert_eq!(
            rejection(promos.validate("NOPE", 1, Decimal::TEN).await.unwrap_err()),
            PromoRejection::NotFound
        );

        let mut expired = new_promo("OLD", 0);
        expired.expires_at = Some(Utc::now() - Duration::hours(1));
        promos.create(expired).await.unwrap();
        assert_eq!(
            rejection(promos.validate("old", 1, Decimal::TEN).await.unwrap_err()),
            PromoRejection::Expired
        );

        let mut minimum = new_promo("BIG", 0);
        minimum.min_purchase = Decimal::new(50, 0);
        promos.create(minimum).await.unwrap();
        assert!(matches!(
            rejection(promos.validate("BIG", 1, Decimal::TEN).await.unwrap_err()),
            PromoRejection::BelowMinimum { .. }
        ));
    }

    #[tokio::test]
    async fn test_redeem_enforces_max_uses_and_single_use() {
        let promos = engine();
        promos.create(new_promo("TWICE", 2)).await.unwrap();

        promos.redeem("twice", 1).await.unwrap();
        assert_eq!(
            rejection(promos.redeem("TWICE", 1).await.unwrap_err()),
            PromoRejection::AlreadyUsed
        );
        promos.redeem("TWICE", 2).await.unwrap();
        assert_eq!(
            rejection(promos.redeem("TWICE", 3).await.unwrap_err()),
            PromoRejection::Exhausted
        );

        let promo = promos.find("TWICE").await.unwrap().unwrap();
        assert_eq!(promo.uses(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_redeems_respect_max_uses() {
        let promos = engine();
        promos.create(new_promo("RUSH", 3)).await.unwrap();

        let mut handles = Vec::new();
        for user_id in 1..=10 {
            let promos = promos.clone();
            handles.push(tokio::spawn(async move { promos.redeem("RUSH", user_id).await }));
        }
        let mut ok = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                ok += 1;
            }
        }
        assert_eq!(ok, 3);
        assert_eq!(promos.find("RUSH").await.unwrap().unwrap().uses(), 3);
    }

    #[tokio::test]
    async fn test_toggle_update_delete() {
        let promos = engine();
        promos.create(new_promo("FLIP", 0)).await.unwrap();

        assert!(!promos.toggle("flip").await.unwrap().active);
        assert_eq!(
            rejection(promos.validate("FLIP", 1, Decimal::TEN).await.unwrap_err()),
            PromoRejection::Inactive
        );

        let updated = promos
            .update(
                "FLIP",
                PromoUpdate {
                    active: Some(true),
                    max_uses: Some(5),
                    ..PromoUpdate::default()
                },
            )
            .await
            .unwrap();
        assert!(updated.active);
        assert_eq!(updated.max_uses, 5);

        let listing = promos.list().await.unwrap();
        assert_eq!(listing[0].remaining_uses, Some(5));

        promos.delete("FLIP").await.unwrap();
        assert!(promos.find("FLIP").await.unwrap().is_none());
        assert!(matches!(promos.delete("FLIP").await, Err(ShopError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_update_cannot_lower_max_uses_below_recorded_uses() {
        let promos = engine();
        promos.create(new_promo("CROWD", 5)).await.unwrap();
        for user_id in 1..=3 {
            promos.redeem("CROWD", user_id).await.unwrap();
        }

        let err = promos
            .update(
                "CROWD",
                PromoUpdate {
                    max_uses: Some(1),
                    active: Some(false),
                    ..PromoUpdate::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ShopError::Validation(_)));

        let promo = promos.find("CROWD").await.unwrap().unwrap();
        assert_eq!(promo.max_uses, 5);
        assert!(promo.active);

        // exactly the recorded uses, or unlimited, is fine
        let updated = promos
            .update("CROWD", PromoUpdate { max_uses: Some(3), ..PromoUpdate::default() })
            .await
            .unwrap();
        assert_eq!(updated.max_uses, 3);
        let updated = promos
            .update("CROWD", PromoUpdate { max_uses: Some(0), ..PromoUpdate::default() })
            .await
            .unwrap();
        assert_eq!(updated.max_uses, 0);
    }
}
