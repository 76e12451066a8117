//! Purchase flow
//!
//! PRICED -> PROMO_APPLIED -> STOCK_RESERVED -> BALANCE_DEBITED -> RECORDED.
//! The user, bucket and promo locks are taken in that order and held for the
//! whole flow. Nothing slow runs while they are held.

use chrono::Utc;
use rust_decimal::Decimal;

use crate::coordinator::{Purchase, PurchaseReceipt, PurchaseRequest, TransactionCoordinator};
use crate::error::{ShopError, ShopResult};
use crate::events::ShopEvent;
use crate::promo::{normalize_code, PriceBreakdown, PromoCode};
use crate::stock::BucketKey;
use crate::users::{Actor, Capability};

impl TransactionCoordinator {
    /// Buy one key from the bucket named in `request`
    pub async fn purchase(&self, actor: Actor, request: PurchaseRequest) -> ShopResult<PurchaseReceipt> {
        actor.require(Capability::Purchase)?;
        let user_id = actor.user_id;

        let bucket = self
            .catalog
            .resolve(&request.category, &request.product, &request.duration)?;
        let list_price = self.catalog.price(&bucket)?;
        let promo_code = request
            .promo_code
            .as_deref()
            .map(normalize_code)
            .filter(|code| !code.is_empty());

        let _user_guard = self.balances.locks().lock(&user_id).await;
        let _bucket_guard = self.stock.locks().lock(&bucket).await;
        let _promo_guard = match &promo_code {
            Some(code) => Some(self.promos.locks().lock(code).await),
            None => None,
        };

        // PRICED / PROMO_APPLIED
        let price = match &promo_code {
            Some(code) => {
                let promo = self.promos.validate(code, user_id, list_price).await?;
                PriceBreakdown::with_promo(list_price, &promo)
            }
            None => PriceBreakdown::list(list_price),
        };

        let available = self.balances.query(user_id).await?;
        if available < price.final_price {
            return Err(ShopError::InsufficientBalance {
                required: price.final_price,
                available,
            });
        }

        // STOCK_RESERVED
        let key = self
            .stock
            .take_locked(&bucket)
            .await?
            .ok_or_else(|| ShopError::OutOfStock(bucket.clone()))?;

        // From here on the key is gone; a failure cannot be rolled back.
        let (purchase, new_balance) = match self
            .settle(user_id, &bucket, &key, &price, available)
            .await
        {
            Ok(settled) => settled,
            Err(err) => {
                tracing::error!(
                    user_id,
                    bucket = %bucket,
                    key = %key,
                    final_price = %price.final_price,
                    error = %err,
                    "Purchase failed after key was dispensed, manual reconciliation required"
                );
                return Err(ShopError::Reconciliation(format!(
                    "purchase by user #{} from {} failed after dispensing: {}",
                    user_id, bucket, err
                )));
            }
        };

        tracing::info!(
            purchase_id = purchase.id,
            user_id,
            bucket = %bucket,
            final_price = %purchase.final_price,
            promo = ?purchase.promo_code,
            "Purchase completed"
        );

        self.events.publish(ShopEvent::PurchaseCompleted {
            purchase_id: purchase.id,
            user_id,
            bucket,
            final_price: purchase.final_price,
            promo_code: purchase.promo_code.clone(),
        });

        Ok(PurchaseReceipt {
            purchase_id: purchase.id,
            key: purchase.key,
            list_price: purchase.list_price,
            discount: purchase.discount,
            final_price: purchase.final_price,
            new_balance,
            promo_code: purchase.promo_code,
        })
    }

    /// BALANCE_DEBITED -> RECORDED. Runs under the purchase locks.
    async fn settle(
        &self,
        user_id: u64,
        bucket: &BucketKey,
        key: &str,
        price: &PriceBreakdown,
        balance_before: Decimal,
    ) -> ShopResult<(Purchase, Decimal)> {
        let new_balance = if price.final_price > Decimal::ZERO {
            self.balances.debit_locked(user_id, price.final_price).await?
        } else {
            balance_before
        };

        if let Some(code) = &price.promo_code {
            self.promos.redeem_locked(code, user_id).await?;
        }

        let bucket = bucket.clone();
        let key = key.to_string();
        let price = price.clone();
        let purchase = self
            .store
            .purchases
            .update(move |purchases| {
                let id = purchases.iter().map(|p| p.id).max().unwrap_or(0) + 1;
                let purchase = Purchase {
                    id,
                    user_id,
                    bucket,
                    key,
                    list_price: price.list_price,
                    discount: price.discount,
                    final_price: price.final_price,
                    promo_code: price.promo_code,
                    purchased_at: Utc::now(),
                };
                purchases.push(purchase.clone());
                Ok(purchase)
            })
            .await?;

        Ok((purchase, new_balance))
    }

    /// Price a purchase without touching any ledger
    pub async fn quote(&self, actor: Actor, request: PurchaseRequest) -> ShopResult<PriceBreakdown> {
        actor.require(Capability::Purchase)?;
        let bucket = self
            .catalog
            .resolve(&request.category, &request.product, &request.duration)?;
        let list_price = self.catalog.price(&bucket)?;

        match request.promo_code.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
            Some(code) => {
                let promo = self.promos.validate(code, actor.user_id, list_price).await?;
                Ok(PriceBreakdown::with_promo(list_price, &promo))
            }
            None => Ok(PriceBreakdown::list(list_price)),
        }
    }

    /// Mark a promo code as used by the caller outside a purchase
    pub async fn redeem_promo(&self, actor: Actor, code: &str) -> ShopResult<PromoCode> {
        actor.require(Capability::Purchase)?;
        self.promos.redeem(code, actor.user_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::test_support::harness;
    use crate::promo::{DiscountType, NewPromo, PromoRejection};
    use crate::users::Role;

    fn flourite_week(promo: Option<&str>) -> PurchaseRequest {
        PurchaseRequest {
            category: "Android".into(),
            product: "Flourite".into(),
            duration: "7days".into(),
            promo_code: promo.map(str::to_string),
        }
    }

    fn bucket() -> BucketKey {
        BucketKey::new("Android", "Flourite", "7days")
    }

    #[tokio::test]
    async fn test_exact_balance_purchase_empties_balance() {
        let h = harness().await;
        let buyer = h.customer("buyer", Decimal::new(1000, 2)).await;
        h.shop
            .stock()
            .add_many(&bucket(), vec!["KEY-A".into(), "KEY-B".into()])
            .await
            .unwrap();

        let receipt = h.shop.purchase(buyer, flourite_week(None)).await.unwrap();
        assert_eq!(receipt.key, "KEY-A");
        assert_eq!(receipt.final_price, Decimal::new(1000, 2));
        assert_eq!(receipt.new_balance, Decimal::ZERO);
        assert_eq!(h.shop.stock().count(&bucket()).await.unwrap(), 1);
        assert_eq!(h.shop.purchases_for(buyer, buyer.user_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_out_of_stock_charges_nothing() {
        let h = harness().await;
        let buyer = h.customer("buyer", Decimal::new(5000, 2)).await;

        let err = h.shop.purchase(buyer, flourite_week(None)).await.unwrap_err();
        assert_eq!(err, ShopError::OutOfStock(bucket()));
        assert_eq!(
            h.shop.balances().query(buyer.user_id).await.unwrap(),
            Decimal::new(5000, 2)
        );
    }

    #[tokio::test]
    async fn test_insufficient_balance_keeps_stock() {
        let h = harness().await;
        let buyer = h.customer("buyer", Decimal::new(999, 2)).await;
        h.shop.stock().add_many(&bucket(), vec!["KEY-A".into()]).await.unwrap();

        let err = h.shop.purchase(buyer, flourite_week(None)).await.unwrap_err();
        assert!(matches!(err, ShopError::InsufficientBalance { .. }));
        assert_eq!(h.shop.stock().count(&bucket()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_promo_discount_and_redemption() {
        let h = harness().await;
        let buyer = h.customer("buyer", Decimal::new(1000, 2)).await;
        h.shop
            .stock()
            .add_many(&bucket(), vec!["A".into(), "B".into()])
            .await
            .unwrap();
        h.shop
            .create_promo(
                h.admin,
                NewPromo {
                    code: "HALF".into(),
                    discount_type: DiscountType::Percentage,
                    amount: Decimal::new(50, 0),
                    min_purchase: Decimal::ZERO,
                    max_uses: 0,
                    expires_at: None,
                },
            )
            .await
            .unwrap();

        let receipt = h.shop.purchase(buyer, flourite_week(Some("half"))).await.unwrap();
        assert_eq!(receipt.final_price, Decimal::new(500, 2));
        assert_eq!(receipt.discount, Decimal::new(500, 2));
        assert_eq!(receipt.promo_code.as_deref(), Some("HALF"));
        assert_eq!(receipt.new_balance, Decimal::new(500, 2));

        let err = h.shop.purchase(buyer, flourite_week(Some("HALF"))).await.unwrap_err();
        assert_eq!(err, ShopError::PromoInvalid(PromoRejection::AlreadyUsed));
        assert_eq!(h.shop.stock().count(&bucket()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_free_purchase_with_full_discount() {
        let h = harness().await;
        let buyer = h.customer("buyer", Decimal::ZERO).await;
        h.shop.stock().add_many(&bucket(), vec!["A".into()]).await.unwrap();
        h.shop
            .create_promo(
                h.admin,
                NewPromo {
                    code: "FREE".into(),
                    discount_type: DiscountType::Fixed,
                    amount: Decimal::new(100, 0),
                    min_purchase: Decimal::ZERO,
                    max_uses: 1,
                    expires_at: None,
                },
            )
            .await
            .unwrap();

        let receipt = h.shop.purchase(buyer, flourite_week(Some("FREE"))).await.unwrap();
        assert_eq!(receipt.final_price, Decimal::ZERO);
        assert_eq!(receipt.new_balance, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_unknown_product_is_validation_error() {
        let h = harness().await;
        let buyer = h.customer("buyer", Decimal::TEN).await;
        let mut request = flourite_week(None);
        request.duration = "forever".into();
        assert!(matches!(
            h.shop.purchase(buyer, request).await,
            Err(ShopError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_failure_after_take_is_reconciliation() {
        let h = harness().await;
        let buyer = h.customer("buyer", Decimal::new(1000, 2)).await;
        h.shop.stock().add_many(&bucket(), vec!["A".into()]).await.unwrap();

        // users and stock are cached; the purchase log is loaded cold and fails
        h.backend.fail_next_loads(1);
        let err = h.shop.purchase(buyer, flourite_week(None)).await.unwrap_err();

        assert!(matches!(err, ShopError::Reconciliation(_)));
        assert_eq!(h.shop.stock().count(&bucket()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_buyers_get_distinct_keys() {
        let h = harness().await;
        let keys: Vec<String> = (0..5).map(|i| format!("K{}", i)).collect();
        h.shop.stock().add_many(&bucket(), keys).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..8 {
            let buyer = h.customer(&format!("buyer{}", i), Decimal::new(1000, 2)).await;
            let shop = h.shop.clone();
            handles.push(tokio::spawn(async move {
                shop.purchase(buyer, flourite_week(None)).await
            }));
        }

        let mut dispensed = std::collections::HashSet::new();
        let mut out_of_stock = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(receipt) => assert!(dispensed.insert(receipt.key)),
                Err(ShopError::OutOfStock(_)) => out_of_stock += 1,
                Err(other) => panic!("unexpected error {:?}", other),
            }
        }
        assert_eq!(dispensed.len(), 5);
        assert_eq!(out_of_stock, 3);
    }

    #[tokio::test]
    async fn test_same_user_cannot_overdraw_concurrently() {
        let h = harness().await;
        let buyer = h.customer("buyer", Decimal::new(1500, 2)).await;
        h.shop
            .stock()
            .add_many(&bucket(), vec!["A".into(), "B".into()])
            .await
            .unwrap();

        let a = {
            let shop = h.shop.clone();
            tokio::spawn(async move { shop.purchase(buyer, flourite_week(None)).await })
        };
        let b = {
            let shop = h.shop.clone();
            tokio::spawn(async move { shop.purchase(buyer, flourite_week(None)).await })
        };
        let results = [a.await.unwrap(), b.await.unwrap()];

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert_eq!(
            h.shop.balances().query(buyer.user_id).await.unwrap(),
            Decimal::new(500, 2)
        );
        assert_eq!(h.shop.stock().count(&bucket()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_quote_has_no_side_effects() {
        let h = harness().await;
        let buyer = h.customer("buyer", Decimal::ZERO).await;
        h.shop
            .create_promo(
                h.admin,
                NewPromo {
                    code: "TENOFF".into(),
                    discount_type: DiscountType::Fixed,
                    amount: Decimal::new(3, 0),
                    min_purchase: Decimal::ZERO,
                    max_uses: 1,
                    expires_at: None,
                },
            )
            .await
            .unwrap();

        let quote = h.shop.quote(buyer, flourite_week(Some("TENOFF"))).await.unwrap();
        assert_eq!(quote.final_price, Decimal::new(700, 2));
        let promo = h.shop.promos().find("TENOFF").await.unwrap().unwrap();
        assert_eq!(promo.uses(), 0);
    }

    #[tokio::test]
    async fn test_roles_without_purchase_capability_do_not_exist() {
        let h = harness().await;
        let support = h
            .shop
            .users()
            .create_user("helper", "secret", Role::Support)
            .await
            .unwrap()
            .actor();
        // support may buy, but not manage stock
        assert!(h.shop.quote(support, flourite_week(None)).await.is_ok());
        assert!(matches!(
            h.shop.admin_add_stock(support, "Android", "Flourite", "7days", 1).await,
            Err(ShopError::Forbidden(_))
        ));
    }
}
