use crate::coordinator::{Purchase, SalesSummary, TransactionCoordinator};
use crate::error::ShopResult;
use crate::users::{Actor, Capability};

impl TransactionCoordinator {
    /// A user's purchases, newest first. Reading someone else's needs `ViewReports`.
    pub async fn purchases_for(&self, actor: Actor, user_id: u64) -> ShopResult<Vec<Purchase>> {
        if actor.user_id != user_id {
            actor.require(Capability::ViewReports)?;
        }
        self.store
            .purchases
            .view(|purchases| {
                purchases
                    .iter()
                    .filter(|p| p.user_id == user_id)
                    .rev()
                    .cloned()
                    .collect()
            })
            .await
    }

    pub async fn sales_summary(&self, actor: Actor) -> ShopResult<SalesSummary> {
        actor.require(Capability::ViewReports)?;
        self.store
            .purchases
            .view(|purchases| SalesSummary::from_purchases(purchases))
            .await
    }
}

#[cfg(test)]
mod tests {
    use crate::coordinator::test_support::harness;
    use crate::coordinator::PurchaseRequest;
    use crate::error::ShopError;
    use rust_decimal::Decimal;

    fn request(duration: &str) -> PurchaseRequest {
        PurchaseRequest {
            category: "Android".into(),
            product: "Flourite".into(),
            duration: duration.into(),
            promo_code: None,
        }
    }

    #[tokio::test]
    async fn test_sales_summary_groups_by_bucket() {
        let h = harness().await;
        let buyer = h.customer("buyer", Decimal::new(10000, 2)).await;
        h.shop
            .admin_add_stock(h.admin, "Android", "Flourite", "1day", 2)
            .await
            .unwrap();
        h.shop
            .admin_add_stock(h.admin, "Android", "Flourite", "30days", 1)
            .await
            .unwrap();

        h.shop.purchase(buyer, request("1day")).await.unwrap();
        h.shop.purchase(buyer, request("1day")).await.unwrap();
        h.shop.purchase(buyer, request("30days")).await.unwrap();

        let summary = h.shop.sales_summary(h.admin).await.unwrap();
        assert_eq!(summary.count, 3);
        assert_eq!(summary.revenue, Decimal::new(2600, 2));
        assert_eq!(summary.by_bucket["Android/Flourite/1day"].count, 2);

        let history = h.shop.purchases_for(buyer, buyer.user_id).await.unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].bucket.duration, "30days");
    }

    #[tokio::test]
    async fn test_reports_are_restricted() {
        let h = harness().await;
        let alice = h.customer("alice", Decimal::ZERO).await;
        let bob = h.customer("bob", Decimal::ZERO).await;

        assert!(matches!(
            h.shop.sales_summary(alice).await,
            Err(ShopError::Forbidden(_))
        ));
        assert!(matches!(
            h.shop.purchases_for(alice, bob.user_id).await,
            Err(ShopError::Forbidden(_))
        ));
        assert!(h.shop.purchases_for(h.admin, bob.user_id).await.unwrap().is_empty());
    }
}
