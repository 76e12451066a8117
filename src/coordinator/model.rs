//! Purchase records and coordinator DTOs

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use validator::Validate;

use crate::stock::BucketKey;
use crate::topup::TopupRequest;

/// Append-only record of a completed sale
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Purchase {
    pub id: u64,
    pub user_id: u64,
    pub bucket: BucketKey,
    pub key: String,
    pub list_price: Decimal,
    pub discount: Decimal,
    pub final_price: Decimal,
    pub promo_code: Option<String>,
    pub purchased_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate, Clone)]
pub struct PurchaseRequest {
    #[validate(length(min = 1))]
    pub category: String,
    #[validate(length(min = 1))]
    pub product: String,
    #[validate(length(min = 1))]
    pub duration: String,
    pub promo_code: Option<String>,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct PurchaseReceipt {
    pub purchase_id: u64,
    pub key: String,
    pub list_price: Decimal,
    pub discount: Decimal,
    pub final_price: Decimal,
    pub new_balance: Decimal,
    pub promo_code: Option<String>,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct GeneratedStock {
    pub bucket: BucketKey,
    pub keys: Vec<String>,
    pub total: usize,
}

#[derive(Debug, Serialize, Clone)]
pub struct TopupDecisionOutcome {
    pub request: TopupRequest,
    /// Balance after the credit, approvals only
    pub new_balance: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
pub struct RedeemPromoRequest {
    pub code: String,
}

#[derive(Debug, Serialize, Clone, Default, PartialEq)]
pub struct BucketSales {
    pub count: usize,
    pub revenue: Decimal,
}

#[derive(Debug, Serialize, Clone, Default, PartialEq)]
pub struct SalesSummary {
    pub count: usize,
    pub revenue: Decimal,
    pub discounts: Decimal,
    /// Keyed by `category/product/duration`
    pub by_bucket: BTreeMap<String, BucketSales>,
}

impl SalesSummary {
    pub fn from_purchases(purchases: &[Purchase]) -> Self {
        let mut summary = SalesSummary::default();
        for purchase in purchases {
            summary.count += 1;
            summary.revenue += purchase.final_price;
            summary.discounts += purchase.discount;
            let entry = summary
                .by_bucket
                .entry(purchase.bucket.to_string())
                .or_default();
            entry.count += 1;
            entry.revenue += purchase.final_price;
        }
        summary
    }
}
