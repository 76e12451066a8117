//! Promo code models

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How a promo reduces the price
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DiscountType {
    Percentage,
    Fixed,
}

/// One redemption of a promo code
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PromoUse {
    pub user_id: u64,
    pub used_at: DateTime<Utc>,
}

/// Discount code with usage policy
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PromoCode {
    /// Stored upper-case; lookups are case-insensitive
    pub code: String,
    pub discount_type: DiscountType,
    pub amount: Decimal,
    pub min_purchase: Decimal,
    /// 0 means unlimited
    pub max_uses: u32,
    pub used_by: Vec<PromoUse>,
    pub expires_at: Option<DateTime<Utc>>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// Why a promo code cannot be used
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PromoRejection {
    #[error("Invalid promo code")]
    NotFound,

    #[error("Promo code is disabled")]
    Inactive,

    #[error("Promo code has expired")]
    Expired,

    #[error("Promo code has reached maximum uses")]
    Exhausted,

    #[error("You have already used this promo code")]
    AlreadyUsed,

    #[error("Minimum purchase amount is {minimum}")]
    BelowMinimum { minimum: Decimal },
}

impl PromoRejection {
    pub fn code(&self) -> &'static str {
        match self {
            PromoRejection::NotFound => "not_found",
            PromoRejection::Inactive => "inactive",
            PromoRejection::Expired => "expired",
            PromoRejection::Exhausted => "exhausted",
            PromoRejection::AlreadyUsed => "already_used",
            PromoRejection::BelowMinimum { .. } => "below_minimum",
        }
    }
}

pub(crate) fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

impl PromoCode {
    pub fn uses(&self) -> usize {
        self.used_by.len()
    }

    pub fn used_by_user(&self, user_id: u64) -> bool {
        self.used_by.iter().any(|u| u.user_id == user_id)
    }

    /// Every rule except the minimum purchase, in validation order
    pub fn check_redeemable(&self, user_id: u64, now: DateTime<Utc>) -> Result<(), PromoRejection> {
        if !self.active {
            return Err(PromoRejection::Inactive);
        }
        if self.expires_at.map(|at| at < now).unwrap_or(false) {
            return Err(PromoRejection::Expired);
        }
        if self.max_uses > 0 && self.uses() >= self.max_uses as usize {
            return Err(PromoRejection::Exhausted);
        }
        if self.used_by_user(user_id) {
            return Err(PromoRejection::AlreadyUsed);
        }
        Ok(())
    }

    pub fn check(
        &self,
        user_id: u64,
        purchase_amount: Decimal,
        now: DateTime<Utc>,
    ) -> Result<(), PromoRejection> {
        self.check_redeemable(user_id, now)?;
        if purchase_amount < self.min_purchase {
            return Err(PromoRejection::BelowMinimum {
                minimum: self.min_purchase,
            });
        }
        Ok(())
    }

    /// Discount on `amount`, never more than `amount` itself
    pub fn discount_for(&self, amount: Decimal) -> Decimal {
        let discount = match self.discount_type {
            DiscountType::Percentage => (amount * self.amount / Decimal::ONE_HUNDRED)
                .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero),
            DiscountType::Fixed => self.amount.min(amount),
        };
        discount.max(Decimal::ZERO).min(amount)
    }
}

/// Price before and after a promo
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct PriceBreakdown {
    pub list_price: Decimal,
    pub discount: Decimal,
    pub final_price: Decimal,
    pub promo_code: Option<String>,
}

impl PriceBreakdown {
    pub fn list(price: Decimal) -> Self {
        Self {
            list_price: price,
            discount: Decimal::ZERO,
            final_price: price,
            promo_code: None,
        }
    }

    pub fn with_promo(price: Decimal, promo: &PromoCode) -> Self {
        let discount = promo.discount_for(price);
        Self {
            list_price: price,
            discount,
            final_price: (price - discount).max(Decimal::ZERO),
            promo_code: Some(promo.code.clone()),
        }
    }
}

// ============================================================================
// Request/Response DTOs
// ============================================================================

#[derive(Debug, Deserialize, Clone)]
pub struct NewPromo {
    pub code: String,
    pub discount_type: DiscountType,
    pub amount: Decimal,
    #[serde(default)]
    pub min_purchase: Decimal,
    #[serde(default)]
    pub max_uses: u32,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Fields an admin may change after creation
#[derive(Debug, Deserialize, Clone, Default)]
pub struct PromoUpdate {
    pub active: Option<bool>,
    pub max_uses: Option<u32>,
    pub min_purchase: Option<Decimal>,
    /// `Some(None)` removes the expiry
    #[serde(default, with = "double_option")]
    pub expires_at: Option<Option<DateTime<Utc>>>,
}

mod double_option {
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
    where
        T: Deserialize<'de>,
        D: Deserializer<'de>,
    {
        Deserialize::deserialize(deserializer).map(Some)
    }
}

#[derive(Debug, Serialize, Clone)]
pub struct PromoListing {
    #[serde(flatten)]
    pub promo: PromoCode,
    pub uses: usize,
    pub remaining_uses: Option<usize>,
}

impl From<PromoCode> for PromoListing {
    fn from(promo: PromoCode) -> Self {
        let uses = promo.uses();
        let remaining_uses = (promo.max_uses > 0)
            .then(|| (promo.max_uses as usize).saturating_sub(uses));
        Self {
            promo,
            uses,
            remaining_uses,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn promo(discount_type: DiscountType, amount: Decimal) -> PromoCode {
        PromoCode {
            code: "SAVE".into(),
            discount_type,
            amount,
            min_purchase: Decimal::ZERO,
            max_uses: 0,
            used_by: vec![],
            expires_at: None,
            active: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_percentage_discount_rounds_to_cents() {
        let p = promo(DiscountType::Percentage, Decimal::new(15, 0));
        assert_eq!(p.discount_for(Decimal::new(999, 2)), Decimal::new(150, 2));
    }

    #[test]
    fn test_fixed_discount_capped_at_amount() {
        let p = promo(DiscountType::Fixed, Decimal::new(20, 0));
        let breakdown = PriceBreakdown::with_promo(Decimal::new(5, 0), &p);
        assert_eq!(breakdown.discount, Decimal::new(5, 0));
        assert_eq!(breakdown.final_price, Decimal::ZERO);
    }

    #[test]
    fn test_check_order_short_circuits() {
        let mut p = promo(DiscountType::Fixed, Decimal::ONE);
        p.active = false;
        p.expires_at = Some(Utc::now() - Duration::days(1));
        assert_eq!(p.check(1, Decimal::TEN, Utc::now()), Err(PromoRejection::Inactive));

        p.active = true;
        assert_eq!(p.check(1, Decimal::TEN, Utc::now()), Err(PromoRejection::Expired));

        p.expires_at = None;
        p.max_uses = 1;
        p.used_by.push(PromoUse {
            user_id: 1,
            used_at: Utc::now(),
        });
        assert_eq!(p.check(1, Decimal::TEN, Utc::now()), Err(PromoRejection::Exhausted));

        p.max_uses = 0;
        assert_eq!(p.check(1, Decimal::TEN, Utc::now()), Err(PromoRejection::AlreadyUsed));

        p.min_purchase = Decimal::new(50, 0);
        assert_eq!(
            p.check(2, Decimal::TEN, Utc::now()),
            Err(PromoRejection::BelowMinimum {
                minimum: Decimal::new(50, 0)
            })
        );
    }

    #[test]
    fn test_update_distinguishes_absent_and_null_expiry() {
        let absent: PromoUpdate = serde_json::from_str(r#"{"active": false}"#).unwrap();
        assert_eq!(absent.expires_at, None);

        let cleared: PromoUpdate = serde_json::from_str(r#"{"expires_at": null}"#).unwrap();
        assert_eq!(cleared.expires_at, Some(None));
    }
}
