//! Promotional discount codes

mod engine;
mod model;

pub use engine::PromoEngine;
pub use model::{
    DiscountType, NewPromo, PriceBreakdown, PromoCode, PromoListing, PromoRejection, PromoUpdate,
    PromoUse,
};
pub(crate) use model::normalize_code;
