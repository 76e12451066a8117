//! Customer shop routes

use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers::shop;
use crate::state::AppState;

pub fn shop_routes() -> Router<AppState> {
    Router::new()
        .route("/shop/catalog", get(shop::catalog))
        .route("/shop/purchase", post(shop::purchase))
        .route("/shop/quote", post(shop::quote))
        .route("/shop/purchases", get(shop::purchase_history))
        .route("/shop/topups", post(shop::submit_topup).get(shop::topup_history))
        .route("/shop/promo/redeem", post(shop::redeem_promo))
        .route("/shop/resets", post(shop::request_key_reset))
}
