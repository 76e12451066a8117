//! Customer-facing shop handlers

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;
use validator::Validate;

use super::ApiResponse;
use crate::catalog::Catalog;
use crate::coordinator::{
    Purchase, PurchaseReceipt, PurchaseRequest, RedeemPromoRequest, TransactionCoordinator,
};
use crate::error::ApiError;
use crate::middleware::AuthenticatedActor;
use crate::promo::{PriceBreakdown, PromoCode};
use crate::resets::{KeyResetRequest, ResetEntry};
use crate::topup::{SubmitTopupRequest, TopupReceipt, TopupRequest};

/// POST /api/shop/purchase
pub async fn purchase(
    State(shop): State<TransactionCoordinator>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Json(req): Json<PurchaseRequest>,
) -> Result<(StatusCode, Json<ApiResponse<PurchaseReceipt>>), ApiError> {
    req.validate()?;
    let receipt = shop.purchase(actor, req).await?;
    Ok((StatusCode::CREATED, ApiResponse::ok(receipt)))
}

/// POST /api/shop/quote - Price without side effects
pub async fn quote(
    State(shop): State<TransactionCoordinator>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Json(req): Json<PurchaseRequest>,
) -> Result<Json<ApiResponse<PriceBreakdown>>, ApiError> {
    req.validate()?;
    let breakdown = shop.quote(actor, req).await?;
    Ok(ApiResponse::ok(breakdown))
}

/// POST /api/shop/topups - Submit a payment proof (base64 image)
pub async fn submit_topup(
    State(shop): State<TransactionCoordinator>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Json(req): Json<SubmitTopupRequest>,
) -> Result<(StatusCode, Json<ApiResponse<TopupReceipt>>), ApiError> {
    let image = STANDARD.decode(req.image.trim())?;
    let receipt = shop
        .submit_topup(actor, &req.method, &image, req.proof_ref)
        .await?;
    Ok((StatusCode::ACCEPTED, ApiResponse::ok(receipt)))
}

/// POST /api/shop/promo/redeem
pub async fn redeem_promo(
    State(shop): State<TransactionCoordinator>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Json(req): Json<RedeemPromoRequest>,
) -> Result<Json<ApiResponse<PromoCode>>, ApiError> {
    let promo = shop.redeem_promo(actor, &req.code).await?;
    Ok(ApiResponse::ok(promo))
}

/// POST /api/shop/resets - Ask for a dispensed key to be reset
pub async fn request_key_reset(
    State(shop): State<TransactionCoordinator>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Json(req): Json<KeyResetRequest>,
) -> Result<(StatusCode, Json<ApiResponse<ResetEntry>>), ApiError> {
    let entry = shop.request_key_reset(actor, &req.key).await?;
    Ok((StatusCode::CREATED, ApiResponse::ok(entry)))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    /// Defaults to the caller
    pub user_id: Option<u64>,
}

/// GET /api/shop/purchases
pub async fn purchase_history(
    State(shop): State<TransactionCoordinator>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<ApiResponse<Vec<Purchase>>>, ApiError> {
    let user_id = query.user_id.unwrap_or(actor.user_id);
    let purchases = shop.purchases_for(actor, user_id).await?;
    Ok(ApiResponse::ok(purchases))
}

/// GET /api/shop/topups
pub async fn topup_history(
    State(shop): State<TransactionCoordinator>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<ApiResponse<Vec<TopupRequest>>>, ApiError> {
    let user_id = query.user_id.unwrap_or(actor.user_id);
    let requests = shop.user_topups(actor, user_id).await?;
    Ok(ApiResponse::ok(requests))
}

/// GET /api/shop/catalog
pub async fn catalog(
    State(shop): State<TransactionCoordinator>,
) -> Json<ApiResponse<Catalog>> {
    ApiResponse::ok(shop.catalog().as_ref().clone())
}
