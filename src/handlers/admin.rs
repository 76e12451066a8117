//! Staff and admin handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use rust_decimal::Decimal;
use serde::Serialize;
use validator::Validate;

use super::ApiResponse;
use crate::coordinator::{GeneratedStock, SalesSummary, TopupDecisionOutcome, TransactionCoordinator};
use crate::error::ApiError;
use crate::middleware::AuthenticatedActor;
use crate::promo::{NewPromo, PromoCode, PromoListing, PromoUpdate};
use crate::resets::{ResetListQuery, ResetPage, ResetStats};
use crate::stock::{
    AddKeysOutcome, ClearStockRequest, GenerateStockRequest, ImportKeysRequest, RemoveOutcome,
    RemoveStockRequest, StockSummary,
};
use crate::topup::{
    ApproveTopupRequest, RejectTopupRequest, TopupListQuery, TopupRequest, TopupStats,
};
use crate::users::{AdjustBalanceRequest, CreateUserRequest, Role, SetRoleRequest, UserProfile};

// ============================================================================
// Top-ups
// ============================================================================

/// GET /api/admin/topups?status=pending
pub async fn list_topups(
    State(shop): State<TransactionCoordinator>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Query(query): Query<TopupListQuery>,
) -> Result<Json<ApiResponse<Vec<TopupRequest>>>, ApiError> {
    let requests = shop.list_topups(actor, query.status).await?;
    Ok(ApiResponse::ok(requests))
}

/// GET /api/admin/topups/pending - Review queue, oldest first
pub async fn pending_topups(
    State(shop): State<TransactionCoordinator>,
    AuthenticatedActor(actor): AuthenticatedActor,
) -> Result<Json<ApiResponse<Vec<TopupRequest>>>, ApiError> {
    let requests = shop.pending_topups(actor).await?;
    Ok(ApiResponse::ok(requests))
}

pub async fn topup_stats(
    State(shop): State<TransactionCoordinator>,
    AuthenticatedActor(actor): AuthenticatedActor,
) -> Result<Json<ApiResponse<TopupStats>>, ApiError> {
    let stats = shop.topup_stats(actor).await?;
    Ok(ApiResponse::ok(stats))
}

/// POST /api/admin/topups/:id/approve
pub async fn approve_topup(
    State(shop): State<TransactionCoordinator>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(topup_id): Path<u64>,
    Json(req): Json<ApproveTopupRequest>,
) -> Result<Json<ApiResponse<TopupDecisionOutcome>>, ApiError> {
    let outcome = shop.approve_topup(actor, topup_id, req.amount).await?;
    Ok(ApiResponse::ok(outcome))
}

/// POST /api/admin/topups/:id/reject
pub async fn reject_topup(
    State(shop): State<TransactionCoordinator>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(topup_id): Path<u64>,
    body: Option<Json<RejectTopupRequest>>,
) -> Result<Json<ApiResponse<TopupDecisionOutcome>>, ApiError> {
    let reason = body.and_then(|Json(req)| req.reason);
    let outcome = shop.reject_topup(actor, topup_id, reason).await?;
    Ok(ApiResponse::ok(outcome))
}

// ============================================================================
// Stock
// ============================================================================

pub async fn stock_summary(
    State(shop): State<TransactionCoordinator>,
    AuthenticatedActor(actor): AuthenticatedActor,
) -> Result<Json<ApiResponse<StockSummary>>, ApiError> {
    let summary = shop.stock_summary(actor).await?;
    Ok(ApiResponse::ok(summary))
}

/// POST /api/admin/stock/generate
pub async fn generate_stock(
    State(shop): State<TransactionCoordinator>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Json(req): Json<GenerateStockRequest>,
) -> Result<(StatusCode, Json<ApiResponse<GeneratedStock>>), ApiError> {
    req.validate()?;
    let generated = shop
        .admin_add_stock(actor, &req.category, &req.product, &req.duration, req.count)
        .await?;
    Ok((StatusCode::CREATED, ApiResponse::ok(generated)))
}

/// POST /api/admin/stock/import
pub async fn import_stock(
    State(shop): State<TransactionCoordinator>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Json(req): Json<ImportKeysRequest>,
) -> Result<Json<ApiResponse<AddKeysOutcome>>, ApiError> {
    req.validate()?;
    let outcome = shop
        .import_keys(actor, &req.category, &req.product, &req.duration, req.keys)
        .await?;
    Ok(ApiResponse::ok(outcome))
}

pub async fn remove_stock(
    State(shop): State<TransactionCoordinator>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Json(req): Json<RemoveStockRequest>,
) -> Result<Json<ApiResponse<RemoveOutcome>>, ApiError> {
    let outcome = shop
        .remove_stock(actor, &req.category, &req.product, &req.duration, req.count)
        .await?;
    Ok(ApiResponse::ok(outcome))
}

#[derive(Debug, Serialize)]
pub struct ClearedStock {
    pub cleared: usize,
}

pub async fn clear_stock(
    State(shop): State<TransactionCoordinator>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Json(req): Json<ClearStockRequest>,
) -> Result<Json<ApiResponse<ClearedStock>>, ApiError> {
    let cleared = shop
        .clear_stock(actor, &req.category, &req.product, req.duration.as_deref())
        .await?;
    Ok(ApiResponse::ok(ClearedStock { cleared }))
}

// ============================================================================
// Promo codes
// ============================================================================

pub async fn list_promos(
    State(shop): State<TransactionCoordinator>,
    AuthenticatedActor(actor): AuthenticatedActor,
) -> Result<Json<ApiResponse<Vec<PromoListing>>>, ApiError> {
    let promos = shop.list_promos(actor).await?;
    Ok(ApiResponse::ok(promos))
}

pub async fn create_promo(
    State(shop): State<TransactionCoordinator>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Json(req): Json<NewPromo>,
) -> Result<(StatusCode, Json<ApiResponse<PromoCode>>), ApiError> {
    let promo = shop.create_promo(actor, req).await?;
    Ok((StatusCode::CREATED, ApiResponse::ok(promo)))
}

pub async fn update_promo(
    State(shop): State<TransactionCoordinator>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(code): Path<String>,
    Json(req): Json<PromoUpdate>,
) -> Result<Json<ApiResponse<PromoCode>>, ApiError> {
    let promo = shop.update_promo(actor, &code, req).await?;
    Ok(ApiResponse::ok(promo))
}

pub async fn toggle_promo(
    State(shop): State<TransactionCoordinator>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(code): Path<String>,
) -> Result<Json<ApiResponse<PromoCode>>, ApiError> {
    let promo = shop.toggle_promo(actor, &code).await?;
    Ok(ApiResponse::ok(promo))
}

pub async fn delete_promo(
    State(shop): State<TransactionCoordinator>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(code): Path<String>,
) -> Result<StatusCode, ApiError> {
    shop.delete_promo(actor, &code).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Users
// ============================================================================

pub async fn list_users(
    State(shop): State<TransactionCoordinator>,
    AuthenticatedActor(actor): AuthenticatedActor,
) -> Result<Json<ApiResponse<Vec<UserProfile>>>, ApiError> {
    let users = shop.list_users(actor).await?;
    Ok(ApiResponse::ok(users))
}

pub async fn create_user(
    State(shop): State<TransactionCoordinator>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Json(req): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<ApiResponse<UserProfile>>), ApiError> {
    req.validate()?;
    let user = shop
        .create_user(
            actor,
            &req.username,
            &req.password,
            req.role.unwrap_or(Role::User),
        )
        .await?;
    Ok((StatusCode::CREATED, ApiResponse::ok(user)))
}

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub user_id: u64,
    pub balance: Decimal,
}

/// POST /api/admin/users/:id/balance
pub async fn adjust_balance(
    State(shop): State<TransactionCoordinator>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(user_id): Path<u64>,
    Json(req): Json<AdjustBalanceRequest>,
) -> Result<Json<ApiResponse<BalanceResponse>>, ApiError> {
    let balance = shop
        .adjust_balance(actor, user_id, req.amount, req.direction)
        .await?;
    Ok(ApiResponse::ok(BalanceResponse { user_id, balance }))
}

/// PUT /api/admin/users/:id/role
pub async fn set_role(
    State(shop): State<TransactionCoordinator>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(user_id): Path<u64>,
    Json(req): Json<SetRoleRequest>,
) -> Result<Json<ApiResponse<UserProfile>>, ApiError> {
    let user = shop.set_role(actor, user_id, req.role).await?;
    Ok(ApiResponse::ok(user))
}

pub async fn delete_user(
    State(shop): State<TransactionCoordinator>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(user_id): Path<u64>,
) -> Result<StatusCode, ApiError> {
    shop.delete_user(actor, user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Reports
// ============================================================================

pub async fn sales_summary(
    State(shop): State<TransactionCoordinator>,
    AuthenticatedActor(actor): AuthenticatedActor,
) -> Result<Json<ApiResponse<SalesSummary>>, ApiError> {
    let summary = shop.sales_summary(actor).await?;
    Ok(ApiResponse::ok(summary))
}

/// GET /api/admin/resets?username=&page=&limit= - Newest first
pub async fn list_resets(
    State(shop): State<TransactionCoordinator>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Query(query): Query<ResetListQuery>,
) -> Result<Json<ApiResponse<ResetPage>>, ApiError> {
    let page = shop.list_resets(actor, query).await?;
    Ok(ApiResponse::ok(page))
}

pub async fn reset_stats(
    State(shop): State<TransactionCoordinator>,
    AuthenticatedActor(actor): AuthenticatedActor,
) -> Result<Json<ApiResponse<ResetStats>>, ApiError> {
    let stats = shop.reset_stats(actor).await?;
    Ok(ApiResponse::ok(stats))
}
