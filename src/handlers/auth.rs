//! Authentication and account HTTP handlers

use axum::{extract::State, Json};
use serde::Deserialize;
use validator::Validate;

use super::ApiResponse;
use crate::auth::{AuthService, LoginRequest, LoginResponse};
use crate::coordinator::TransactionCoordinator;
use crate::error::ApiError;
use crate::middleware::AuthenticatedActor;
use crate::users::{Location, UserProfile};

/// POST /api/auth/login - Exchange username and password for a bearer token
pub async fn login(
    State(auth): State<AuthService>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    req.validate()?;
    let response = auth.login(&req.username, &req.password).await?;
    Ok(Json(response))
}

/// GET /api/me - Current user's profile and balance
pub async fn me(
    State(shop): State<TransactionCoordinator>,
    AuthenticatedActor(actor): AuthenticatedActor,
) -> Result<Json<ApiResponse<UserProfile>>, ApiError> {
    let user = shop.users().get(actor.user_id).await?;
    Ok(ApiResponse::ok(UserProfile::from(&user)))
}

#[derive(Debug, Deserialize)]
pub struct UpdateProfileRequest {
    pub phone: Option<String>,
    pub location: Option<Location>,
}

/// PUT /api/me/profile - Record contact details
pub async fn update_profile(
    State(shop): State<TransactionCoordinator>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Json(req): Json<UpdateProfileRequest>,
) -> Result<Json<ApiResponse<UserProfile>>, ApiError> {
    let user = shop
        .users()
        .update_profile(actor.user_id, req.phone, req.location)
        .await?;
    Ok(ApiResponse::ok(UserProfile::from(&user)))
}
