//! Chat gateway handlers
//!
//! A chat front end links an external account to a shop account, then
//! drives that account's conversation state through these endpoints.

use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::ApiResponse;
use crate::auth::{AuthService, LoginResponse};
use crate::coordinator::TransactionCoordinator;
use crate::error::{ApiError, ShopError};
use crate::middleware::AuthenticatedActor;
use crate::session::{ChatFlow, ChatInput, SessionRegistry};

#[derive(Debug, Deserialize, Validate)]
pub struct LinkAccountRequest {
    pub external_id: i64,
    #[validate(length(min = 1))]
    pub username: String,
    #[validate(length(min = 1))]
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct FlowResponse {
    pub external_id: i64,
    pub flow: ChatFlow,
}

/// POST /api/chat/link - Bind a chat account and issue a token for it
pub async fn link_account(
    State(shop): State<TransactionCoordinator>,
    State(auth): State<AuthService>,
    State(sessions): State<SessionRegistry>,
    Json(req): Json<LinkAccountRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    req.validate()?;
    let user = shop
        .users()
        .bind_external_account(req.external_id, &req.username, &req.password)
        .await
        .map_err(|e| match e {
            ShopError::Validation(msg) => ApiError::Unauthorized(msg),
            other => other.into(),
        })?;
    sessions.reset(req.external_id).await;
    Ok(Json(auth.issue(&user)?))
}

/// POST /api/chat/unlink
pub async fn unlink_account(
    State(shop): State<TransactionCoordinator>,
    State(sessions): State<SessionRegistry>,
    AuthenticatedActor(actor): AuthenticatedActor,
) -> Result<StatusCode, ApiError> {
    let external_id = linked_account(&shop, actor.user_id).await?;
    shop.users().unbind_external_account(external_id).await?;
    sessions.reset(external_id).await;
    tracing::info!(user_id = actor.user_id, external_id, "Chat account unlinked");
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/chat/flow
pub async fn current_flow(
    State(shop): State<TransactionCoordinator>,
    State(sessions): State<SessionRegistry>,
    AuthenticatedActor(actor): AuthenticatedActor,
) -> Result<Json<ApiResponse<FlowResponse>>, ApiError> {
    let external_id = linked_account(&shop, actor.user_id).await?;
    let flow = sessions.current(external_id).await;
    Ok(ApiResponse::ok(FlowResponse { external_id, flow }))
}

/// POST /api/chat/flow - Feed one input to the conversation state machine
pub async fn advance_flow(
    State(shop): State<TransactionCoordinator>,
    State(sessions): State<SessionRegistry>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Json(input): Json<ChatInput>,
) -> Result<Json<ApiResponse<FlowResponse>>, ApiError> {
    let external_id = linked_account(&shop, actor.user_id).await?;
    let flow = sessions.advance(external_id, input).await?;
    Ok(ApiResponse::ok(FlowResponse { external_id, flow }))
}

async fn linked_account(shop: &TransactionCoordinator, user_id: u64) -> Result<i64, ApiError> {
    let user = shop.users().get(user_id).await?;
    user.external_account_id
        .ok_or_else(|| ShopError::validation("No chat account linked").into())
}
