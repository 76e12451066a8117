//! Route definitions for the shop API

mod admin;
mod auth;
mod chat;
mod shop;

pub use admin::admin_routes;
pub use auth::auth_routes;
pub use chat::chat_routes;
pub use shop::shop_routes;

use axum::{middleware::from_fn_with_state, routing::get, Router};

use crate::handlers::health_check;
use crate::middleware::{rate_limit, request_tracing};
use crate::state::AppState;
use crate::websocket::ws_handler;

/// Full application router without CORS, which `main` adds from config
pub fn app_router(state: AppState) -> Router {
    let api = Router::new()
        .merge(auth_routes(&state))
        .merge(chat_routes(&state))
        .merge(shop_routes())
        .merge(admin_routes())
        .layer(from_fn_with_state(state.api_limiter.clone(), rate_limit));

    Router::new()
        .route("/health", get(health_check))
        .route("/ws", get(ws_handler))
        .nest("/api", api)
        .with_state(state)
        .layer(axum::middleware::from_fn(request_tracing))
}
