//! Chat gateway routes

use axum::{
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};

use crate::handlers::chat;
use crate::middleware::rate_limit;
use crate::state::AppState;

pub fn chat_routes(state: &AppState) -> Router<AppState> {
    let link = Router::new()
        .route("/chat/link", post(chat::link_account))
        .route_layer(from_fn_with_state(state.login_limiter.clone(), rate_limit));

    Router::new()
        .merge(link)
        .route("/chat/unlink", post(chat::unlink_account))
        .route("/chat/flow", get(chat::current_flow).post(chat::advance_flow))
}
