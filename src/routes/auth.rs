//! Authentication routes

use axum::{
    middleware::from_fn_with_state,
    routing::{get, post, put},
    Router,
};

use crate::handlers::auth;
use crate::middleware::rate_limit;
use crate::state::AppState;

/// Login is limited more strictly than the rest of the API
pub fn auth_routes(state: &AppState) -> Router<AppState> {
    let login = Router::new()
        .route("/auth/login", post(auth::login))
        .route_layer(from_fn_with_state(state.login_limiter.clone(), rate_limit));

    Router::new()
        .merge(login)
        .route("/me", get(auth::me))
        .route("/me/profile", put(auth::update_profile))
}
