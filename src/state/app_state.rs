//! Application state shared across handlers

use axum::extract::FromRef;

use crate::auth::AuthService;
use crate::coordinator::TransactionCoordinator;
use crate::middleware::RateLimiter;
use crate::session::SessionRegistry;
use crate::websocket::WsState;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub shop: TransactionCoordinator,
    pub auth_service: AuthService,
    pub sessions: SessionRegistry,
    pub ws_state: WsState,
    pub api_limiter: RateLimiter,
    pub login_limiter: RateLimiter,
}

impl AppState {
    pub fn new(
        shop: TransactionCoordinator,
        auth_service: AuthService,
        api_limiter: RateLimiter,
        login_limiter: RateLimiter,
    ) -> Self {
        let ws_state = WsState::new(shop.events().clone());
        Self {
            shop,
            auth_service,
            sessions: SessionRegistry::new(),
            ws_state,
            api_limiter,
            login_limiter,
        }
    }
}

impl FromRef<AppState> for WsState {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.ws_state.clone()
    }
}

impl FromRef<AppState> for TransactionCoordinator {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.shop.clone()
    }
}

impl FromRef<AppState> for AuthService {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.auth_service.clone()
    }
}

impl FromRef<AppState> for SessionRegistry {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.sessions.clone()
    }
}
