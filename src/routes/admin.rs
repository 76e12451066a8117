//! Staff and admin routes

use axum::{
    routing::{get, post, put},
    Router,
};

use crate::handlers::admin;
use crate::state::AppState;

pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/admin/topups", get(admin::list_topups))
        .route("/admin/topups/pending", get(admin::pending_topups))
        .route("/admin/topups/stats", get(admin::topup_stats))
        .route("/admin/topups/:id/approve", post(admin::approve_topup))
        .route("/admin/topups/:id/reject", post(admin::reject_topup))
        .route("/admin/stock", get(admin::stock_summary))
        .route("/admin/stock/generate", post(admin::generate_stock))
        .route("/admin/stock/import", post(admin::import_stock))
        .route("/admin/stock/remove", post(admin::remove_stock))
        .route("/admin/stock/clear", post(admin::clear_stock))
        .route("/admin/promo", get(admin::list_promos).post(admin::create_promo))
        .route(
            "/admin/promo/:code",
            put(admin::update_promo).delete(admin::delete_promo),
        )
        .route("/admin/promo/:code/toggle", post(admin::toggle_promo))
        .route("/admin/users", get(admin::list_users).post(admin::create_user))
        .route("/admin/users/:id", axum::routing::delete(admin::delete_user))
        .route("/admin/users/:id/balance", post(admin::adjust_balance))
        .route("/admin/users/:id/role", put(admin::set_role))
        .route("/admin/sales", get(admin::sales_summary))
        .route("/admin/resets", get(admin::list_resets))
        .route("/admin/resets/stats", get(admin::reset_stats))
}
