//! API handlers for the key shop
//!
//! Handlers only translate HTTP into coordinator calls. Capability checks
//! live in the coordinator.

pub mod admin;
pub mod auth;
pub mod chat;
pub mod shop;

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::coordinator::TransactionCoordinator;

/// Uniform JSON envelope for successful responses
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub storage: String,
    pub pending_writes: Vec<&'static str>,
    pub event_subscribers: usize,
}

/// GET /health
pub async fn health_check(
    State(shop): State<TransactionCoordinator>,
) -> (StatusCode, Json<HealthResponse>) {
    let pending_writes = shop.store().pending_writes().await;
    let status = if pending_writes.is_empty() {
        "healthy"
    } else {
        "degraded"
    };

    (
        StatusCode::OK,
        Json(HealthResponse {
            status,
            version: env!("CARGO_PKG_VERSION"),
            storage: shop.store().describe(),
            pending_writes,
            event_subscribers: shop.events().subscriber_count(),
        }),
    )
}
