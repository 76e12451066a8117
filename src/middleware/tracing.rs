//! Request tracing middleware
//!
//! Every request runs inside an `http_request` span carrying a request id.
//! The id is taken from `x-request-id` when the client sends one and is
//! echoed back on the response.

use axum::{
    extract::Request,
    http::{HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use std::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

use super::rate_limiter::extract_client_ip;

const REQUEST_ID: &str = "x-request-id";

pub async fn request_tracing(request: Request, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty() && v.len() <= 64)
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let span = tracing::info_span!(
        "http_request",
        request_id = %request_id,
        method = %request.method(),
        path = %request.uri().path(),
        client_ip = %extract_client_ip(&request),
    );

    async move {
        let start = Instant::now();
        let mut response = next.run(request).await;
        let status = response.status().as_u16();
        let duration_ms = start.elapsed().as_millis() as u64;

        match status {
            500..=599 => tracing::error!(status, duration_ms, "Request failed"),
            // shop rejections (stock, balance, promo) are routine
            400..=499 => tracing::debug!(status, duration_ms, "Request rejected"),
            _ => tracing::info!(status, duration_ms, "Request completed"),
        }

        if let Ok(value) = HeaderValue::from_str(&request_id) {
            response
                .headers_mut()
                .insert(HeaderName::from_static(REQUEST_ID), value);
        }
        response
    }
    .instrument(span)
    .await
}
