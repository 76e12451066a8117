//! HTTP rate limiting middleware
//!
//! Fixed one-minute windows per client, reported through `X-RateLimit-*`
//! headers.

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::RwLock;

const WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
struct Window {
    started: Instant,
    count: u32,
}

/// Outcome of one rate-limit check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Seconds until the current window resets
    pub reset_secs: u64,
}

/// Rate limiter state
#[derive(Clone)]
pub struct RateLimiter {
    windows: Arc<RwLock<HashMap<String, Window>>>,
    limit: u32,
}

impl RateLimiter {
    /// Create a new limiter allowing `limit` requests per minute
    pub fn per_minute(limit: u32) -> Self {
        Self {
            windows: Arc::new(RwLock::new(HashMap::new())),
            limit: limit.max(1),
        }
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Count a request against `key`
    pub async fn check(&self, key: &str) -> RateDecision {
        self.check_at(key, Instant::now()).await
    }

    pub async fn check_at(&self, key: &str, now: Instant) -> RateDecision {
        let mut windows = self.windows.write().await;
        let window = windows.entry(key.to_string()).or_insert(Window {
            started: now,
            count: 0,
        });

        if now.duration_since(window.started) >= WINDOW {
            window.started = now;
            window.count = 0;
        }

        let reset_secs = WINDOW
            .saturating_sub(now.duration_since(window.started))
            .as_secs()
            .max(1);

        if window.count >= self.limit {
            return RateDecision {
                allowed: false,
                limit: self.limit,
                remaining: 0,
                reset_secs,
            };
        }

        window.count += 1;
        RateDecision {
            allowed: true,
            limit: self.limit,
            remaining: self.limit - window.count,
            reset_secs,
        }
    }

    /// Drop windows that have expired. Returns how many were removed.
    pub async fn cleanup(&self) -> usize {
        let mut windows = self.windows.write().await;
        let now = Instant::now();
        let before = windows.len();
        windows.retain(|_, w| now.duration_since(w.started) < WINDOW);
        before - windows.len()
    }
}

fn apply_headers(headers: &mut HeaderMap, decision: &RateDecision) {
    headers.insert("x-ratelimit-limit", HeaderValue::from(decision.limit));
    headers.insert("x-ratelimit-remaining", HeaderValue::from(decision.remaining));
    headers.insert("x-ratelimit-reset", HeaderValue::from(decision.reset_secs));
}

/// Middleware for `axum::middleware::from_fn_with_state`
pub async fn rate_limit(
    State(limiter): State<RateLimiter>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let client_key = extract_client_ip(&request);
    let decision = limiter.check(&client_key).await;

    if !decision.allowed {
        tracing::warn!(client = %client_key, limit = decision.limit, "Rate limit exceeded");
        let mut response = (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({
                "error": {
                    "code": "TOO_MANY_REQUESTS",
                    "message": "Too many requests. Please try again later."
                }
            })),
        )
            .into_response();
        apply_headers(response.headers_mut(), &decision);
        response
            .headers_mut()
            .insert(header::RETRY_AFTER, HeaderValue::from(decision.reset_secs));
        return response;
    }

    let mut response = next.run(request).await;
    apply_headers(response.headers_mut(), &decision);
    response
}

/// Extract client IP from request headers
pub(crate) fn extract_client_ip(request: &Request<Body>) -> String {
    if let Some(forwarded) = request.headers().get("x-forwarded-for") {
        if let Ok(s) = forwarded.to_str() {
            if let Some(ip) = s.split(',').next() {
                return ip.trim().to_string();
            }
        }
    }

    if let Some(real_ip) = request.headers().get("x-real-ip") {
        if let Ok(s) = real_ip.to_str() {
            return s.to_string();
        }
    }

    "unknown".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_window_limit() {
        let limiter = RateLimiter::per_minute(3);
        let now = Instant::now();

        for expected_remaining in [2, 1, 0] {
            let decision = limiter.check_at("client", now).await;
            assert!(decision.allowed);
            assert_eq!(decision.remaining, expected_remaining);
        }
        assert!(!limiter.check_at("client", now).await.allowed);

        // next window
        let later = now + WINDOW;
        assert!(limiter.check_at("client", later).await.allowed);
    }

    #[tokio::test]
    async fn test_clients_are_independent() {
        let limiter = RateLimiter::per_minute(1);
        assert!(limiter.check("client-a").await.allowed);
        assert!(limiter.check("client-b").await.allowed);
        assert!(!limiter.check("client-a").await.allowed);
    }

    #[tokio::test]
    async fn test_cleanup_keeps_live_windows() {
        let limiter = RateLimiter::per_minute(5);
        limiter.check("client").await;
        assert_eq!(limiter.cleanup().await, 0);
    }
}
