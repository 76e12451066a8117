//! Middleware for the shop API
//!
//! Request tracing, rate limiting and the authenticated-actor extractor.

pub mod auth;
mod rate_limiter;
mod tracing;

pub use auth::AuthenticatedActor;
pub use rate_limiter::{rate_limit, RateDecision, RateLimiter};
pub use tracing::request_tracing;
