//! Password hashing with bcrypt

use crate::error::{ShopError, ShopResult};

pub use bcrypt::DEFAULT_COST;

/// Cheapest cost bcrypt accepts, for tests and fixtures
pub const MIN_COST: u32 = 4;

pub fn hash_password(password: &str, cost: u32) -> ShopResult<String> {
    bcrypt::hash(password, cost)
        .map_err(|e| ShopError::Persistence(format!("Password hashing failed: {}", e)))
}

/// A malformed stored hash counts as a mismatch
pub fn verify_password(password: &str, hash: &str) -> bool {
    bcrypt::verify(password, hash).unwrap_or(false)
}
