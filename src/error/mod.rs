//! Error handling for the key shop
//!
//! `ShopError` is the domain taxonomy every ledger operation returns.
//! `ApiError` maps it onto HTTP status codes and a JSON error body.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;

use crate::promo::PromoRejection;
use crate::stock::BucketKey;
use crate::topup::{SpamRejection, TopupStatus};

/// Domain error returned by the transactional core
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ShopError {
    #[error("{0}")]
    Validation(String),

    #[error("Amount must be greater than 0 (got {0})")]
    InvalidAmount(Decimal),

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("Out of stock: {0}")]
    OutOfStock(BucketKey),

    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance {
        required: Decimal,
        available: Decimal,
    },

    #[error("Promo code rejected: {0}")]
    PromoInvalid(PromoRejection),

    #[error("Top-up #{topup_id} already {status}")]
    AlreadyProcessed { topup_id: u64, status: TopupStatus },

    #[error("Rate limited: {0}")]
    RateLimited(SpamRejection),

    #[error("Persistence failure: {0}")]
    Persistence(String),

    /// Raised when a purchase fails after a key left the stock ledger.
    #[error("Manual reconciliation required: {0}")]
    Reconciliation(String),
}

impl ShopError {
    pub fn validation(msg: impl Into<String>) -> Self {
        ShopError::Validation(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        ShopError::NotFound(what.into())
    }
}

/// API error type with HTTP status code mapping
#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Shop(#[from] ShopError),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Too many requests")]
    TooManyRequests,

    #[error("Internal server error: {0}")]
    InternalError(String),
}

/// JSON error response body
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

/// Error details in the response
#[derive(Serialize)]
pub struct ErrorDetails {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ApiError {
    /// Get the error code string
    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::Shop(err) => match err {
                ShopError::Validation(_) => "VALIDATION_ERROR",
                ShopError::InvalidAmount(_) => "INVALID_AMOUNT",
                ShopError::NotFound(_) => "NOT_FOUND",
                ShopError::Conflict(_) => "CONFLICT",
                ShopError::Forbidden(_) => "FORBIDDEN",
                ShopError::OutOfStock(_) => "OUT_OF_STOCK",
                ShopError::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
                ShopError::PromoInvalid(_) => "PROMO_INVALID",
                ShopError::AlreadyProcessed { .. } => "ALREADY_PROCESSED",
                ShopError::RateLimited(_) => "RATE_LIMITED",
                ShopError::Persistence(_) => "PERSISTENCE_ERROR",
                ShopError::Reconciliation(_) => "RECONCILIATION_REQUIRED",
            },
            ApiError::Unauthorized(_) => "UNAUTHORIZED",
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::TooManyRequests => "TOO_MANY_REQUESTS",
            ApiError::InternalError(_) => "INTERNAL_ERROR",
        }
    }

    /// Get the HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Shop(err) => match err {
                ShopError::Validation(_) | ShopError::InvalidAmount(_) => StatusCode::BAD_REQUEST,
                ShopError::NotFound(_) => StatusCode::NOT_FOUND,
                ShopError::Conflict(_) | ShopError::AlreadyProcessed { .. } => {
                    StatusCode::CONFLICT
                }
                ShopError::Forbidden(_) => StatusCode::FORBIDDEN,
                ShopError::OutOfStock(_) => StatusCode::GONE,
                ShopError::InsufficientBalance { .. } => StatusCode::PAYMENT_REQUIRED,
                ShopError::PromoInvalid(_) => StatusCode::UNPROCESSABLE_ENTITY,
                ShopError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
                ShopError::Persistence(_) => StatusCode::SERVICE_UNAVAILABLE,
                ShopError::Reconciliation(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            ApiError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn details(&self) -> Option<String> {
        match self {
            ApiError::Shop(ShopError::PromoInvalid(reason)) => Some(reason.code().to_string()),
            ApiError::Shop(ShopError::RateLimited(reason)) => {
                Some(format!("retry_after={}", reason.retry_after_secs()))
            }
            _ => None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_code = self.error_code();
        let message = self.to_string();

        match &self {
            ApiError::Shop(ShopError::Reconciliation(_)) => {
                tracing::error!(error = %message, code = %error_code, "Ledger needs manual reconciliation");
            }
            ApiError::Shop(ShopError::Persistence(_)) | ApiError::InternalError(_) => {
                tracing::error!(error = %message, code = %error_code, "Server error occurred");
            }
            _ => {
                tracing::debug!(error = %message, code = %error_code, "Client error occurred");
            }
        }

        let body = ErrorResponse {
            error: ErrorDetails {
                code: error_code.to_string(),
                details: self.details(),
                message,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(err: validator::ValidationErrors) -> Self {
        ApiError::Shop(ShopError::Validation(err.to_string()))
    }
}

impl From<base64::DecodeError> for ApiError {
    fn from(err: base64::DecodeError) -> Self {
        ApiError::BadRequest(format!("Invalid base64 image: {}", err))
    }
}

/// Result type alias using ApiError
pub type ApiResult<T> = Result<T, ApiError>;

/// Result type alias for core operations
pub type ShopResult<T> = Result<T, ShopError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            ApiError::from(ShopError::not_found("User")).error_code(),
            "NOT_FOUND"
        );
        assert_eq!(
            ApiError::from(ShopError::OutOfStock(BucketKey::new("Android", "Flourite", "7days")))
                .error_code(),
            "OUT_OF_STOCK"
        );
        assert_eq!(
            ApiError::from(ShopError::AlreadyProcessed {
                topup_id: 3,
                status: TopupStatus::Approved
            })
            .error_code(),
            "ALREADY_PROCESSED"
        );
        assert_eq!(ApiError::TooManyRequests.error_code(), "TOO_MANY_REQUESTS");
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            ApiError::from(ShopError::InsufficientBalance {
                required: Decimal::new(1000, 2),
                available: Decimal::ZERO,
            })
            .status_code(),
            StatusCode::PAYMENT_REQUIRED
        );
        assert_eq!(
            ApiError::from(ShopError::validation("bad")).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(ShopError::Reconciliation("x".into())).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ApiError::Unauthorized("no token".into()).status_code(),
            StatusCode::UNAUTHORIZED
        );
    }

    #[test]
    fn test_already_processed_message() {
        let err = ShopError::AlreadyProcessed {
            topup_id: 9,
            status: TopupStatus::Rejected,
        };
        assert_eq!(err.to_string(), "Top-up #9 already rejected");
    }
}
