//! Authentication
//!
//! - Password hashing for shop accounts
//! - JWT token generation and validation
//! - `AuthService` for issuing tokens after a credential check

mod jwt;
pub mod password;

pub use jwt::{generate_token, verify_token, Claims, JwtError};

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::{ApiError, ApiResult, ShopError};
use crate::users::{Actor, User, UserDirectory, UserProfile};

/// Why a bearer token did not yield an actor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenRejection {
    Expired,
    Invalid,
    /// Signature is fine but the account was deleted
    UnknownAccount,
    /// The user directory could not be read
    Unavailable(String),
}

impl TokenRejection {
    pub fn code(&self) -> &'static str {
        match self {
            TokenRejection::Expired => "TOKEN_EXPIRED",
            TokenRejection::Invalid | TokenRejection::UnknownAccount => "INVALID_TOKEN",
            TokenRejection::Unavailable(_) => "SERVICE_UNAVAILABLE",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            TokenRejection::Expired => "Token has expired",
            TokenRejection::Invalid => "Invalid token",
            TokenRejection::UnknownAccount => "Account no longer exists",
            TokenRejection::Unavailable(msg) => msg,
        }
    }
}

/// Issued access token
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
    pub user: UserProfile,
}

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(length(min = 1))]
    pub username: String,
    #[validate(length(min = 1))]
    pub password: String,
}

/// Token issuance over the user directory
#[derive(Clone)]
pub struct AuthService {
    users: UserDirectory,
    jwt_secret: String,
    token_ttl_seconds: i64,
}

impl AuthService {
    pub fn new(users: UserDirectory, jwt_secret: String, token_ttl_seconds: i64) -> Self {
        Self {
            users,
            jwt_secret,
            token_ttl_seconds,
        }
    }

    pub fn jwt_secret(&self) -> &str {
        &self.jwt_secret
    }

    /// Check credentials and issue an access token
    pub async fn login(&self, username: &str, password: &str) -> ApiResult<LoginResponse> {
        let user = self
            .users
            .authenticate(username, password)
            .await
            .map_err(|e| match e {
                ShopError::Validation(msg) => ApiError::Unauthorized(msg),
                other => other.into(),
            })?;
        self.issue(&user)
    }

    /// Verify a bearer token and resolve the caller.
    ///
    /// The role comes from the directory, so role changes and deletions take
    /// effect before the token expires.
    pub async fn authorize(&self, token: &str) -> Result<Actor, TokenRejection> {
        let claims = verify_token(token, &self.jwt_secret).map_err(|e| match e {
            JwtError::TokenExpired => TokenRejection::Expired,
            _ => TokenRejection::Invalid,
        })?;
        let user_id = claims.actor().map_err(|_| TokenRejection::Invalid)?.user_id;

        match self.users.get(user_id).await {
            Ok(user) => {
                if user.role != claims.role {
                    tracing::debug!(user_id, token_role = %claims.role, role = %user.role, "Role changed since token issue");
                }
                Ok(user.actor())
            }
            Err(ShopError::NotFound(_)) => Err(TokenRejection::UnknownAccount),
            Err(err) => Err(TokenRejection::Unavailable(err.to_string())),
        }
    }

    pub fn issue(&self, user: &User) -> ApiResult<LoginResponse> {
        let access_token = generate_token(user, &self.jwt_secret, self.token_ttl_seconds)
            .map_err(|e| ApiError::InternalError(e.to_string()))?;
        tracing::info!(user_id = user.id, role = %user.role, "Access token issued");
        Ok(LoginResponse {
            access_token,
            token_type: "Bearer",
            expires_in: self.token_ttl_seconds,
            user: user.into(),
        })
    }
}
