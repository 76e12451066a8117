//! Bearer-token extractor
//!
//! Resolves the calling `Actor` for a request. Capability checks happen in
//! the coordinator, not here.

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use serde_json::json;

use crate::auth::{AuthService, TokenRejection};
use crate::users::Actor;

/// Caller identity extracted from the Authorization header
///
/// ```rust,ignore
/// async fn balance(AuthenticatedActor(actor): AuthenticatedActor) -> String {
///     format!("user {} as {}", actor.user_id, actor.role)
/// }
/// ```
#[derive(Debug, Clone, Copy)]
pub struct AuthenticatedActor(pub Actor);

/// Rejection body: `{"error": {"code", "message"}}`, matching `ApiError`
pub struct AuthRejection {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl AuthRejection {
    fn missing_token() -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            code: "MISSING_TOKEN",
            message: "Authorization header with Bearer token required".to_string(),
        }
    }
}

impl From<TokenRejection> for AuthRejection {
    fn from(rejection: TokenRejection) -> Self {
        let status = match rejection {
            TokenRejection::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::UNAUTHORIZED,
        };
        Self {
            status,
            code: rejection.code(),
            message: rejection.message().to_string(),
        }
    }
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(code = self.code, error = %self.message, "Could not resolve caller");
        }
        let body = json!({ "error": { "code": self.code, "message": self.message } });
        (self.status, Json(body)).into_response()
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedActor
where
    AuthService: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AuthRejection;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| AuthRejection::missing_token())?;

        let actor = AuthService::from_ref(state)
            .authorize(bearer.token())
            .await?;
        Ok(AuthenticatedActor(actor))
    }
}
