use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts},
    middleware::Next,
    response::Response,
};
use service_core::error::AppError;
use uuid::Uuid;

use crate::{
    models::User,
    services::{AccessTokenClaims, ServiceError},
    AppState,
};

/// Extract the bearer token from the Authorization header.
pub fn bearer_token(headers: &axum::http::HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Middleware to require authentication.
///
/// Revoked tokens are rejected before signature checks, and a blacklist
/// outage rejects the request rather than letting it through.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = bearer_token(req.headers())
        .ok_or_else(|| {
            AppError::Unauthorized(anyhow::anyhow!("Missing or invalid Authorization header"))
        })?
        .to_string();

    let authenticated = state
        .auth_service
        .authenticate(&token)
        .await
        .map_err(|e| {
            if !e.is_operational() {
                tracing::error!(error = %e, "Authentication check failed");
            }
            AppError::from(e)
        })?;

    req.extensions_mut().insert(AuthUser {
        claims: authenticated.claims,
        user: authenticated.user,
        token,
    });

    Ok(next.run(req).await)
}

/// Authenticated caller, placed in request extensions by `auth_middleware`.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub claims: AccessTokenClaims,
    pub user: User,
    /// The raw access token, kept so logout can revoke it.
    pub token: String,
}

impl AuthUser {
    pub fn user_id(&self) -> Uuid {
        self.claims.sub
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .ok_or_else(|| {
                AppError::from(ServiceError::Internal(anyhow::anyhow!(
                    "Auth claims missing from request extensions"
                )))
            })
    }
}
