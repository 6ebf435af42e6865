use axum::{extract::State, response::IntoResponse, Json};
use service_core::error::AppError;

use crate::{
    dtos::auth::{
        AuthResponse, LoginRequest, LogoutAllResponse, LogoutRequest, MessageResponse,
        RefreshRequest, SessionsResponse, TokenResponse,
    },
    middleware::AuthUser,
    models::{ClientInfo, SessionInfo},
    utils::ValidatedJson,
    AppState,
};

/// Login with email and password
#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = AuthResponse),
        (status = 401, description = "Invalid credentials", body = ErrorResponse),
        (status = 403, description = "Account temporarily locked", body = ErrorResponse),
        (status = 429, description = "Too many requests", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn login(
    State(state): State<AppState>,
    client: ClientInfo,
    ValidatedJson(req): ValidatedJson<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let outcome = state
        .auth_service
        .login(&req.email, &req.password, &client)
        .await?;
    Ok(Json(AuthResponse::from(outcome)))
}

/// Exchange a refresh token for a new token pair
///
/// The presented refresh token is consumed; presenting it again fails.
#[utoipa::path(
    post,
    path = "/auth/refresh",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "Token refreshed successfully", body = TokenResponse),
        (status = 401, description = "Invalid or expired session", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn refresh(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<RefreshRequest>,
) -> Result<impl IntoResponse, AppError> {
    let tokens = state.auth_service.refresh(&req.refresh_token).await?;
    Ok(Json(TokenResponse::from(tokens)))
}

/// Logout: revoke the access token and end the current session
#[utoipa::path(
    post,
    path = "/auth/logout",
    request_body = LogoutRequest,
    responses(
        (status = 200, description = "Logged out successfully", body = MessageResponse),
        (status = 401, description = "Invalid token", body = ErrorResponse)
    ),
    tag = "Authentication",
    security(("bearer_auth" = []))
)]
pub async fn logout(
    State(state): State<AppState>,
    user: AuthUser,
    body: Option<Json<LogoutRequest>>,
) -> impl IntoResponse {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    state
        .auth_service
        .logout(Some(&user.token), req.refresh_token.as_deref())
        .await;
    tracing::info!(user_id = %user.user_id(), "User logged out");
    Json(MessageResponse::new("Logged out successfully"))
}

/// End every session of the current user
#[utoipa::path(
    post,
    path = "/auth/logout-all",
    responses(
        (status = 200, description = "All sessions terminated", body = LogoutAllResponse),
        (status = 401, description = "Invalid token", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "Authentication",
    security(("bearer_auth" = []))
)]
pub async fn logout_all(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse, AppError> {
    // Outstanding access tokens stay valid until they expire.
    let count = state.auth_service.logout_all(user.user_id()).await?;

    Ok(Json(LogoutAllResponse {
        message: "Logged out from all devices".to_string(),
        sessions_terminated: count,
    }))
}

/// List active sessions of the current user, most recent first
#[utoipa::path(
    get,
    path = "/auth/sessions",
    responses(
        (status = 200, description = "Active sessions", body = SessionsResponse),
        (status = 401, description = "Invalid token", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "Authentication",
    security(("bearer_auth" = []))
)]
pub async fn list_sessions(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse, AppError> {
    let sessions = state
        .auth_service
        .list_sessions(user.user_id())
        .await?
        .into_iter()
        .map(SessionInfo::from)
        .collect();

    Ok(Json(SessionsResponse {
        sessions,
        max_sessions: state.config.session.max_sessions_per_user,
    }))
}
