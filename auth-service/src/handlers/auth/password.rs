use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;

use crate::{
    dtos::auth::{
        AuthResponse, ChangePasswordRequest, EmailRequest, MessageResponse, ResetPasswordRequest,
    },
    middleware::AuthUser,
    models::ClientInfo,
    utils::ValidatedJson,
    AppState,
};

/// Request a password reset email
///
/// Responds identically whether or not the email is registered.
#[utoipa::path(
    post,
    path = "/auth/forgot-password",
    request_body = EmailRequest,
    responses(
        (status = 200, description = "Reset email sent if the account exists", body = MessageResponse),
        (status = 400, description = "Validation error", body = ErrorResponse),
        (status = 429, description = "Too many requests", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn forgot_password(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<EmailRequest>,
) -> Result<impl IntoResponse, AppError> {
    state.auth_service.request_password_reset(&req.email).await?;
    Ok(Json(MessageResponse::new(
        "If an account exists with that email, a password reset link has been sent",
    )))
}

/// Set a new password using a reset token
///
/// Ends every existing session and signs the caller in on a new one.
#[utoipa::path(
    post,
    path = "/auth/reset-password/{token}",
    params(("token" = String, Path, description = "Reset token from the email link")),
    request_body = ResetPasswordRequest,
    responses(
        (status = 200, description = "Password reset", body = AuthResponse),
        (status = 400, description = "Invalid or expired token", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn reset_password(
    State(state): State<AppState>,
    Path(token): Path<String>,
    client: ClientInfo,
    ValidatedJson(req): ValidatedJson<ResetPasswordRequest>,
) -> Result<impl IntoResponse, AppError> {
    let outcome = state
        .auth_service
        .confirm_password_reset(&token, &req.password, &client)
        .await?;
    Ok(Json(AuthResponse::from(outcome)))
}

/// Change the password of the current user
#[utoipa::path(
    post,
    path = "/auth/change-password",
    request_body = ChangePasswordRequest,
    responses(
        (status = 200, description = "Password changed", body = MessageResponse),
        (status = 400, description = "Validation error or no password set", body = ErrorResponse),
        (status = 401, description = "Current password incorrect", body = ErrorResponse)
    ),
    tag = "Authentication",
    security(("bearer_auth" = []))
)]
pub async fn change_password(
    State(state): State<AppState>,
    user: AuthUser,
    ValidatedJson(req): ValidatedJson<ChangePasswordRequest>,
) -> Result<impl IntoResponse, AppError> {
    state
        .auth_service
        .change_password(user.user_id(), &req.current_password, &req.new_password)
        .await?;
    Ok(Json(MessageResponse::new("Password changed successfully")))
}
