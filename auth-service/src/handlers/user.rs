use axum::{extract::State, response::IntoResponse, Json};
use service_core::error::AppError;

use crate::{middleware::AuthUser, models::UserResponse, AppState};

/// Current user profile
#[utoipa::path(
    get,
    path = "/auth/me",
    responses(
        (status = 200, description = "Current user", body = UserResponse),
        (status = 401, description = "Invalid token", body = ErrorResponse),
        (status = 404, description = "User not found", body = ErrorResponse)
    ),
    tag = "User",
    security(("bearer_auth" = []))
)]
pub async fn get_me(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse, AppError> {
    let user = state.auth_service.me(user.user_id()).await?;
    Ok(Json(user.sanitized()))
}
