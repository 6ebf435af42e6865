use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use service_core::error::AppError;

use crate::{
    dtos::auth::{AuthResponse, GoogleSignInRequest},
    models::ClientInfo,
    utils::ValidatedJson,
    AppState,
};

/// Sign in with a Google ID token
///
/// Links to an existing account by Google id or email, or creates one.
#[utoipa::path(
    post,
    path = "/auth/google",
    request_body = GoogleSignInRequest,
    responses(
        (status = 200, description = "Signed in to an existing account", body = AuthResponse),
        (status = 201, description = "Account created", body = AuthResponse),
        (status = 401, description = "ID token rejected", body = ErrorResponse),
        (status = 403, description = "Account is no longer active", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn google_sign_in(
    State(state): State<AppState>,
    client: ClientInfo,
    ValidatedJson(req): ValidatedJson<GoogleSignInRequest>,
) -> Result<impl IntoResponse, AppError> {
    let outcome = state
        .auth_service
        .federated_sign_in(&req.id_token, &client)
        .await?;

    let status = if outcome.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(AuthResponse::from(outcome))))
}
