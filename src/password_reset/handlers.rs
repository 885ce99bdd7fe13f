use axum::{extract::State, routing::post, Json, Router};
use tracing::instrument;

use super::dto::{ConfirmResetBody, MessageResponse, RequestResetBody, ValidateTokenBody};
use super::services::PasswordResetResponse;
use crate::{errors::AppResult, state::AppState};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/password-reset/request", post(request_reset))
        .route("/password-reset/validate", post(validate_token))
        .route("/password-reset/confirm", post(confirm_reset))
}

#[instrument(skip_all)]
pub async fn request_reset(
    State(state): State<AppState>,
    Json(payload): Json<RequestResetBody>,
) -> AppResult<Json<PasswordResetResponse>> {
    let res = state.password_reset.request_reset(&payload.email).await?;
    Ok(Json(res))
}

#[instrument(skip_all)]
pub async fn validate_token(
    State(state): State<AppState>,
    Json(payload): Json<ValidateTokenBody>,
) -> AppResult<Json<MessageResponse>> {
    let valid = state.password_reset.validate_token(&payload.token).await?;
    let message = if valid { "Token is valid" } else { "Invalid or expired token" };
    Ok(Json(MessageResponse {
        success: valid,
        message: message.into(),
    }))
}

#[instrument(skip_all)]
pub async fn confirm_reset(
    State(state): State<AppState>,
    Json(payload): Json<ConfirmResetBody>,
) -> AppResult<Json<MessageResponse>> {
    state
        .password_reset
        .reset_password(&payload.token, &payload.new_password)
        .await?;
    Ok(Json(MessageResponse {
        success: true,
        message: "Password has been reset".into(),
    }))
}
