use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use tracing::instrument;
use uuid::Uuid;

use super::dto::{ResolveResponse, ShortLinkResponse};
use crate::{auth::extractors::AuthUser, errors::AppResult, state::AppState};

pub fn owner_routes() -> Router<AppState> {
    Router::new().route(
        "/curricula/:id/short-link",
        post(create_short_link).put(regenerate_short_link),
    )
}

pub fn public_routes() -> Router<AppState> {
    Router::new().route("/s/:code", get(resolve_short_link))
}

#[instrument(skip(state, user), fields(user_id = %user.id))]
pub async fn create_short_link(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(curriculum_id): Path<Uuid>,
) -> AppResult<Json<ShortLinkResponse>> {
    let link = state.short_links.create_for(user.id, curriculum_id).await?;
    Ok(Json(ShortLinkResponse {
        success: true,
        message: "Short link ready".into(),
        link,
    }))
}

#[instrument(skip(state, user), fields(user_id = %user.id))]
pub async fn regenerate_short_link(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(curriculum_id): Path<Uuid>,
) -> AppResult<Json<ShortLinkResponse>> {
    let link = state.short_links.regenerate_for(user.id, curriculum_id).await?;
    Ok(Json(ShortLinkResponse {
        success: true,
        message: "Short link regenerated".into(),
        link,
    }))
}

#[instrument(skip(state))]
pub async fn resolve_short_link(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> AppResult<Json<ResolveResponse>> {
    let curriculum_id = state.short_links.resolve(&code).await?;
    Ok(Json(ResolveResponse {
        success: true,
        message: "Short link resolved".into(),
        curriculum_id,
    }))
}
