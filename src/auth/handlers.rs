use axum::{
    extract::{FromRef, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tracing::{info, instrument, warn};

use crate::{
    auth::{
        claims::UserClaims,
        dto::{AuthResponse, LoginRequest, RegisterRequest},
        extractors::AuthUser,
        is_valid_email,
        jwt::JwtKeys,
        normalize_email,
        password::{hash_password, is_strong_enough, verify_password, MIN_PASSWORD_LENGTH},
        repo_types::User,
    },
    errors::{AppError, AppResult},
    repository::RepoError,
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
}

pub fn me_routes() -> Router<AppState> {
    Router::new().route("/me", get(get_me))
}

fn issue(state: &AppState, user: &User) -> AppResult<AuthResponse> {
    let keys = JwtKeys::from_ref(state);
    let claims = UserClaims::from(user);
    let access_token = keys.sign(&claims)?;
    Ok(AuthResponse {
        access_token,
        token_type: "Bearer",
        expires_in: keys.expires_in_secs(),
        user: claims,
    })
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> AppResult<(StatusCode, Json<AuthResponse>)> {
    let email = normalize_email(&payload.email);
    let name = payload.name.trim().to_string();

    if !is_valid_email(&email) {
        warn!(email = %email, "invalid email");
        return Err(AppError::validation("Invalid email"));
    }
    if name.is_empty() {
        return Err(AppError::validation("Name is required"));
    }
    if !is_strong_enough(&payload.password) {
        warn!("password too short");
        return Err(AppError::validation(format!(
            "Password must be at least {MIN_PASSWORD_LENGTH} characters"
        )));
    }

    let hash = hash_password(&payload.password)?;

    // The unique index on email settles races between concurrent registrations.
    let user = match state.users.add(User::new(name, email, hash)).await {
        Ok(u) => u,
        Err(RepoError::Conflict) => {
            warn!("email already registered");
            return Err(AppError::Conflict("Email already registered".into()));
        }
        Err(e) => return Err(e.into()),
    };

    info!(user_id = %user.id, "user registered");
    Ok((StatusCode::CREATED, Json(issue(&state, &user)?)))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> AppResult<Json<AuthResponse>> {
    let email = normalize_email(&payload.email);

    let Some(user) = state.users.find_by_email(&email).await? else {
        warn!(email = %email, "login unknown email");
        return Err(AppError::InvalidCredentials);
    };

    if !verify_password(&payload.password, &user.password_hash)? {
        warn!(user_id = %user.id, "login invalid password");
        return Err(AppError::InvalidCredentials);
    }

    info!(user_id = %user.id, "user logged in");
    Ok(Json(issue(&state, &user)?))
}

#[instrument(skip_all)]
pub async fn get_me(AuthUser(claims): AuthUser) -> Json<UserClaims> {
    Json(claims)
}
