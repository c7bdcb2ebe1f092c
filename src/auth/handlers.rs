use axum::{
    extract::{FromRef, State},
    routing::{get, post},
    Router,
};
use tracing::{info, instrument};

use crate::{
    auth::{
        dto::{AuthResponse, LoginRequest, RegisterRequest, TokenResponse, UserBody},
        guard::CurrentUser,
        jwt::JwtKeys,
        services,
    },
    error::AppResult,
    extract::ApiJson,
    response::ApiResponse,
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/admin/login", post(admin_login))
}

pub fn session_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/profile", get(profile))
        .route("/auth/refresh-token", post(refresh_token))
        .route("/auth/logout", post(logout))
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<RegisterRequest>,
) -> AppResult<ApiResponse<UserBody>> {
    let user = services::register(&state, payload).await?;
    Ok(ApiResponse::created(
        "Registration successful. Your account is pending approval.",
        UserBody { user },
    ))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<LoginRequest>,
) -> AppResult<ApiResponse<AuthResponse>> {
    let auth = services::login(&state, payload).await?;
    Ok(ApiResponse::ok("Login successful", auth))
}

#[instrument(skip(state, payload))]
pub async fn admin_login(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<LoginRequest>,
) -> AppResult<ApiResponse<AuthResponse>> {
    let auth = services::admin_login(&state, payload).await?;
    Ok(ApiResponse::ok("Admin login successful", auth))
}

#[instrument(skip(user), fields(user_id = %user.id))]
pub async fn profile(CurrentUser(user): CurrentUser) -> ApiResponse<UserBody> {
    ApiResponse::ok("Profile retrieved successfully", UserBody { user })
}

/// Issues a fresh token carrying the caller's current role and status.
#[instrument(skip(state, user), fields(user_id = %user.id))]
pub async fn refresh_token(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> AppResult<ApiResponse<TokenResponse>> {
    let keys = JwtKeys::from_ref(&state);
    let token = keys.sign(&user)?;
    Ok(ApiResponse::ok(
        "Token refreshed successfully",
        TokenResponse {
            token,
            expires_in: keys.expires_in(),
        },
    ))
}

/// Tokens are stateless; the client discards its copy.
#[instrument(skip(user), fields(user_id = %user.id))]
pub async fn logout(CurrentUser(user): CurrentUser) -> ApiResponse<()> {
    info!(user_id = %user.id, "user logged out");
    ApiResponse::message("Logout successful")
}
