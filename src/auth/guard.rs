//! Request-scoped identity resolution and role/status predicates.
//!
//! Every guard extractor resolves the bearer token to a stored record first;
//! role and status predicates only ever see an authenticated user.

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use tracing::warn;

use crate::{
    auth::jwt::{JwtKeys, TokenError},
    error::AppError,
    state::AppState,
    users::model::{Status, User},
};

/// Passes only for ADMIN.
pub fn require_admin(user: &User) -> Result<(), AppError> {
    if user.is_admin() {
        Ok(())
    } else {
        Err(AppError::forbidden("Insufficient permissions"))
    }
}

/// Passes for ADMIN regardless of stored status, otherwise only for APPROVED.
pub fn require_approved_user(user: &User) -> Result<(), AppError> {
    match user.effective_status() {
        Status::Approved => Ok(()),
        status => Err(AppError::Forbidden {
            message: "Account not approved yet".into(),
            status: Some(status),
        }),
    }
}

fn bearer_token(parts: &Parts) -> Result<&str, AppError> {
    let header = parts
        .headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Unauthenticated("Access token is required".into()))?;

    header
        .strip_prefix("Bearer ")
        .or_else(|| header.strip_prefix("bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::Unauthenticated("Access token is required".into()))
}

/// Any authenticated user, freshly loaded from the record store.
pub struct CurrentUser(pub User);

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, AppError> {
        let token = bearer_token(parts)?;
        let claims = JwtKeys::from_ref(state).verify(token).map_err(|e| {
            warn!(error = %e, "token rejected");
            match e {
                TokenError::Expired => AppError::Unauthenticated("Token expired".into()),
                TokenError::Invalid(_) => AppError::Unauthenticated("Invalid token".into()),
            }
        })?;

        let user = state.users.find_by_id(claims.sub).await?.ok_or_else(|| {
            warn!(user_id = %claims.sub, "token for unknown user");
            AppError::Unauthenticated("Invalid token - user not found".into())
        })?;
        Ok(CurrentUser(user))
    }
}

/// Authenticated ADMIN.
pub struct AdminUser(pub User);

#[async_trait]
impl FromRequestParts<AppState> for AdminUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, AppError> {
        let CurrentUser(user) = CurrentUser::from_request_parts(parts, state).await?;
        require_admin(&user)?;
        Ok(AdminUser(user))
    }
}

/// Authenticated ADMIN or APPROVED user.
pub struct ApprovedUser(pub User);

#[async_trait]
impl FromRequestParts<AppState> for ApprovedUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, AppError> {
        let CurrentUser(user) = CurrentUser::from_request_parts(parts, state).await?;
        require_approved_user(&user)?;
        Ok(ApprovedUser(user))
    }
}
