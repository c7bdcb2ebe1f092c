use axum::extract::FromRef;
use tracing::{info, warn};

use crate::{
    auth::{
        dto::{AuthResponse, LoginRequest, RegisterRequest},
        jwt::JwtKeys,
        password,
    },
    config::AdminSeed,
    error::{AppError, AppResult},
    state::AppState,
    users::model::{NewUser, Role, Status, User},
    validation::{normalize_email, Checker},
};

/// Validates and stores a new PENDING applicant.
pub async fn register(state: &AppState, req: RegisterRequest) -> AppResult<User> {
    let mut check = Checker::new();
    let first_name = check.name("firstName", "First name", &req.first_name);
    let last_name = check.name("lastName", "Last name", &req.last_name);
    let email = check.email(&req.email);
    check.new_password(&req.password);
    let phone = check.phone(req.phone.as_deref().filter(|p| !p.trim().is_empty()));
    let date_of_birth = check.date_of_birth(
        req.date_of_birth.as_deref().filter(|d| !d.trim().is_empty()),
        true,
    );
    check.finish()?;

    if state.users.find_by_email(&email).await?.is_some() {
        warn!(%email, "email already registered");
        return Err(AppError::Conflict(
            "User with this email already exists".into(),
        ));
    }

    let password_hash = password::hash(req.password).await?;
    let user = state
        .users
        .create(NewUser {
            first_name,
            last_name,
            email,
            password_hash,
            phone,
            date_of_birth,
            role: Role::User,
            status: Status::Pending,
        })
        .await?;
    info!(user_id = %user.id, email = %user.email, "user registered");
    Ok(user)
}

async fn check_credentials(state: &AppState, req: LoginRequest) -> AppResult<Option<User>> {
    let mut check = Checker::new();
    let email = check.email(&req.email);
    if req.password.is_empty() {
        check.fail("password", "Password is required");
    }
    check.finish()?;

    let Some(user) = state.users.find_by_email(&email).await? else {
        warn!(%email, "login for unknown email");
        return Ok(None);
    };
    if !password::verify(req.password, user.password_hash.clone()).await? {
        warn!(user_id = %user.id, "login with wrong password");
        return Ok(None);
    }
    Ok(Some(user))
}

async fn issue(state: &AppState, user: User) -> AppResult<AuthResponse> {
    state.users.record_login(user.id).await?;
    let keys = JwtKeys::from_ref(state);
    let token = keys.sign(&user)?;
    let user = state.users.find_by_id(user.id).await?.unwrap_or(user);
    Ok(AuthResponse {
        user,
        token,
        expires_in: keys.expires_in(),
    })
}

/// Any valid account may log in; the token carries its status and access
/// checks happen per request.
pub async fn login(state: &AppState, req: LoginRequest) -> AppResult<AuthResponse> {
    let user = check_credentials(state, req)
        .await?
        .ok_or_else(|| AppError::Unauthenticated("Invalid email or password".into()))?;
    info!(user_id = %user.id, status = %user.status, "user logged in");
    issue(state, user).await
}

pub async fn admin_login(state: &AppState, req: LoginRequest) -> AppResult<AuthResponse> {
    let user = check_credentials(state, req)
        .await?
        .filter(User::is_admin)
        .ok_or_else(|| AppError::Unauthenticated("Invalid admin credentials".into()))?;
    info!(admin_id = %user.id, "admin logged in");
    issue(state, user).await
}

/// Creates the seeded ADMIN account unless the email is already taken.
pub async fn ensure_admin(state: &AppState, seed: &AdminSeed) -> anyhow::Result<()> {
    let email = normalize_email(&seed.email);
    if let Some(existing) = state.users.find_by_email(&email).await? {
        if !existing.is_admin() {
            warn!(%email, "admin seed email belongs to a non-admin account");
        }
        return Ok(());
    }

    let password_hash = password::hash(seed.password.clone()).await?;
    let admin = state
        .users
        .create(NewUser {
            first_name: "System".into(),
            last_name: "Administrator".into(),
            email,
            password_hash,
            phone: None,
            date_of_birth: None,
            role: Role::Admin,
            status: Status::Approved,
        })
        .await?;
    info!(admin_id = %admin.id, email = %admin.email, "admin account seeded");
    Ok(())
}
