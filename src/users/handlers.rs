use axum::{
    extract::{Path, State},
    routing::{delete, get, post},
    Router,
};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::{
    auth::guard::{AdminUser, ApprovedUser, CurrentUser},
    error::{AppError, AppResult},
    extract::{ApiJson, ApiQuery},
    response::ApiResponse,
    state::AppState,
    users::{
        dto::{DecisionRequest, ProfileUpdateRequest, SearchQuery, StatsBody, UsersList},
        model::{Decision, Status, User, UserWithApprover},
        store::DeleteOutcome,
    },
};

pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/users/pending", get(pending))
        .route("/users/approved", get(approved))
        .route("/users/stats", get(stats))
        .route("/users/search", get(search))
        .route("/users/:id/approve-reject", post(approve_reject))
        .route("/users/:id", delete(delete_user).get(get_user))
}

pub fn profile_routes() -> Router<AppState> {
    Router::new().route("/users/profile", get(get_profile).put(update_profile))
}

fn parse_id(raw: &str) -> AppResult<Uuid> {
    raw.parse()
        .map_err(|_| AppError::invalid("id", "Invalid user ID"))
}

async fn with_approver(state: &AppState, user: User) -> AppResult<UserWithApprover> {
    let approver = state.users.approver_of(&user).await?;
    Ok(UserWithApprover { user, approver })
}

#[instrument(skip(state, admin), fields(admin_id = %admin.id))]
pub async fn pending(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
) -> AppResult<ApiResponse<UsersList>> {
    let users = state.users.list_by_status(Status::Pending).await?;
    Ok(ApiResponse::ok(
        "Pending users retrieved successfully",
        users.into(),
    ))
}

#[instrument(skip(state, admin), fields(admin_id = %admin.id))]
pub async fn approved(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
) -> AppResult<ApiResponse<UsersList>> {
    let users = state.users.list_by_status(Status::Approved).await?;
    Ok(ApiResponse::ok(
        "Approved users retrieved successfully",
        users.into(),
    ))
}

#[instrument(skip(state, _admin))]
pub async fn stats(
    State(state): State<AppState>,
    _admin: AdminUser,
) -> AppResult<ApiResponse<StatsBody>> {
    let stats = state.users.count_by_status().await?;
    Ok(ApiResponse::ok(
        "User statistics retrieved successfully",
        StatsBody { stats },
    ))
}

#[instrument(skip(state, _admin))]
pub async fn search(
    State(state): State<AppState>,
    _admin: AdminUser,
    ApiQuery(query): ApiQuery<SearchQuery>,
) -> AppResult<ApiResponse<UsersList>> {
    let filter = query.into_filter()?;
    let users = state.users.search(&filter).await?;
    Ok(ApiResponse::ok("Users retrieved successfully", users.into()))
}

#[instrument(skip(state, admin, body), fields(admin_id = %admin.id))]
pub async fn approve_reject(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<String>,
    ApiJson(body): ApiJson<DecisionRequest>,
) -> AppResult<ApiResponse<User>> {
    let id = parse_id(&id)?;
    let decision = body.into_decision()?;
    let message = match decision {
        Decision::Approve => "User approved successfully",
        Decision::Reject { .. } => "User rejected successfully",
    };
    let user = state.workflow().decide(id, admin.id, decision).await?;
    Ok(ApiResponse::ok(message, user))
}

#[instrument(skip(state, admin), fields(admin_id = %admin.id))]
pub async fn delete_user(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<String>,
) -> AppResult<ApiResponse<()>> {
    let id = parse_id(&id)?;
    match state.users.delete(id).await? {
        DeleteOutcome::Deleted => {
            info!(user_id = %id, admin_id = %admin.id, "user deleted");
            Ok(ApiResponse::message("User deleted successfully"))
        }
        DeleteOutcome::AdminProtected => Err(AppError::forbidden("Cannot delete admin users")),
        DeleteOutcome::Missing => Err(AppError::NotFound("User not found".into())),
    }
}

#[instrument(skip(state, _caller))]
pub async fn get_user(
    State(state): State<AppState>,
    _caller: ApprovedUser,
    Path(id): Path<String>,
) -> AppResult<ApiResponse<UserWithApprover>> {
    let id = parse_id(&id)?;
    let user = state
        .users
        .find_by_id(id)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".into()))?;
    Ok(ApiResponse::ok(
        "User retrieved successfully",
        with_approver(&state, user).await?,
    ))
}

#[instrument(skip(state, user), fields(user_id = %user.id))]
pub async fn get_profile(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> AppResult<ApiResponse<UserWithApprover>> {
    Ok(ApiResponse::ok(
        "Profile retrieved successfully",
        with_approver(&state, user).await?,
    ))
}

#[instrument(skip(state, user, body), fields(user_id = %user.id))]
pub async fn update_profile(
    State(state): State<AppState>,
    ApprovedUser(user): ApprovedUser,
    ApiJson(body): ApiJson<ProfileUpdateRequest>,
) -> AppResult<ApiResponse<User>> {
    let update = body.validate()?;
    let updated = state
        .users
        .update_profile(user.id, &update)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".into()))?;
    info!(user_id = %updated.id, "profile updated");
    Ok(ApiResponse::ok("Profile updated successfully", updated))
}
