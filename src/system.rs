use axum::{extract::State, routing::get, Router};
use serde::Serialize;
use time::OffsetDateTime;

use crate::{error::AppError, response::ApiResponse, state::AppState};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Health {
    pub status: &'static str,
    pub environment: String,
    pub store: &'static str,
    pub job_pipeline: &'static str,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/health", get(health))
}

pub async fn health(State(state): State<AppState>) -> ApiResponse<Health> {
    ApiResponse::ok(
        "Server is running",
        Health {
            status: "ok",
            environment: state.config.environment.clone(),
            store: state.users.backend(),
            job_pipeline: state.jobs.mode(),
            timestamp: OffsetDateTime::now_utc(),
        },
    )
}

pub async fn not_found() -> AppError {
    AppError::NotFound("Route not found".into())
}
