use axum::{extract::State, routing::get, Router};
use serde::Serialize;
use tracing::instrument;

use crate::{
    auth::guard::AdminUser, error::AppResult, jobs::queue::QueueStats, response::ApiResponse,
    state::AppState,
};

#[derive(Debug, Serialize)]
pub struct QueueStatsBody {
    pub stats: QueueStats,
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/queue/stats", get(queue_stats))
}

#[instrument(skip(state, _admin))]
pub async fn queue_stats(
    State(state): State<AppState>,
    _admin: AdminUser,
) -> AppResult<ApiResponse<QueueStatsBody>> {
    let stats = state.jobs.stats().await?;
    Ok(ApiResponse::ok(
        "Queue statistics retrieved successfully",
        QueueStatsBody { stats },
    ))
}
