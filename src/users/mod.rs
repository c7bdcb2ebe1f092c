mod dto;
pub mod handlers;
pub mod memory;
pub mod model;
pub mod repo;
pub mod store;
pub mod workflow;

use crate::state::AppState;
use axum::Router;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(handlers::profile_routes())
        .merge(handlers::admin_routes())
}
