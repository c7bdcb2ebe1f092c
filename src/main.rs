mod app;
mod auth;
mod config;
mod error;
mod extract;
mod jobs;
mod response;
mod state;
mod system;
mod users;
mod validation;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "onboarding=debug,axum=info,tower_http=info".to_string());
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let (app_state, workers) = state::AppState::init().await?;
    tracing::info!(
        environment = %app_state.config.environment,
        store = app_state.users.backend(),
        jobs = app_state.jobs.mode(),
        "application state ready"
    );

    let served = app::serve(app::build_app(app_state)).await;

    if let Some(workers) = workers {
        workers.shutdown().await;
    }
    served
}
