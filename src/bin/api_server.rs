// HTTP API server binary for the movie explorer

use anyhow::Result;
use actix_web::web;
use movie_explorer::api::{ApiServer, AppState};
use movie_explorer::util::env as env_util;

#[actix_web::main]
async fn main() -> Result<()> {
    // Initialize logging (honours RUST_LOG and LOG_FORMAT)
    movie_explorer::logging::init_tracing()?;

    tracing::info!("Initializing movie explorer API server");

    // Load dotenv/env once (safe to call multiple times)
    env_util::init_env();
    env_util::preflight_check(
        "api_server",
        &[],
        &[
            "MOVIES_CSV",
            "ANALYTICS_PATH",
            "DETAILS_DIR",
            "DB_PATH",
            "API_HOST",
            "API_PORT",
            "ALLOWED_ORIGINS",
            "FRONTEND_ORIGIN",
            "POSTER_BASE_URL",
            "POSTER_TIMEOUT_SECS",
            "LOG_FORMAT",
        ],
    )?;

    let server = ApiServer::from_env()?;
    let state = web::Data::new(AppState::from_env()?);

    // Build the relation before accepting traffic; a bad ratings CSV stops startup here.
    let catalog = state.catalog.get().await?;
    tracing::info!(
        mode = catalog.mode().as_str(),
        rows = catalog.rows(),
        "Movies relation ready"
    );

    let outcome = server.run(state.clone()).await;
    state.shutdown().await;
    outcome
}
