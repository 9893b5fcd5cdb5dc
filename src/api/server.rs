// API server implementation using actix-web

use crate::api::{middleware, routes, AppState};
use crate::util::env::{env_opt, env_parse};
use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};

pub struct ApiServer {
    pub host: String,
    pub port: u16,
    pub allowed_origins: String,
}

impl ApiServer {
    /// Create server from environment variables
    pub fn from_env() -> Result<Self> {
        crate::util::env::init_env();

        let host = env_opt("API_HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let port = env_opt("API_PORT")
            .unwrap_or_else(|| "8000".to_string())
            .trim()
            .parse()
            .context("Invalid API_PORT")?;

        let allowed_origins = env_opt("ALLOWED_ORIGINS")
            .or_else(|| env_opt("FRONTEND_ORIGIN"))
            .unwrap_or_else(|| "http://localhost:5173".to_string());

        Ok(Self {
            host,
            port,
            allowed_origins,
        })
    }

    /// Start the HTTP server; returns once it has shut down.
    pub async fn run(self, state: web::Data<AppState>) -> Result<()> {
        let bind_addr = format!("{}:{}", self.host, self.port);
        let workers: usize = env_parse("API_WORKERS", 0usize);

        tracing::info!(
            host = %self.host,
            port = %self.port,
            "Starting movie explorer API server"
        );

        let allowed_origins = self.allowed_origins.clone();
        let mut server = HttpServer::new(move || {
            let (logger, compress) = middleware::setup_middleware();
            let cors = middleware::setup_cors(&allowed_origins);

            App::new()
                .app_data(state.clone())
                .wrap(logger)
                .wrap(compress)
                .wrap(cors)
                .configure(routes::configure_routes)
        });
        if workers > 0 {
            server = server.workers(workers);
        }

        server
            .bind(&bind_addr)
            .with_context(|| format!("Failed to bind to {}", bind_addr))?
            .run()
            .await
            .context("HTTP server error")?;

        tracing::info!("API server stopped");
        Ok(())
    }
}
