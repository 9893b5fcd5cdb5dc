// Shared service context handed to every request handler

use crate::catalog::{CatalogConfig, SharedCatalog};
use crate::enrichment::{DetailStore, PosterService};
use anyhow::Result;
use std::time::Instant;

pub struct AppState {
    pub catalog: SharedCatalog,
    pub posters: PosterService,
    pub details: DetailStore,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(catalog: SharedCatalog, posters: PosterService, details: DetailStore) -> Self {
        Self {
            catalog,
            posters,
            details,
            started_at: Instant::now(),
        }
    }

    /// Wire up the context from environment variables. The catalog itself is
    /// built lazily on first access.
    pub fn from_env() -> Result<Self> {
        let details = DetailStore::from_env();
        if !details.is_configured() {
            tracing::info!("DETAILS_DIR not set; detail lookups will return 404");
        }
        Ok(Self::new(
            SharedCatalog::new(CatalogConfig::from_env()),
            PosterService::from_env()?,
            details,
        ))
    }

    pub async fn shutdown(&self) {
        self.catalog.close().await;
    }
}
