//! The movies relation and the query layer on top of it.
//!
//! A [`Catalog`] owns an SQLite pool holding one immutable `movies` table,
//! built once from the ratings CSV and, when available, the analytics
//! dataset. [`SharedCatalog`] guards that build so concurrent first requests
//! never race to rebuild it.

pub mod builder;
pub mod filter;
pub mod query;
pub mod record;
pub mod sort;

use crate::util::env::{env_opt, env_parse};
use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::fs::File;
use std::io::Read;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{info, instrument, warn};

pub use builder::{AnalyticsRow, PrimaryLoad};
pub use filter::MovieFilter;
pub use query::{MoviePage, MovieQuery, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
pub use record::MovieRecord;
pub use sort::SortKey;

/// Which source shape the relation was built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CatalogMode {
    /// Ratings CSV only; enrichment columns are uniformly NULL.
    Base,
    /// Ratings CSV joined with the analytics dataset.
    Hybrid,
}

impl CatalogMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CatalogMode::Base => "base",
            CatalogMode::Hybrid => "hybrid",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CatalogConfig {
    pub movies_csv: PathBuf,
    pub analytics_path: Option<PathBuf>,
    /// `None` keeps the relation in memory.
    pub db_path: Option<String>,
    pub max_connections: u32,
}

impl CatalogConfig {
    pub fn from_env() -> Self {
        Self {
            movies_csv: env_opt("MOVIES_CSV")
                .unwrap_or_else(|| "data/final_movies_complete_only.csv".to_string())
                .into(),
            analytics_path: env_opt("ANALYTICS_PATH").map(PathBuf::from),
            db_path: env_opt("DB_PATH"),
            max_connections: env_parse("DB_MAX_CONNS", 8u32),
        }
    }
}

/// Open the SQLite pool backing the relation.
pub async fn connect(db_path: Option<&str>, max_connections: u32) -> Result<SqlitePool> {
    let options = match db_path.map(str::trim) {
        None | Some("") | Some(":memory:") => SqliteConnectOptions::from_str("sqlite::memory:")?,
        Some(path) => SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true),
    };

    // An in-memory database lives only as long as a connection does, so the
    // pool never reaps its last one.
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections.max(1))
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .acquire_timeout(Duration::from_secs(10))
        .connect_with(options)
        .await
        .context("failed to open movies database")?;
    Ok(pool)
}

#[derive(Debug, Clone)]
pub struct Catalog {
    pool: SqlitePool,
    mode: CatalogMode,
    rows: u64,
}

impl Catalog {
    /// Build the relation from the configured sources.
    ///
    /// A missing or unreadable ratings CSV is fatal. A missing or unreadable
    /// analytics dataset only downgrades the catalog to [`CatalogMode::Base`].
    /// File parsing runs on the blocking pool.
    #[instrument(skip(config), fields(movies_csv = %config.movies_csv.display()))]
    pub async fn open(config: &CatalogConfig) -> Result<Self> {
        let movies_csv = config.movies_csv.clone();
        let analytics_path = config.analytics_path.clone();
        let (load, analytics) = tokio::task::spawn_blocking(move || -> Result<_> {
            let primary = File::open(&movies_csv).with_context(|| {
                format!("failed to open ratings CSV {}", movies_csv.display())
            })?;
            let load = builder::read_primary(primary).context("failed to read ratings CSV")?;
            let analytics = analytics_path.map(|path| {
                let rows = builder::load_analytics(&path);
                (path, rows)
            });
            Ok((load, analytics))
        })
        .await
        .context("source loading task failed")??;

        let analytics = match analytics {
            None => {
                info!("no analytics dataset configured; serving base ratings only");
                None
            }
            Some((path, Ok(rows))) => {
                info!(path = %path.display(), rows = rows.len(), "analytics dataset loaded");
                Some(rows)
            }
            Some((path, Err(e))) => {
                warn!(
                    path = %path.display(),
                    error = %format!("{e:#}"),
                    "analytics dataset unavailable; continuing in degraded mode"
                );
                None
            }
        };

        let pool = connect(config.db_path.as_deref(), config.max_connections).await?;
        Self::assemble(pool, load, analytics).await
    }

    /// Build the relation into `pool` from an already opened ratings source.
    pub async fn build<R: Read>(
        pool: SqlitePool,
        primary: R,
        analytics: Option<Vec<AnalyticsRow>>,
    ) -> Result<Self> {
        let load = builder::read_primary(primary).context("failed to read ratings CSV")?;
        Self::assemble(pool, load, analytics).await
    }

    async fn assemble(
        pool: SqlitePool,
        load: PrimaryLoad,
        analytics: Option<Vec<AnalyticsRow>>,
    ) -> Result<Self> {
        if load.skipped > 0 {
            warn!(skipped = load.skipped, "skipped unreadable ratings rows");
        }

        let mode = if analytics.is_some() {
            CatalogMode::Hybrid
        } else {
            CatalogMode::Base
        };
        let stats = builder::materialize(&pool, &load.movies, analytics.as_deref().unwrap_or(&[]))
            .await
            .context("failed to build movies relation")?;

        info!(mode = mode.as_str(), rows = stats.rows, "catalog ready");
        Ok(Self {
            pool,
            mode,
            rows: stats.rows,
        })
    }

    pub fn mode(&self) -> CatalogMode {
        self.mode
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn list(&self, query: &MovieQuery) -> Result<MoviePage> {
        query::fetch_page(&self.pool, self.mode, query).await
    }

    /// Whether any movie carries this enrichment key.
    pub async fn has_movie_key(&self, key: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM movies WHERE movie_key = ?")
            .bind(key)
            .fetch_one(&self.pool)
            .await?;
        Ok(count > 0)
    }

    pub async fn ping(&self) -> bool {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .is_ok()
    }

    pub async fn close(&self) {
        self.pool.close().await;
        info!("movies database closed");
    }
}

/// Process-wide catalog, built at most once on first access.
#[derive(Debug)]
pub struct SharedCatalog {
    config: Option<CatalogConfig>,
    cell: OnceCell<Catalog>,
    attempts: AtomicU32,
}

impl SharedCatalog {
    pub fn new(config: CatalogConfig) -> Self {
        Self {
            config: Some(config),
            cell: OnceCell::new(),
            attempts: AtomicU32::new(0),
        }
    }

    /// Wrap a catalog that is already built.
    pub fn ready(catalog: Catalog) -> Self {
        Self {
            config: None,
            cell: OnceCell::new_with(Some(catalog)),
            attempts: AtomicU32::new(0),
        }
    }

    pub async fn get(&self) -> Result<&Catalog> {
        self.cell
            .get_or_try_init(|| async {
                let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
                info!(attempt, "building movie catalog");
                let config = self
                    .config
                    .as_ref()
                    .ok_or_else(|| anyhow!("catalog has no source configuration"))?;
                Catalog::open(config).await
            })
            .await
    }

    /// Builds started so far; failed builds are retried on the next access.
    pub fn build_attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// The catalog if it has been built, without triggering a build.
    pub fn peek(&self) -> Option<&Catalog> {
        self.cell.get()
    }

    pub async fn close(&self) {
        if let Some(catalog) = self.cell.get() {
            catalog.close().await;
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn base_build_keeps_every_row() {
        let catalog = base_catalog().await;
        assert_eq!(catalog.mode(), CatalogMode::Base);
        assert_eq!(catalog.rows(), 6);
        assert!(catalog.ping().await);
        assert!(!catalog.has_movie_key("m1").await.unwrap());
    }

    #[tokio::test]
    async fn hybrid_build_is_a_left_join() {
        let catalog = hybrid_catalog().await;
        assert_eq!(catalog.mode(), CatalogMode::Hybrid);
        assert_eq!(catalog.rows(), 6);
        assert!(catalog.has_movie_key("m1").await.unwrap());
        assert!(catalog.has_movie_key("m3").await.unwrap());
        assert!(!catalog.has_movie_key("m9").await.unwrap());
        assert!(!catalog.has_movie_key("m1-dup").await.unwrap());
    }

    #[tokio::test]
    async fn missing_primary_source_is_fatal() {
        let config = CatalogConfig {
            movies_csv: "/definitely/not/here.csv".into(),
            analytics_path: None,
            db_path: None,
            max_connections: 1,
        };
        let err = Catalog::open(&config).await.unwrap_err();
        assert!(format!("{err:#}").contains("ratings CSV"));
    }

    #[tokio::test]
    async fn missing_secondary_source_degrades_to_base() {
        let dir = std::env::temp_dir().join(format!("movie-explorer-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let csv_path = dir.join("movies.csv");
        std::fs::write(&csv_path, MOVIES_CSV).unwrap();

        let shared = SharedCatalog::new(CatalogConfig {
            movies_csv: csv_path,
            analytics_path: Some(dir.join("missing.parquet")),
            db_path: None,
            max_connections: 2,
        });
        assert!(shared.peek().is_none());

        let catalog = shared.get().await.unwrap();
        assert_eq!(catalog.mode(), CatalogMode::Base);
        assert_eq!(catalog.rows(), 6);

        // Second access reuses the same relation.
        let again = shared.get().await.unwrap();
        assert!(std::ptr::eq(catalog, again));

        shared.close().await;
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_first_access_builds_once() {
        let dir = std::env::temp_dir().join(format!("movie-explorer-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let csv_path = dir.join("movies.csv");
        std::fs::write(&csv_path, MOVIES_CSV).unwrap();

        let shared = Arc::new(SharedCatalog::new(CatalogConfig {
            movies_csv: csv_path,
            analytics_path: None,
            db_path: None,
            max_connections: 2,
        }));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let shared = Arc::clone(&shared);
                tokio::spawn(async move {
                    let catalog = shared.get().await.unwrap();
                    catalog as *const Catalog as usize
                })
            })
            .collect();
        let mut addresses = Vec::new();
        for handle in handles {
            addresses.push(handle.await.unwrap());
        }

        assert_eq!(shared.build_attempts(), 1);
        let first = shared.peek().unwrap() as *const Catalog as usize;
        assert!(addresses.iter().all(|a| *a == first));
        assert_eq!(shared.peek().unwrap().rows(), 6);

        shared.close().await;
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn failed_build_is_retried_on_next_access() {
        let shared = SharedCatalog::new(CatalogConfig {
            movies_csv: "/definitely/not/here.csv".into(),
            analytics_path: None,
            db_path: None,
            max_connections: 1,
        });
        assert!(shared.get().await.is_err());
        assert!(shared.get().await.is_err());
        assert_eq!(shared.build_attempts(), 2);
        assert!(shared.peek().is_none());
    }

    #[tokio::test]
    async fn unconfigured_catalog_reports_an_error() {
        let shared = SharedCatalog {
            config: None,
            cell: OnceCell::new(),
            attempts: AtomicU32::new(0),
        };
        assert!(shared.get().await.is_err());
    }
}
