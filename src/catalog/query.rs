// Count + page execution over the movies relation

use super::filter::{compile, MovieFilter};
use super::record::MovieRecord;
use super::sort::resolve_order;
use super::CatalogMode;
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use sqlx::{Arguments, SqlitePool};
use tracing::{debug, instrument};

pub const DEFAULT_PAGE_SIZE: u32 = 50;
pub const MAX_PAGE_SIZE: u32 = 200;

const SELECT_COLUMNS: &str = "title, year, region, imdb_id, imdb_url, douban_id, douban_url, \
     imdb_rating, imdb_votes, douban_rating, douban_votes, \
     (douban_rating - imdb_rating) AS gap, movie_key, score, reliability";

/// A validated listing request.
#[derive(Debug, Clone, PartialEq)]
pub struct MovieQuery {
    pub filter: MovieFilter,
    /// Raw sort key; unknown keys fall back to the default ordering.
    pub sort: Option<String>,
    /// 1-based.
    pub page: u32,
    pub page_size: u32,
}

impl Default for MovieQuery {
    fn default() -> Self {
        Self {
            filter: MovieFilter::default(),
            sort: None,
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl MovieQuery {
    pub fn offset(&self) -> i64 {
        i64::from(self.page.saturating_sub(1)) * i64::from(self.page_size)
    }
}

/// Page envelope returned by the listing endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoviePage {
    pub page: u32,
    pub page_size: u32,
    /// Rows matching the filters, ignoring pagination.
    pub total: i64,
    pub items: Vec<MovieRecord>,
}

/// Run the count and the page query with the same predicate and binds.
#[instrument(skip(pool, query), fields(page = query.page, page_size = query.page_size))]
pub async fn fetch_page(pool: &SqlitePool, mode: CatalogMode, query: &MovieQuery) -> Result<MoviePage> {
    let compiled = compile(&query.filter);
    let where_sql = compiled.where_sql();
    let order_sql = resolve_order(query.sort.as_deref(), mode);

    let count_sql = format!("SELECT COUNT(*) FROM movies WHERE {where_sql}");
    let total: i64 = sqlx::query_scalar_with(&count_sql, compiled.arguments()?)
        .fetch_one(pool)
        .await
        .context("movie count query failed")?;

    let data_sql = format!(
        "SELECT {SELECT_COLUMNS} FROM movies WHERE {where_sql} ORDER BY {order_sql} LIMIT ? OFFSET ?"
    );
    let mut args = compiled.arguments()?;
    args.add(i64::from(query.page_size))
        .map_err(|e| anyhow!("failed to bind limit: {e}"))?;
    args.add(query.offset())
        .map_err(|e| anyhow!("failed to bind offset: {e}"))?;

    let items: Vec<MovieRecord> = sqlx::query_as_with(&data_sql, args)
        .fetch_all(pool)
        .await
        .context("movie page query failed")?;

    debug!(total, returned = items.len(), "movie page fetched");
    Ok(MoviePage {
        page: query.page,
        page_size: query.page_size,
        total,
        items,
    })
}
