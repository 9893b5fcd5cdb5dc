//! Builds the `movies` relation from the ratings CSV and the optional
//! analytics dataset.
//!
//! Source values are parsed leniently: anything that does not parse as the
//! expected number becomes NULL instead of aborting the load. The analytics
//! rows are left-joined on `imdb_id`, so base rows without a match survive
//! with NULL `movie_key`/`score`/`reliability` and analytics rows without a
//! base movie are dropped.

use anyhow::{anyhow, bail, Context, Result};
use arrow::array::{Array, AsArray, Float64Array, StringArray};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Float64Type};
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::file::reader::ChunkReader;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::{info, warn};

const INSERT_CHUNK: usize = 500;

/// A primary-source row after lenient parsing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceMovie {
    pub title: Option<String>,
    pub year: Option<i64>,
    pub region: Option<String>,
    pub imdb_id: Option<String>,
    pub imdb_url: Option<String>,
    pub douban_id: Option<i64>,
    pub douban_url: Option<String>,
    pub imdb_rating: Option<f64>,
    pub imdb_votes: Option<i64>,
    pub douban_rating: Option<f64>,
    pub douban_votes: Option<i64>,
}

/// A row of the secondary analytics dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalyticsRow {
    pub imdb_id: String,
    pub movie_key: Option<String>,
    pub score: Option<f64>,
    pub reliability: Option<f64>,
}

#[derive(Debug, Default)]
pub struct PrimaryLoad {
    pub movies: Vec<SourceMovie>,
    /// Records the CSV reader could not decode.
    pub skipped: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelationStats {
    pub rows: u64,
    pub enriched: u64,
}

pub fn lenient_text(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

pub fn lenient_f64(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Integers may arrive with thousands separators or a trailing `.0`.
pub fn lenient_i64(raw: &str) -> Option<i64> {
    let cleaned: String = raw.trim().chars().filter(|c| *c != ',').collect();
    if cleaned.is_empty() {
        return None;
    }
    if let Ok(v) = cleaned.parse::<i64>() {
        return Some(v);
    }
    cleaned
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && v.abs() < i64::MAX as f64)
        .map(|v| v.round() as i64)
}

struct Columns(HashMap<String, usize>);

impl Columns {
    fn from_headers(headers: &csv::StringRecord) -> Self {
        Self(
            headers
                .iter()
                .enumerate()
                .map(|(idx, name)| (name.trim().to_ascii_lowercase(), idx))
                .collect(),
        )
    }

    fn has(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// First non-empty value among the candidate column names.
    fn field<'r>(&self, record: &'r csv::StringRecord, names: &[&str]) -> Option<&'r str> {
        names
            .iter()
            .filter_map(|n| self.0.get(*n))
            .filter_map(|idx| record.get(*idx))
            .find(|v| !v.trim().is_empty())
    }
}

fn csv_reader<R: Read>(reader: R) -> csv::Reader<R> {
    csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::Headers)
        .from_reader(reader)
}

/// Parse the ratings CSV. Undecodable records are skipped and counted.
pub fn read_primary<R: Read>(reader: R) -> Result<PrimaryLoad> {
    let mut rdr = csv_reader(reader);
    let headers = rdr.headers().context("ratings CSV has no header row")?.clone();
    let cols = Columns::from_headers(&headers);
    if !cols.has("label") && !cols.has("title") {
        bail!("ratings CSV lacks a `label` or `title` column");
    }

    let mut load = PrimaryLoad::default();
    for result in rdr.records() {
        let record = match result {
            Ok(r) => r,
            Err(e) => {
                load.skipped += 1;
                tracing::debug!(error = %e, "skipping unreadable ratings row");
                continue;
            }
        };
        let text = |names: &[&str]| cols.field(&record, names).and_then(lenient_text);
        let int = |names: &[&str]| cols.field(&record, names).and_then(lenient_i64);
        let float = |names: &[&str]| cols.field(&record, names).and_then(lenient_f64);

        load.movies.push(SourceMovie {
            title: text(&["label", "title"]),
            year: int(&["year"]),
            region: text(&["region"]),
            imdb_id: text(&["imdb_id"]),
            imdb_url: text(&["imdb_url"]),
            douban_id: int(&["douban_id"]),
            douban_url: text(&["douban_url_y", "douban_url_x", "douban_url"]),
            imdb_rating: float(&["imdb_rating"]),
            imdb_votes: int(&["imdb_votes"]),
            douban_rating: float(&["douban_rating"]),
            douban_votes: int(&["douban_votes"]),
        });
    }
    Ok(load)
}

/// Parse the analytics dataset from CSV.
pub fn read_analytics_csv<R: Read>(reader: R) -> Result<Vec<AnalyticsRow>> {
    let mut rdr = csv_reader(reader);
    let headers = rdr
        .headers()
        .context("analytics CSV has no header row")?
        .clone();
    let cols = Columns::from_headers(&headers);
    if !cols.has("imdb_id") {
        bail!("analytics CSV lacks an `imdb_id` column");
    }

    let mut rows = Vec::new();
    for result in rdr.records() {
        let Ok(record) = result else { continue };
        let Some(imdb_id) = cols.field(&record, &["imdb_id"]).and_then(lenient_text) else {
            continue;
        };
        rows.push(AnalyticsRow {
            imdb_id,
            movie_key: cols.field(&record, &["movie_key"]).and_then(lenient_text),
            score: cols.field(&record, &["score"]).and_then(lenient_f64),
            reliability: cols.field(&record, &["reliability"]).and_then(lenient_f64),
        });
    }
    Ok(rows)
}

fn text_column(batch: &RecordBatch, name: &str) -> Result<Option<StringArray>> {
    let Some(column) = batch.column_by_name(name) else {
        return Ok(None);
    };
    let converted = cast(column, &DataType::Utf8)
        .with_context(|| format!("analytics column `{name}` is not text-like"))?;
    Ok(Some(converted.as_string::<i32>().clone()))
}

fn float_column(batch: &RecordBatch, name: &str) -> Result<Option<Float64Array>> {
    let Some(column) = batch.column_by_name(name) else {
        return Ok(None);
    };
    let converted = cast(column, &DataType::Float64)
        .with_context(|| format!("analytics column `{name}` is not numeric"))?;
    Ok(Some(converted.as_primitive::<Float64Type>().clone()))
}

fn text_at(column: &Option<StringArray>, idx: usize) -> Option<String> {
    column
        .as_ref()
        .filter(|c| !c.is_null(idx))
        .and_then(|c| lenient_text(c.value(idx)))
}

fn float_at(column: &Option<Float64Array>, idx: usize) -> Option<f64> {
    column
        .as_ref()
        .filter(|c| !c.is_null(idx))
        .map(|c| c.value(idx))
        .filter(|v| v.is_finite())
}

/// Parse the analytics dataset from parquet.
pub fn read_analytics_parquet<T: ChunkReader + 'static>(source: T) -> Result<Vec<AnalyticsRow>> {
    let reader = ParquetRecordBatchReaderBuilder::try_new(source)
        .context("failed to open analytics parquet")?
        .build()
        .context("failed to build analytics parquet reader")?;

    let mut rows = Vec::new();
    for batch in reader {
        let batch = batch.context("failed to read analytics record batch")?;
        let imdb_ids = text_column(&batch, "imdb_id")?
            .ok_or_else(|| anyhow!("analytics parquet lacks an `imdb_id` column"))?;
        let keys = text_column(&batch, "movie_key")?;
        let scores = float_column(&batch, "score")?;
        let reliability = float_column(&batch, "reliability")?;

        for idx in 0..batch.num_rows() {
            if imdb_ids.is_null(idx) {
                continue;
            }
            let Some(imdb_id) = lenient_text(imdb_ids.value(idx)) else {
                continue;
            };
            rows.push(AnalyticsRow {
                imdb_id,
                movie_key: text_at(&keys, idx),
                score: float_at(&scores, idx),
                reliability: float_at(&reliability, idx),
            });
        }
    }
    Ok(rows)
}

/// Load the analytics dataset, choosing the format by file extension.
pub fn load_analytics(path: &Path) -> Result<Vec<AnalyticsRow>> {
    let file = File::open(path)
        .with_context(|| format!("failed to open analytics dataset {}", path.display()))?;
    let is_csv = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("csv"));
    if is_csv {
        read_analytics_csv(file)
    } else {
        read_analytics_parquet(file)
    }
}

/// Replace the `movies` relation with the given rows, joined to `analytics`.
pub async fn materialize(
    pool: &SqlitePool,
    movies: &[SourceMovie],
    analytics: &[AnalyticsRow],
) -> Result<RelationStats> {
    let mut tx = pool.begin().await?;

    for stmt in [
        "DROP TABLE IF EXISTS movies",
        "DROP TABLE IF EXISTS movies_base",
        "DROP TABLE IF EXISTS movie_analytics",
        "CREATE TABLE movies (
            title TEXT,
            title_folded TEXT,
            year INTEGER,
            region TEXT,
            imdb_id TEXT,
            imdb_url TEXT,
            douban_id INTEGER,
            douban_url TEXT,
            imdb_rating REAL,
            imdb_votes INTEGER,
            douban_rating REAL,
            douban_votes INTEGER,
            movie_key TEXT,
            score REAL,
            reliability REAL
        )",
        "CREATE TABLE movies_base (
            title TEXT,
            title_folded TEXT,
            year INTEGER,
            region TEXT,
            imdb_id TEXT,
            imdb_url TEXT,
            douban_id INTEGER,
            douban_url TEXT,
            imdb_rating REAL,
            imdb_votes INTEGER,
            douban_rating REAL,
            douban_votes INTEGER
        )",
        "CREATE TABLE movie_analytics (
            imdb_id TEXT PRIMARY KEY,
            movie_key TEXT,
            score REAL,
            reliability REAL
        )",
    ] {
        sqlx::query(stmt).execute(&mut *tx).await?;
    }

    for chunk in movies.chunks(INSERT_CHUNK) {
        let mut qb: QueryBuilder<'_, Sqlite> = QueryBuilder::new(
            "INSERT INTO movies_base (title, title_folded, year, region, imdb_id, imdb_url, douban_id, \
             douban_url, imdb_rating, imdb_votes, douban_rating, douban_votes) ",
        );
        qb.push_values(chunk, |mut b, m| {
            // SQLite's lower() only folds ASCII.
            b.push_bind(m.title.as_deref())
                .push_bind(m.title.as_deref().map(str::to_lowercase))
                .push_bind(m.year)
                .push_bind(m.region.as_deref())
                .push_bind(m.imdb_id.as_deref())
                .push_bind(m.imdb_url.as_deref())
                .push_bind(m.douban_id)
                .push_bind(m.douban_url.as_deref())
                .push_bind(m.imdb_rating)
                .push_bind(m.imdb_votes)
                .push_bind(m.douban_rating)
                .push_bind(m.douban_votes);
        });
        qb.build().execute(&mut *tx).await?;
    }

    // OR IGNORE keeps the first row per imdb_id so the join never fans out.
    for chunk in analytics.chunks(INSERT_CHUNK) {
        let mut qb: QueryBuilder<'_, Sqlite> = QueryBuilder::new(
            "INSERT OR IGNORE INTO movie_analytics (imdb_id, movie_key, score, reliability) ",
        );
        qb.push_values(chunk, |mut b, a| {
            b.push_bind(a.imdb_id.as_str())
                .push_bind(a.movie_key.as_deref())
                .push_bind(a.score)
                .push_bind(a.reliability);
        });
        qb.build().execute(&mut *tx).await?;
    }

    sqlx::query(
        "INSERT INTO movies (title, title_folded, year, region, imdb_id, imdb_url, douban_id, douban_url,
                             imdb_rating, imdb_votes, douban_rating, douban_votes,
                             movie_key, score, reliability)
         SELECT b.title, b.title_folded, b.year, b.region, b.imdb_id, b.imdb_url, b.douban_id, b.douban_url,
                b.imdb_rating, b.imdb_votes, b.douban_rating, b.douban_votes,
                a.movie_key, a.score, a.reliability
         FROM movies_base b
         LEFT JOIN movie_analytics a ON a.imdb_id = b.imdb_id
         ORDER BY b.rowid",
    )
    .execute(&mut *tx)
    .await?;

    for stmt in [
        "DROP TABLE movies_base",
        "DROP TABLE movie_analytics",
        "CREATE INDEX idx_movies_year ON movies(year)",
        "CREATE INDEX idx_movies_region ON movies(region)",
        "CREATE INDEX idx_movies_imdb_id ON movies(imdb_id)",
        "CREATE INDEX idx_movies_score ON movies(score)",
        "CREATE INDEX idx_movies_movie_key ON movies(movie_key)",
    ] {
        sqlx::query(stmt).execute(&mut *tx).await?;
    }

    let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM movies")
        .fetch_one(&mut *tx)
        .await?;
    let enriched: i64 = sqlx::query_scalar("SELECT COUNT(movie_key) FROM movies")
        .fetch_one(&mut *tx)
        .await?;

    tx.commit().await?;

    let stats = RelationStats {
        rows: rows.max(0) as u64,
        enriched: enriched.max(0) as u64,
    };
    if !analytics.is_empty() && stats.enriched == 0 {
        warn!(
            analytics_rows = analytics.len(),
            "analytics dataset loaded but no movie matched on imdb_id"
        );
    }
    info!(rows = stats.rows, enriched = stats.enriched, "movies relation built");
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::ArrayRef;
    use arrow::datatypes::{Field, Schema};
    use parquet::arrow::ArrowWriter;
    use std::sync::Arc;

    #[test]
    fn lenient_numbers_coerce_to_null() {
        assert_eq!(lenient_i64("1,234"), Some(1234));
        assert_eq!(lenient_i64("1200.0"), Some(1200));
        assert_eq!(lenient_i64("n/a"), None);
        assert_eq!(lenient_i64("  "), None);
        assert_eq!(lenient_f64("7.9"), Some(7.9));
        assert_eq!(lenient_f64("NaN"), None);
        assert_eq!(lenient_f64("-"), None);
    }

    #[test]
    fn primary_csv_prefers_newer_douban_url() {
        let csv = "label,year,douban_url_x,douban_url_y,imdb_votes\n\
                   Heat,1995,https://old/1,https://new/1,\"12,000\"\n\
                   Ronin,1998,https://old/2,,oops\n";
        let load = read_primary(csv.as_bytes()).unwrap();
        assert_eq!(load.movies.len(), 2);
        assert_eq!(load.movies[0].douban_url.as_deref(), Some("https://new/1"));
        assert_eq!(load.movies[0].imdb_votes, Some(12_000));
        assert_eq!(load.movies[1].douban_url.as_deref(), Some("https://old/2"));
        assert_eq!(load.movies[1].imdb_votes, None);
    }

    #[test]
    fn primary_csv_requires_a_title_column() {
        let err = read_primary("year,region\n1999,US\n".as_bytes()).unwrap_err();
        assert!(err.to_string().contains("title"));
    }

    #[test]
    fn analytics_csv_skips_rows_without_imdb_id() {
        let csv = "imdb_id,movie_key,score,reliability\n\
                   tt1,m1,0.9,0.8\n\
                   ,m2,0.5,0.5\n\
                   tt3,m3,bad,\n";
        let rows = read_analytics_csv(csv.as_bytes()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].imdb_id, "tt3");
        assert_eq!(rows[1].score, None);
        assert_eq!(rows[1].reliability, None);
    }

    #[test]
    fn analytics_parquet_reads_and_casts_columns() {
        let schema = Arc::new(Schema::new(vec![
            Field::new("imdb_id", DataType::Utf8, true),
            Field::new("movie_key", DataType::Utf8, true),
            Field::new("score", DataType::Float32, true),
            Field::new("reliability", DataType::Float64, true),
        ]));
        let columns: Vec<ArrayRef> = vec![
            Arc::new(StringArray::from(vec![Some("tt1"), None, Some("tt3")])),
            Arc::new(StringArray::from(vec![Some("m1"), Some("m2"), None])),
            Arc::new(arrow::array::Float32Array::from(vec![Some(0.5), Some(0.1), None])),
            Arc::new(Float64Array::from(vec![Some(0.75), None, Some(0.25)])),
        ];
        let batch = RecordBatch::try_new(schema.clone(), columns).unwrap();

        let mut buf = Vec::new();
        let mut writer = ArrowWriter::try_new(&mut buf, schema, None).unwrap();
        writer.write(&batch).unwrap();
        writer.close().unwrap();

        let rows = read_analytics_parquet(bytes::Bytes::from(buf)).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].imdb_id, "tt1");
        assert_eq!(rows[0].movie_key.as_deref(), Some("m1"));
        assert_eq!(rows[0].score, Some(0.5));
        assert_eq!(rows[0].reliability, Some(0.75));
        assert_eq!(rows[1].imdb_id, "tt3");
        assert_eq!(rows[1].movie_key, None);
        assert_eq!(rows[1].score, None);
    }

    #[test]
    fn missing_analytics_file_is_an_error() {
        let err = load_analytics(Path::new("/definitely/not/here.parquet")).unwrap_err();
        assert!(err.to_string().contains("analytics"));
    }
}
