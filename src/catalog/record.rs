// Movie record exposed by the API and its projection from result rows

use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Decode, FromRow, Row, Sqlite, Type};

/// Placeholder used when a row carries no title.
pub const UNKNOWN_TITLE: &str = "Unknown";

/// One row of the `movies` relation in its external shape.
///
/// Every optional field serializes as `null` when unknown; fields are never
/// skipped, so clients see the same keys whether or not the analytics dataset
/// was loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovieRecord {
    pub title: String,
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
    /// `douban_rating - imdb_rating`, null when either side is missing.
    pub gap: Option<f64>,
    pub movie_key: Option<String>,
    pub score: Option<f64>,
    pub reliability: Option<f64>,
}

/// Read a nullable column, treating a column missing from the result set the
/// same as a NULL value.
fn optional<'r, T>(row: &'r SqliteRow, column: &str) -> Result<Option<T>, sqlx::Error>
where
    T: Decode<'r, Sqlite> + Type<Sqlite>,
{
    match row.try_get::<Option<T>, _>(column) {
        Ok(value) => Ok(value),
        Err(sqlx::Error::ColumnNotFound(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

impl<'r> FromRow<'r, SqliteRow> for MovieRecord {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            title: optional::<String>(row, "title")?
                .unwrap_or_else(|| UNKNOWN_TITLE.to_string()),
            year: optional(row, "year")?,
            region: optional(row, "region")?,
            imdb_id: optional(row, "imdb_id")?,
            imdb_url: optional(row, "imdb_url")?,
            douban_id: optional(row, "douban_id")?,
            douban_url: optional(row, "douban_url")?,
            imdb_rating: optional(row, "imdb_rating")?,
            imdb_votes: optional(row, "imdb_votes")?,
            douban_rating: optional(row, "douban_rating")?,
            douban_votes: optional(row, "douban_votes")?,
            gap: optional(row, "gap")?,
            movie_key: optional(row, "movie_key")?,
            score: optional(row, "score")?,
            reliability: optional(row, "reliability")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::connect;

    #[tokio::test]
    async fn missing_columns_project_as_unknown() {
        let pool = connect(None, 1).await.unwrap();
        let record: MovieRecord = sqlx::query_as("SELECT 'Heat' AS title, 1995 AS year")
            .fetch_one(&pool)
            .await
            .unwrap();

        assert_eq!(record.title, "Heat");
        assert_eq!(record.year, Some(1995));
        assert_eq!(record.imdb_id, None);
        assert_eq!(record.gap, None);
        assert_eq!(record.movie_key, None);
        assert_eq!(record.score, None);
        assert_eq!(record.reliability, None);
    }

    #[tokio::test]
    async fn null_title_falls_back_to_placeholder() {
        let pool = connect(None, 1).await.unwrap();
        let record: MovieRecord = sqlx::query_as("SELECT NULL AS title, 7.5 AS imdb_rating")
            .fetch_one(&pool)
            .await
            .unwrap();

        assert_eq!(record.title, UNKNOWN_TITLE);
        assert_eq!(record.imdb_rating, Some(7.5));
    }

    #[test]
    fn unknown_fields_serialize_as_null() {
        let record = MovieRecord {
            title: "Heat".into(),
            year: None,
            region: None,
            imdb_id: None,
            imdb_url: None,
            douban_id: None,
            douban_url: None,
            imdb_rating: None,
            imdb_votes: None,
            douban_rating: None,
            douban_votes: None,
            gap: None,
            movie_key: None,
            score: None,
            reliability: None,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["movie_key"], serde_json::Value::Null);
        assert!(json.as_object().unwrap().contains_key("reliability"));
    }
}
