// API request/response models (DTOs)

use crate::api::error::ApiError;
use crate::catalog::{MovieFilter, MovieQuery, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const YEAR_MIN_BOUND: i64 = 1900;
pub const YEAR_MAX_BOUND: i64 = 2100;

/// Envelope used for health and error bodies
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            meta: Some(Meta::now()),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
            meta: Some(Meta::now()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Meta {
    pub timestamp: DateTime<Utc>,
    pub request_id: String,
    pub version: String,
}

impl Meta {
    pub fn now() -> Self {
        Self {
            timestamp: Utc::now(),
            request_id: uuid::Uuid::new_v4().to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    /// "connected", "disconnected" or "initializing"
    pub database: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows: Option<u64>,
    pub uptime_seconds: u64,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct PosterResponse {
    pub url: Option<String>,
}

/// Raw query string of `GET /movies`
#[derive(Debug, Default, Deserialize)]
pub struct ListMoviesParams {
    pub q: Option<String>,
    pub region: Option<String>,
    pub year_min: Option<i64>,
    pub year_max: Option<i64>,
    pub min_imdb_votes: Option<i64>,
    pub min_douban_votes: Option<i64>,
    pub min_reliability: Option<f64>,
    pub sort: Option<String>,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

fn non_empty(raw: Option<String>) -> Option<String> {
    raw.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

impl ListMoviesParams {
    /// Reject out-of-range values instead of clamping them.
    pub fn validate(self) -> Result<MovieQuery, ApiError> {
        if let Some(y) = self.year_min {
            if y < YEAR_MIN_BOUND {
                return Err(ApiError::BadRequest(format!(
                    "year_min must be >= {YEAR_MIN_BOUND}"
                )));
            }
        }
        if let Some(y) = self.year_max {
            if y > YEAR_MAX_BOUND {
                return Err(ApiError::BadRequest(format!(
                    "year_max must be <= {YEAR_MAX_BOUND}"
                )));
            }
        }

        let min_imdb_votes = self.min_imdb_votes.unwrap_or(0);
        if min_imdb_votes < 0 {
            return Err(ApiError::BadRequest("min_imdb_votes must be >= 0".into()));
        }
        let min_douban_votes = self.min_douban_votes.unwrap_or(0);
        if min_douban_votes < 0 {
            return Err(ApiError::BadRequest("min_douban_votes must be >= 0".into()));
        }

        let min_reliability = self.min_reliability.unwrap_or(0.0);
        if !(0.0..=1.0).contains(&min_reliability) {
            return Err(ApiError::BadRequest(
                "min_reliability must be between 0 and 1".into(),
            ));
        }

        let page = self.page.unwrap_or(1);
        let page = u32::try_from(page)
            .ok()
            .filter(|p| *p >= 1)
            .ok_or_else(|| ApiError::BadRequest("page must be >= 1".into()))?;

        let page_size = self.page_size.unwrap_or(i64::from(DEFAULT_PAGE_SIZE));
        let page_size = u32::try_from(page_size)
            .ok()
            .filter(|s| (1..=MAX_PAGE_SIZE).contains(s))
            .ok_or_else(|| {
                ApiError::BadRequest(format!("page_size must be between 1 and {MAX_PAGE_SIZE}"))
            })?;

        Ok(MovieQuery {
            filter: MovieFilter {
                q: non_empty(self.q),
                region: non_empty(self.region),
                year_min: self.year_min,
                year_max: self.year_max,
                min_imdb_votes,
                min_douban_votes,
                min_reliability,
            },
            sort: non_empty(self.sort),
            page,
            page_size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rejects(params: ListMoviesParams) -> String {
        match params.validate() {
            Err(ApiError::BadRequest(msg)) => msg,
            other => panic!("expected a validation error, got {other:?}"),
        }
    }

    #[test]
    fn defaults_fill_in() {
        let q = ListMoviesParams::default().validate().unwrap();
        assert_eq!(q.page, 1);
        assert_eq!(q.page_size, DEFAULT_PAGE_SIZE);
        assert_eq!(q.filter, MovieFilter::default());
        assert_eq!(q.sort, None);
    }

    #[test]
    fn page_size_bounds_are_enforced_not_clamped() {
        assert!(rejects(ListMoviesParams {
            page_size: Some(0),
            ..Default::default()
        })
        .contains("page_size"));
        assert!(rejects(ListMoviesParams {
            page_size: Some(201),
            ..Default::default()
        })
        .contains("page_size"));
        let q = ListMoviesParams {
            page_size: Some(200),
            ..Default::default()
        }
        .validate()
        .unwrap();
        assert_eq!(q.page_size, 200);
    }

    #[test]
    fn page_must_be_positive() {
        for page in [0, -3, i64::MAX] {
            assert!(rejects(ListMoviesParams {
                page: Some(page),
                ..Default::default()
            })
            .contains("page"));
        }
    }

    #[test]
    fn year_and_floor_ranges() {
        rejects(ListMoviesParams {
            year_min: Some(1899),
            ..Default::default()
        });
        rejects(ListMoviesParams {
            year_max: Some(2101),
            ..Default::default()
        });
        rejects(ListMoviesParams {
            min_imdb_votes: Some(-1),
            ..Default::default()
        });
        rejects(ListMoviesParams {
            min_reliability: Some(1.01),
            ..Default::default()
        });
        rejects(ListMoviesParams {
            min_reliability: Some(f64::NAN),
            ..Default::default()
        });
    }

    #[test]
    fn blank_text_fields_are_absent() {
        let q = ListMoviesParams {
            q: Some("   ".into()),
            region: Some(String::new()),
            sort: Some(" year_asc ".into()),
            ..Default::default()
        }
        .validate()
        .unwrap();
        assert_eq!(q.filter.q, None);
        assert_eq!(q.filter.region, None);
        assert_eq!(q.sort.as_deref(), Some("year_asc"));
    }

    #[test]
    fn error_envelope_carries_meta() {
        let body = serde_json::to_value(ApiResponse::<()>::error("nope")).unwrap();
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "nope");
        assert!(body.get("data").is_none());
        assert!(body["meta"]["request_id"].is_string());
    }
}
