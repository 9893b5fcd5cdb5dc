// HTTP request handlers for API endpoints

use crate::api::error::ApiError;
use crate::api::models::*;
use crate::api::state::AppState;
use crate::catalog::CatalogMode;
use crate::enrichment::DetailStore;
use actix_web::{web, HttpResponse};

/// Health check endpoint
pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let (database, mode, rows) = match state.catalog.peek() {
        Some(catalog) => {
            let database = if catalog.ping().await {
                "connected"
            } else {
                "disconnected"
            };
            (
                database,
                Some(catalog.mode().as_str().to_string()),
                Some(catalog.rows()),
            )
        }
        None => ("initializing", None, None),
    };

    HttpResponse::Ok().json(ApiResponse::success(HealthResponse {
        status: "ok".to_string(),
        database: database.to_string(),
        mode,
        rows,
        uptime_seconds: state.started_at.elapsed().as_secs(),
    }))
}

/// Filtered, sorted, paginated movie listing
pub async fn list_movies(
    state: web::Data<AppState>,
    params: web::Query<ListMoviesParams>,
) -> Result<HttpResponse, ApiError> {
    let query = params.into_inner().validate()?;

    tracing::debug!(
        q = ?query.filter.q,
        region = ?query.filter.region,
        sort = ?query.sort,
        page = query.page,
        page_size = query.page_size,
        "movie listing requested"
    );

    let catalog = state
        .catalog
        .get()
        .await
        .map_err(|e| ApiError::internal("catalog unavailable", e))?;
    let page = catalog
        .list(&query)
        .await
        .map_err(|e| ApiError::internal("movie query failed", e))?;

    Ok(HttpResponse::Ok().json(page))
}

/// Poster URL for an IMDb id; lookup failures surface as `null`
pub async fn movie_poster(state: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    let imdb_id = path.into_inner();
    let url = state.posters.lookup(&imdb_id).await;
    HttpResponse::Ok().json(PosterResponse { url })
}

/// Raw enrichment document for a movie key
pub async fn movie_details(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let key = path.into_inner();
    let not_found = || ApiError::NotFound(format!("no details for movie key {key}"));

    if !DetailStore::is_valid_key(&key) {
        return Err(not_found());
    }

    let catalog = state
        .catalog
        .get()
        .await
        .map_err(|e| ApiError::internal("catalog unavailable", e))?;
    if catalog.mode() != CatalogMode::Hybrid {
        return Err(not_found());
    }

    let assigned = catalog
        .has_movie_key(&key)
        .await
        .map_err(|e| ApiError::internal("movie key lookup failed", e))?;
    if !assigned {
        return Err(not_found());
    }

    match state.details.load(&key).await {
        Ok(Some(doc)) => Ok(HttpResponse::Ok().json(doc)),
        Ok(None) => Err(not_found()),
        Err(e) => Err(ApiError::internal("detail document unreadable", e)),
    }
}
