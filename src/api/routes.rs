// API route configuration

use crate::api::error::ApiError;
use crate::api::handlers;
use actix_web::web;

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg
        // Malformed query strings get the same 400 envelope as range errors
        .app_data(
            web::QueryConfig::default()
                .error_handler(|err, _req| ApiError::BadRequest(err.to_string()).into()),
        )
        .route("/health", web::get().to(handlers::health_check))
        .route("/", web::get().to(handlers::health_check))
        .route("/movies", web::get().to(handlers::list_movies))
        .route("/movie/{id}/poster", web::get().to(handlers::movie_poster))
        .route("/movie/{key}/details", web::get().to(handlers::movie_details));
}
