// Best-effort lookups layered on top of the catalog

pub mod details;
pub mod posters;

pub use details::DetailStore;
pub use posters::{ImdbPosterScraper, PosterFetcher, PosterService};
