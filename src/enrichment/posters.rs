use anyhow::{bail, Context, Result};
use regex::Regex;
use reqwest::{header, Client};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::time::Duration;
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://www.imdb.com/title";
const DEFAULT_TIMEOUT_SECS: u64 = 5;
const USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// Source of poster URLs for an IMDb title.
///
/// `Ok(None)` means the lookup succeeded and the title has no poster;
/// `Err` means the lookup itself failed and may be retried later.
#[async_trait::async_trait]
pub trait PosterFetcher: Send + Sync {
    async fn fetch(&self, imdb_id: &str) -> Result<Option<String>>;
}

/// `tt` followed by digits.
pub fn is_imdb_id(id: &str) -> bool {
    id.len() > 2
        && id.starts_with("tt")
        && id[2..].bytes().all(|b| b.is_ascii_digit())
}

/// Scrapes the `og:image` tag from IMDb title pages.
#[derive(Debug, Clone)]
pub struct ImdbPosterScraper {
    base_url: String,
    http: Client,
    patterns: Vec<Regex>,
}

impl ImdbPosterScraper {
    pub fn new(base_url: Option<&str>, timeout_secs: Option<u64>) -> Result<Self> {
        let base_url = base_url
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/')
            .to_string();
        url::Url::parse(&base_url).with_context(|| format!("invalid poster base url {base_url}"))?;

        let timeout_secs = timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS);
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;

        Ok(Self {
            base_url,
            http,
            patterns: poster_patterns()?,
        })
    }

    pub fn extract(&self, html: &str) -> Option<String> {
        extract_poster(&self.patterns, html)
    }
}

fn poster_patterns() -> Result<Vec<Regex>> {
    Ok(vec![
        Regex::new(r#"<meta[^>]*property=["']og:image["'][^>]*content=["']([^"']+)["']"#)?,
        Regex::new(r#"<meta[^>]*content=["']([^"']+)["'][^>]*property=["']og:image["']"#)?,
        Regex::new(r#""image"\s*:\s*"(https?://[^"]+)""#)?,
    ])
}

fn extract_poster(patterns: &[Regex], html: &str) -> Option<String> {
    patterns
        .iter()
        .find_map(|re| re.captures(html))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().replace("&amp;", "&"))
        .filter(|url| !url.is_empty())
}

#[async_trait::async_trait]
impl PosterFetcher for ImdbPosterScraper {
    async fn fetch(&self, imdb_id: &str) -> Result<Option<String>> {
        let url = format!("{}/{}/", self.base_url, imdb_id);
        let resp = self
            .http
            .get(&url)
            .header(header::ACCEPT_LANGUAGE, "en-US,en;q=0.9")
            .send()
            .await
            .with_context(|| format!("poster request failed for {imdb_id}"))?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            bail!("poster page for {imdb_id} returned {}", resp.status());
        }

        let html = resp.text().await?;
        Ok(self.extract(&html))
    }
}

/// Best-effort poster lookup with a process-lifetime cache.
///
/// Never fails: any lookup error yields `None` and is left out of the cache.
#[derive(Clone)]
pub struct PosterService {
    fetcher: Arc<dyn PosterFetcher>,
    cache: Arc<RwLock<HashMap<String, Option<String>>>>,
}

impl PosterService {
    pub fn new(fetcher: Arc<dyn PosterFetcher>) -> Self {
        Self {
            fetcher,
            cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn from_env() -> Result<Self> {
        let base_url = crate::util::env::env_opt("POSTER_BASE_URL");
        let timeout_secs = crate::util::env::env_parse("POSTER_TIMEOUT_SECS", DEFAULT_TIMEOUT_SECS);
        let scraper = ImdbPosterScraper::new(base_url.as_deref(), Some(timeout_secs))?;
        Ok(Self::new(Arc::new(scraper)))
    }

    fn cached(&self, imdb_id: &str) -> Option<Option<String>> {
        let guard = self.cache.read().unwrap_or_else(|p| p.into_inner());
        guard.get(imdb_id).cloned()
    }

    pub fn cached_len(&self) -> usize {
        self.cache.read().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub async fn lookup(&self, imdb_id: &str) -> Option<String> {
        if !is_imdb_id(imdb_id) {
            return None;
        }
        if let Some(hit) = self.cached(imdb_id) {
            return hit;
        }

        match self.fetcher.fetch(imdb_id).await {
            Ok(url) => {
                // Concurrent misses for one id may both land here; last write wins.
                self.cache
                    .write()
                    .unwrap_or_else(|p| p.into_inner())
                    .insert(imdb_id.to_string(), url.clone());
                url
            }
            Err(e) => {
                debug!(imdb_id, error = %format!("{e:#}"), "poster lookup failed");
                None
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fetcher returning a canned answer and counting calls.
    pub struct CountingFetcher {
        pub calls: AtomicUsize,
        pub answer: Option<String>,
        pub fail: bool,
    }

    impl CountingFetcher {
        pub fn found(url: &str) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                answer: Some(url.to_string()),
                fail: false,
            })
        }

        pub fn failing() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                answer: None,
                fail: true,
            })
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl PosterFetcher for CountingFetcher {
        async fn fetch(&self, _imdb_id: &str) -> Result<Option<String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                bail!("upstream timed out");
            }
            Ok(self.answer.clone())
        }
    }
}
