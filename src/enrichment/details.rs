use anyhow::{Context, Result};
use serde_json::Value;
use std::io::ErrorKind;
use std::path::PathBuf;

/// Per-movie JSON detail documents stored as `<dir>/<movie_key>.json`.
#[derive(Debug, Clone, Default)]
pub struct DetailStore {
    dir: Option<PathBuf>,
}

impl DetailStore {
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self { dir }
    }

    pub fn from_env() -> Self {
        Self::new(crate::util::env::env_opt("DETAILS_DIR").map(PathBuf::from))
    }

    pub fn is_configured(&self) -> bool {
        self.dir.is_some()
    }

    /// Keys double as file names, so only a conservative character set passes.
    pub fn is_valid_key(key: &str) -> bool {
        !key.is_empty()
            && key.len() <= 128
            && key
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
    }

    /// Load the document for `key`; `Ok(None)` when it does not exist.
    pub async fn load(&self, key: &str) -> Result<Option<Value>> {
        let Some(dir) = &self.dir else {
            return Ok(None);
        };
        if !Self::is_valid_key(key) {
            return Ok(None);
        }

        let path = dir.join(format!("{key}.json"));
        let raw = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read {}", path.display()))
            }
        };
        let doc = serde_json::from_slice(&raw)
            .with_context(|| format!("invalid JSON in {}", path.display()))?;
        Ok(Some(doc))
    }
}
