//! Process-wide tracing setup for the API binary.

use crate::util::env::env_opt;
use tracing_subscriber::{fmt::SubscriberBuilder, EnvFilter};

/// Used when `RUST_LOG` is unset: service logs at info, sqlx statement noise muted.
pub const DEFAULT_FILTER: &str = "info,sqlx=warn";

/// Output layout, selected with `LOG_FORMAT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Target, file and line on every event.
    Full,
    /// Single-line events without source locations.
    Compact,
}

impl LogFormat {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(|s| s.trim().to_ascii_lowercase()) {
            Some(s) if s == "compact" => LogFormat::Compact,
            _ => LogFormat::Full,
        }
    }
}

fn env_filter(fallback: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback))
}

/// Install the global subscriber. `.env` is loaded first so `RUST_LOG` and
/// `LOG_FORMAT` may live there.
pub fn init_tracing() -> Result<(), anyhow::Error> {
    let format = LogFormat::parse(env_opt("LOG_FORMAT").as_deref());
    let filter = env_filter(DEFAULT_FILTER);

    let installed = match format {
        LogFormat::Full => SubscriberBuilder::default()
            .with_env_filter(filter)
            .with_target(true)
            .with_line_number(true)
            .with_file(true)
            .try_init(),
        LogFormat::Compact => SubscriberBuilder::default()
            .with_env_filter(filter)
            .compact()
            .with_target(false)
            .try_init(),
    };
    installed.map_err(|e| anyhow::anyhow!("failed to initialize tracing: {}", e))
}
