use thiserror::Error;

use revharvest_core::ConfigError;

/// Errors that escape the pipeline. Per-attempt network failures and blocks
/// are not errors; they are recovered inside the pagination loop.
#[derive(Debug, Error)]
pub enum ScraperError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid URL \"{url}\": {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("browser error: {0}")]
    Browser(String),

    #[error("identity pool is closed")]
    IdentityPoolClosed,
}
