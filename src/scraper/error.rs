//! Page-level and discovery errors.

use thiserror::Error;

/// Failure fetching or parsing a landing or episode page.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Invalid URL: {input}: {reason}")]
    InvalidUrl { input: String, reason: String },

    #[error("Network error: could not reach {url}: {source}")]
    Network { url: String, source: reqwest::Error },

    #[error("HTTP {status} when fetching: {url}")]
    HttpStatus { status: u16, url: String },

    #[error("Failed to read response body from {url}: {source}")]
    BodyRead { url: String, source: reqwest::Error },

    /// The image-listing selector matched nothing; usually a site layout change.
    #[error("No images found on episode page {url} (site layout may have changed)")]
    NoImages { url: String },
}

impl FetchError {
    /// Timeouts, connection failures, truncated bodies, 5xx and 429 are worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Network { .. } | FetchError::BodyRead { .. } => true,
            FetchError::HttpStatus { status, .. } => *status >= 500 || *status == 429,
            FetchError::InvalidUrl { .. }
            | FetchError::NoImages { .. } => false,
        }
    }
}

/// Fatal to the run: no episodes could be identified.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("Could not load series page: {0}")]
    Fetch(#[from] FetchError),

    #[error("No episode listing found on {url} (check the URL or the episode_link selector)")]
    NoEpisodes { url: String },

    #[error("Episode selection failed: {0}")]
    Selection(String),
}
