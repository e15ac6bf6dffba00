//! Error types for the crawl engine.
//!
//! All fallible operations in the crate return [`CrawlError`]. Per-request
//! failures are caught at the engine's request-processing boundary and fed
//! into retry/statistics handling; they never escape to crash the crawl loop.

use std::time::Duration;

/// The error type shared by every component of the engine.
#[derive(Debug, thiserror::Error)]
pub enum CrawlError {
    /// Invalid engine or backend configuration, detected at build time.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A URL could not be parsed.
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The downloader was handed an HTTP method it does not support.
    #[error("unsupported HTTP method: {0}")]
    UnsupportedMethod(String),

    /// A download failed with a transport-level error.
    #[error("download failed for {url}: {source}")]
    Download {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// A download exceeded the configured timeout.
    #[error("download timed out for {url} after {timeout:?}")]
    Timeout { url: String, timeout: Duration },

    /// The spider's parse callback failed. The message is surfaced as-is,
    /// never interpreted by the engine.
    #[error("spider parse error: {0}")]
    Parse(String),

    /// An item pipeline rejected or failed to process an item.
    #[error("pipeline '{name}' failed: {message}")]
    Pipeline { name: String, message: String },

    /// A request ran out of retry attempts. Terminal.
    #[error("retries exhausted for {url} after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        url: String,
        attempts: u32,
        last_error: String,
    },

    /// The remote duplicate store reported an error. Callers treat this as
    /// fail-open rather than a crawl-stopping condition.
    #[error("duplicate store error: {0}")]
    Store(#[from] redis::RedisError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An engine lifecycle operation was invoked from the wrong state.
    #[error("invalid engine state: {0}")]
    InvalidState(String),

    #[error("{0}")]
    General(String),
}

impl CrawlError {
    /// Whether this error is terminal for the request it belongs to, i.e.
    /// retrying cannot help.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CrawlError::RetriesExhausted { .. }
                | CrawlError::UnsupportedMethod(_)
                | CrawlError::InvalidUrl(_)
                | CrawlError::Configuration(_)
        )
    }
}
