//! # Downloader Module
//!
//! The transport seam of the engine: a [`Downloader`] turns a [`Request`]
//! into a [`Response`], and decorators layer policy on top without the
//! engine knowing the difference.
//!
//! - [`HttpDownloader`] is the base transport.
//! - [`RetryDownloader`] retries transient failures with exponential backoff.
//! - [`FixedDelayDownloader`] and [`RandomDelayDownloader`] enforce global
//!   politeness spacing between downloads.
//!
//! Decorators compose by wrapping: a retrying, throttled downloader is
//! `RetryDownloader::new(FixedDelayDownloader::new(HttpDownloader::new(..`

mod http;
mod retry;
mod throttle;

pub use http::HttpDownloader;
pub use retry::RetryDownloader;
pub use throttle::{FixedDelayDownloader, RandomDelayDownloader};

use async_trait::async_trait;

use crate::error::CrawlError;
use crate::request::Request;
use crate::response::Response;

/// Turns requests into responses. Implementations must be safe to call
/// concurrently from many workers.
#[async_trait]
pub trait Downloader: Send + Sync {
    async fn download(&self, request: Request) -> Result<Response, CrawlError>;

    /// Releases transport resources. Default is a no-op.
    async fn close(&self) {}
}

// Lets decorators wrap shared or trait-object downloaders.
#[async_trait]
impl<D: Downloader + ?Sized> Downloader for std::sync::Arc<D> {
    async fn download(&self, request: Request) -> Result<Response, CrawlError> {
        (**self).download(request).await
    }

    async fn close(&self) {
        (**self).close().await;
    }
}
