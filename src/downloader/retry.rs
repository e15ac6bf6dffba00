//! Retry decorator with exponential backoff.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::Downloader;
use crate::error::CrawlError;
use crate::request::Request;
use crate::response::Response;

/// Wraps any downloader and retries failed downloads.
///
/// Attempt `n` (zero-based) sleeps `base_delay * 2^n` before running, so the
/// first retry waits one base delay, the second two, the third four. Terminal
/// errors and exhaustion propagate the last failure unchanged.
pub struct RetryDownloader<D> {
    inner: D,
    max_attempts: u32,
    base_delay: Duration,
}

impl<D: Downloader> RetryDownloader<D> {
    pub fn new(inner: D, max_attempts: u32, base_delay: Duration) -> Self {
        RetryDownloader {
            inner,
            max_attempts,
            base_delay,
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt)
    }
}

#[async_trait]
impl<D: Downloader> Downloader for RetryDownloader<D> {
    async fn download(&self, request: Request) -> Result<Response, CrawlError> {
        let mut attempt = 0;
        loop {
            match self.inner.download(request.clone()).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_terminal() => return Err(e),
                Err(e) => {
                    attempt += 1;
                    if attempt > self.max_attempts {
                        warn!(
                            "giving up on {} after {} attempts: {}",
                            request.url, attempt, e
                        );
                        return Err(e);
                    }
                    let delay = self.backoff(attempt - 1);
                    debug!(
                        "retrying {} in {:?} (attempt {}/{}): {}",
                        request.url, delay, attempt, self.max_attempts, e
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn close(&self) {
        self.inner.close().await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    /// Fails a configured number of times before succeeding.
    struct FlakyDownloader {
        failures: u32,
        calls: AtomicU32,
    }

    impl FlakyDownloader {
        fn new(failures: u32) -> Self {
            FlakyDownloader {
                failures,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl Downloader for FlakyDownloader {
        async fn download(&self, request: Request) -> Result<Response, CrawlError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(CrawlError::General(format!("flake {}", call)));
            }
            let url = request.url.clone();
            Ok(Response {
                request,
                status: 200,
                reason: Some("OK".into()),
                headers: Default::default(),
                body: Vec::new(),
                encoding: None,
                url,
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures() {
        let downloader = RetryDownloader::new(
            FlakyDownloader::new(2),
            3,
            Duration::from_millis(10),
        );
        let request = Request::get("https://example.com/").unwrap();
        let response = downloader.download(request).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(downloader.inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_propagates_last_error() {
        let downloader = RetryDownloader::new(
            FlakyDownloader::new(10),
            2,
            Duration::from_millis(10),
        );
        let request = Request::get("https://example.com/").unwrap();
        let err = downloader.download(request).await.unwrap_err();
        assert!(matches!(err, CrawlError::General(_)));
        // initial attempt + 2 retries
        assert_eq!(downloader.inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn terminal_errors_skip_retry() {
        struct AlwaysUnsupported;

        #[async_trait]
        impl Downloader for AlwaysUnsupported {
            async fn download(&self, _request: Request) -> Result<Response, CrawlError> {
                Err(CrawlError::UnsupportedMethod("PATCH".into()))
            }
        }

        let downloader = RetryDownloader::new(AlwaysUnsupported, 3, Duration::from_millis(10));
        let request = Request::get("https://example.com/").unwrap();
        let err = downloader.download(request).await.unwrap_err();
        assert!(matches!(err, CrawlError::UnsupportedMethod(_)));
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let downloader = RetryDownloader::new(FlakyDownloader::new(0), 3, Duration::from_millis(100));
        assert_eq!(downloader.backoff(0), Duration::from_millis(100));
        assert_eq!(downloader.backoff(1), Duration::from_millis(200));
        assert_eq!(downloader.backoff(2), Duration::from_millis(400));
    }
}
