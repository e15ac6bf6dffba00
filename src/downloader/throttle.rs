//! Politeness decorators: global spacing between downloads.
//!
//! Both decorators serialize downloads through one async mutex, so the delay
//! is global across every worker and host, not per-host. Spacing is measured
//! from the end of the previous download to the start of the next; slow
//! responses already provide their own spacing.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::trace;

use super::Downloader;
use crate::error::CrawlError;
use crate::request::Request;
use crate::response::Response;

/// Enforces a uniform delay between consecutive downloads.
pub struct FixedDelayDownloader<D> {
    inner: D,
    delay: Duration,
    last_finished: Mutex<Option<Instant>>,
}

impl<D: Downloader> FixedDelayDownloader<D> {
    pub fn new(inner: D, delay: Duration) -> Self {
        FixedDelayDownloader {
            inner,
            delay,
            last_finished: Mutex::new(None),
        }
    }
}

#[async_trait]
impl<D: Downloader> Downloader for FixedDelayDownloader<D> {
    async fn download(&self, request: Request) -> Result<Response, CrawlError> {
        // Hold the gate across the inner call so concurrent workers cannot
        // interleave downloads inside the spacing window.
        let mut last = self.last_finished.lock().await;
        if let Some(finished) = *last {
            let elapsed = finished.elapsed();
            if elapsed < self.delay {
                let wait = self.delay - elapsed;
                trace!("throttling {} for {:?}", request.url, wait);
                tokio::time::sleep(wait).await;
            }
        }
        let result = self.inner.download(request).await;
        *last = Some(Instant::now());
        result
    }

    async fn close(&self) {
        self.inner.close().await;
    }
}

/// Like [`FixedDelayDownloader`], but draws each delay uniformly from
/// `[min, max]`. Randomized spacing is harder for servers to identify as
/// automated traffic.
pub struct RandomDelayDownloader<D> {
    inner: D,
    min: Duration,
    max: Duration,
    last_finished: Mutex<Option<Instant>>,
}

impl<D: Downloader> RandomDelayDownloader<D> {
    pub fn new(inner: D, min: Duration, max: Duration) -> Result<Self, CrawlError> {
        if min > max {
            return Err(CrawlError::Configuration(
                "random delay min must not exceed max".to_string(),
            ));
        }
        Ok(RandomDelayDownloader {
            inner,
            min,
            max,
            last_finished: Mutex::new(None),
        })
    }

    fn draw_delay(&self) -> Duration {
        if self.min == self.max {
            return self.min;
        }
        // The rng handle is not Send, so the draw happens before any await.
        let nanos = rand::thread_rng().gen_range(self.min.as_nanos()..=self.max.as_nanos());
        Duration::from_nanos(nanos as u64)
    }
}

#[async_trait]
impl<D: Downloader> Downloader for RandomDelayDownloader<D> {
    async fn download(&self, request: Request) -> Result<Response, CrawlError> {
        let delay = self.draw_delay();
        let mut last = self.last_finished.lock().await;
        if let Some(finished) = *last {
            let elapsed = finished.elapsed();
            if elapsed < delay {
                let wait = delay - elapsed;
                trace!("throttling {} for {:?}", request.url, wait);
                tokio::time::sleep(wait).await;
            }
        }
        let result = self.inner.download(request).await;
        *last = Some(Instant::now());
        result
    }

    async fn close(&self) {
        self.inner.close().await;
    }
}
