//! Downloader decorator composition: retry wrapped around throttling.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use trawler::{
    CrawlError, Downloader, FixedDelayDownloader, Request, Response, RetryDownloader,
};

/// Fails the first `failures` downloads, then succeeds, counting every call.
struct FlakyDownloader {
    failures: u32,
    calls: Arc<AtomicU32>,
}

impl FlakyDownloader {
    fn new(failures: u32) -> (Self, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        (
            FlakyDownloader {
                failures,
                calls: calls.clone(),
            },
            calls,
        )
    }
}

#[async_trait]
impl Downloader for FlakyDownloader {
    async fn download(&self, request: Request) -> Result<Response, CrawlError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(CrawlError::General(format!("transient failure {}", call)));
        }
        let url = request.url.clone();
        Ok(Response {
            request,
            status: 200,
            reason: Some("OK".into()),
            headers: HashMap::new(),
            body: b"ok".to_vec(),
            encoding: None,
            url,
        })
    }
}

fn req() -> Request {
    Request::get("https://example.com/flaky").unwrap()
}

#[tokio::test(start_paused = true)]
async fn retry_recovers_from_transient_failures() {
    let (flaky, calls) = FlakyDownloader::new(2);
    let downloader = RetryDownloader::new(flaky, 3, Duration::from_millis(50));

    let response = downloader.download(req()).await.unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn retry_gives_up_after_max_attempts() {
    let (flaky, calls) = FlakyDownloader::new(u32::MAX);
    let downloader = RetryDownloader::new(flaky, 2, Duration::from_millis(50));

    let err = downloader.download(req()).await.unwrap_err();
    assert!(matches!(err, CrawlError::General(_)));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn retry_composes_over_throttling() {
    let (flaky, calls) = FlakyDownloader::new(1);
    let throttled = FixedDelayDownloader::new(flaky, Duration::from_millis(200));
    let downloader = RetryDownloader::new(throttled, 3, Duration::from_millis(10));

    // The retry goes back through the throttle, so the second attempt is
    // spaced from the first.
    let started = tokio::time::Instant::now();
    let response = downloader.download(req()).await.unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(started.elapsed() >= Duration::from_millis(200));
}

#[tokio::test(start_paused = true)]
async fn decorated_stack_is_shared_across_tasks() {
    let (flaky, calls) = FlakyDownloader::new(0);
    let downloader = Arc::new(RetryDownloader::new(
        FixedDelayDownloader::new(flaky, Duration::from_millis(20)),
        1,
        Duration::from_millis(10),
    ));

    let mut handles = Vec::new();
    for _ in 0..4 {
        let downloader = downloader.clone();
        handles.push(tokio::spawn(async move {
            downloader.download(req()).await.unwrap().status
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap(), 200);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}
