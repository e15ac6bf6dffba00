//! End-to-end crawl flow against a canned in-process downloader.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use trawler::{
    CrawlError, Downloader, EngineBuilder, EngineState, ParseOutput, Pipeline, Request, Response,
    Spider,
};

type MapItem = HashMap<String, serde_json::Value>;

/// Routes engine logs through the test harness; `RUST_LOG` controls verbosity.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Serves canned bodies keyed by URL path. Unknown paths fail the download.
struct SiteDownloader {
    pages: HashMap<String, String>,
    latency: Duration,
}

impl SiteDownloader {
    fn new(pages: &[(&str, &str)]) -> Arc<Self> {
        Self::with_latency(pages, Duration::from_millis(1))
    }

    fn with_latency(pages: &[(&str, &str)], latency: Duration) -> Arc<Self> {
        Arc::new(SiteDownloader {
            pages: pages
                .iter()
                .map(|(path, body)| (path.to_string(), body.to_string()))
                .collect(),
            latency,
        })
    }
}

#[async_trait]
impl Downloader for SiteDownloader {
    async fn download(&self, request: Request) -> Result<Response, CrawlError> {
        tokio::time::sleep(self.latency).await;
        let body = self
            .pages
            .get(request.url.path())
            .cloned()
            .ok_or_else(|| CrawlError::General(format!("no such page: {}", request.url)))?;
        let url = request.url.clone();
        Ok(Response {
            request,
            status: 200,
            reason: Some("OK".into()),
            headers: HashMap::new(),
            body: body.into_bytes(),
            encoding: None,
            url,
        })
    }
}

/// Follows `link:` lines and emits one item per page.
struct CrawlSpider;

#[async_trait]
impl Spider for CrawlSpider {
    type Item = MapItem;

    fn name(&self) -> &str {
        "flow"
    }

    fn start_urls(&self) -> Vec<String> {
        vec!["https://example.com/".to_string()]
    }

    async fn parse(&self, response: Response) -> Result<ParseOutput<MapItem>, CrawlError> {
        let mut output = ParseOutput::new();
        let mut item = HashMap::new();
        item.insert("url".to_string(), serde_json::json!(response.url.as_str()));
        output.add_item(item);
        for line in response.text().lines() {
            if let Some(link) = line.strip_prefix("link: ") {
                output.add_request(Request::get(link)?);
            }
        }
        Ok(output)
    }
}

/// Collects every item it sees, for assertions.
struct CollectingPipeline {
    items: Mutex<Vec<MapItem>>,
}

impl CollectingPipeline {
    fn new() -> Arc<Self> {
        Arc::new(CollectingPipeline {
            items: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl Pipeline<MapItem> for CollectingPipeline {
    fn name(&self) -> &str {
        "collector"
    }

    async fn process_item(&self, item: MapItem) -> Result<Option<MapItem>, CrawlError> {
        self.items.lock().push(item.clone());
        Ok(Some(item))
    }
}

fn three_page_site() -> Arc<SiteDownloader> {
    SiteDownloader::new(&[
        (
            "/",
            "link: https://example.com/a\nlink: https://example.com/b\n",
        ),
        ("/a", "link: https://example.com/b\n"),
        ("/b", "leaf\n"),
    ])
}

#[tokio::test]
async fn crawl_visits_every_reachable_page_once() {
    init_tracing();
    let collector = CollectingPipeline::new();
    let engine = EngineBuilder::new(CrawlSpider)
        .downloader(three_page_site())
        .pipeline(collector.clone())
        .concurrency(4)
        .build()
        .unwrap();

    let stats = engine.crawl().await.unwrap();

    // /b is linked from both / and /a; the duplicate filter admits it once.
    assert_eq!(stats.requests_total, 3);
    assert_eq!(stats.pages_crawled, 3);
    assert_eq!(stats.items_scraped, 3);
    assert_eq!(collector.items.lock().len(), 3);
    assert_eq!(engine.state(), EngineState::Stopped);
}

#[tokio::test]
async fn crawl_terminates_with_single_seed_and_no_links() {
    init_tracing();
    let engine = EngineBuilder::new(CrawlSpider)
        .downloader(SiteDownloader::new(&[("/", "no links here\n")]))
        .build()
        .unwrap();
    let stats = engine.crawl().await.unwrap();
    assert_eq!(stats.requests_total, 1);
    assert_eq!(stats.items_scraped, 1);
}

#[tokio::test]
async fn pause_suspends_dispatch_and_resume_continues() {
    init_tracing();
    let pages = [
        (
            "/",
            "link: https://example.com/a\nlink: https://example.com/b\n",
        ),
        ("/a", "link: https://example.com/b\n"),
        ("/b", "leaf\n"),
    ];
    let engine = EngineBuilder::new(CrawlSpider)
        .downloader(SiteDownloader::with_latency(
            &pages,
            Duration::from_millis(100),
        ))
        .concurrency(1)
        .build()
        .unwrap();

    engine.start().await.unwrap();
    engine.pause().unwrap();
    assert_eq!(engine.state(), EngineState::Paused);

    // Let any in-flight download finish; paused dispatch must not make
    // further progress afterwards.
    tokio::time::sleep(Duration::from_millis(150)).await;
    let paused_total = engine.stats().requests_total;
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(engine.stats().requests_total, paused_total);

    engine.resume().unwrap();
    engine.wait_for_completion().await;
    assert_eq!(engine.stats().requests_total, 3);
}

#[tokio::test]
async fn stop_reaches_stopped_and_stays_there() {
    init_tracing();
    let engine = EngineBuilder::new(CrawlSpider)
        .downloader(three_page_site())
        .build()
        .unwrap();
    engine.start().await.unwrap();
    engine.stop().await.unwrap();
    assert_eq!(engine.state(), EngineState::Stopped);

    // A second stop is a no-op, not an error.
    engine.stop().await.unwrap();
    assert_eq!(engine.state(), EngineState::Stopped);
}

#[tokio::test]
async fn stats_snapshots_are_published_while_crawling() {
    let engine = EngineBuilder::new(CrawlSpider)
        .downloader(three_page_site())
        .build()
        .unwrap();
    let mut rx = engine.subscribe_stats();
    let stats = engine.crawl().await.unwrap();
    assert_eq!(stats.requests_total, 3);

    // The watch channel holds the latest snapshot after completion.
    let latest = rx.borrow_and_update().clone();
    assert_eq!(latest.requests_total, 3);
    assert!(latest.status_codes.get(&200).copied().unwrap_or(0) >= 3);
}

#[tokio::test]
async fn pipeline_open_failure_aborts_start() {
    struct BrokenPipeline;

    #[async_trait]
    impl Pipeline<MapItem> for BrokenPipeline {
        fn name(&self) -> &str {
            "broken"
        }

        async fn open(&self) -> Result<(), CrawlError> {
            Err(CrawlError::General("no disk".into()))
        }

        async fn process_item(&self, item: MapItem) -> Result<Option<MapItem>, CrawlError> {
            Ok(Some(item))
        }
    }

    let engine = EngineBuilder::new(CrawlSpider)
        .downloader(three_page_site())
        .pipeline(Arc::new(BrokenPipeline))
        .build()
        .unwrap();
    assert!(engine.start().await.is_err());
    assert_eq!(engine.state(), EngineState::Error);
}

#[tokio::test]
async fn failed_open_closes_already_opened_pipelines() {
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Records whether close ran.
    struct TrackedPipeline {
        closed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Pipeline<MapItem> for TrackedPipeline {
        fn name(&self) -> &str {
            "tracked"
        }

        async fn process_item(&self, item: MapItem) -> Result<Option<MapItem>, CrawlError> {
            Ok(Some(item))
        }

        async fn close(&self) -> Result<(), CrawlError> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingOpenPipeline;

    #[async_trait]
    impl Pipeline<MapItem> for FailingOpenPipeline {
        fn name(&self) -> &str {
            "failing_open"
        }

        async fn open(&self) -> Result<(), CrawlError> {
            Err(CrawlError::General("no disk".into()))
        }

        async fn process_item(&self, item: MapItem) -> Result<Option<MapItem>, CrawlError> {
            Ok(Some(item))
        }
    }

    let closed = Arc::new(AtomicBool::new(false));
    let engine = EngineBuilder::new(CrawlSpider)
        .downloader(three_page_site())
        .pipeline(Arc::new(TrackedPipeline {
            closed: closed.clone(),
        }))
        .pipeline(Arc::new(FailingOpenPipeline))
        .build()
        .unwrap();

    assert!(engine.start().await.is_err());
    assert_eq!(engine.state(), EngineState::Error);
    // The pipeline that opened before the failure must be closed again.
    assert!(closed.load(Ordering::SeqCst));
}
