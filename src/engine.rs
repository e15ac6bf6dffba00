//! # Engine Module
//!
//! The crawl engine: owns the scheduler, the worker pool, and every
//! collaborator, and drives requests from seed to scraped item.
//!
//! ## Lifecycle
//!
//! `start` seeds the scheduler and spawns the dispatch loop; `pause` and
//! `resume` toggle dispatching without dropping queued work; `stop` is
//! idempotent and triggers exactly one cleanup. A crawl also ends naturally
//! when the scheduler is empty and no worker is in flight.
//!
//! ## Dispatch
//!
//! The dispatch loop dequeues, acquires a concurrency permit, and spawns a
//! worker per request. Workers run the middleware chain around the download,
//! hand the response to the spider, route items to the pipeline channel, and
//! feed child requests through the domain filter, the robots gate, and the
//! duplicate filter's atomic reserve before they reach the scheduler.
//!
//! Completion detection is signal-driven: an in-flight counter plus a
//! notification on every enqueue and worker exit. Quiescence is sound
//! because workers enqueue children before decrementing the counter.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::config::EngineConfig;
use crate::downloader::Downloader;
use crate::dupefilter::DuplicateFilter;
use crate::error::CrawlError;
use crate::middleware::{MiddlewareAction, MiddlewareChain};
use crate::pipeline::Pipeline;
use crate::request::Request;
use crate::robots::RobotsChecker;
use crate::scheduler::Scheduler;
use crate::spider::{domain_allowed, Spider};
use crate::state::{EngineState, EngineStateHandle};
use crate::stats::{StatCollector, StatsSnapshot};

/// Guard interval for signal waits; bounds the cost of a lost wakeup.
const IDLE_WAIT: Duration = Duration::from_millis(50);
/// How long shutdown waits for in-flight workers before proceeding.
const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// The crawl engine. Construct through [`EngineBuilder`].
///
/// [`EngineBuilder`]: crate::builder::EngineBuilder
pub struct Engine<S: Spider> {
    core: Arc<EngineCore<S>>,
}

struct EngineCore<S: Spider> {
    spider: Arc<S>,
    config: EngineConfig,
    scheduler: parking_lot::RwLock<Arc<Scheduler>>,
    downloader: Arc<dyn Downloader>,
    middlewares: MiddlewareChain,
    pipelines: Vec<Arc<dyn Pipeline<S::Item>>>,
    dupefilter: Option<Arc<dyn DuplicateFilter>>,
    robots: Option<Arc<RobotsChecker>>,
    stats: Arc<StatCollector>,
    state: Arc<EngineStateHandle>,
    semaphore: Arc<Semaphore>,
    allowed_domains: Vec<String>,
    item_tx: parking_lot::Mutex<Option<kanal::AsyncSender<S::Item>>>,
    item_task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    dispatch_task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    cleanup_done: AtomicBool,
}

impl<S: Spider> Engine<S> {
    pub(crate) fn assemble(
        spider: S,
        config: EngineConfig,
        downloader: Arc<dyn Downloader>,
        middlewares: MiddlewareChain,
        pipelines: Vec<Arc<dyn Pipeline<S::Item>>>,
        dupefilter: Option<Arc<dyn DuplicateFilter>>,
        robots: Option<Arc<RobotsChecker>>,
    ) -> Self {
        let allowed_domains = spider.allowed_domains();
        let semaphore = Arc::new(Semaphore::new(config.concurrency));
        Engine {
            core: Arc::new(EngineCore {
                spider: Arc::new(spider),
                config,
                scheduler: parking_lot::RwLock::new(Arc::new(Scheduler::new())),
                downloader,
                middlewares,
                pipelines,
                dupefilter,
                robots,
                stats: Arc::new(StatCollector::new()),
                state: Arc::new(EngineStateHandle::new()),
                semaphore,
                allowed_domains,
                item_tx: parking_lot::Mutex::new(None),
                item_task: tokio::sync::Mutex::new(None),
                dispatch_task: tokio::sync::Mutex::new(None),
                cleanup_done: AtomicBool::new(false),
            }),
        }
    }

    /// Starts the crawl: opens pipelines, seeds the scheduler, and spawns
    /// the dispatch loop. Valid from `Idle` and `Stopped` only.
    pub async fn start(&self) -> Result<(), CrawlError> {
        self.core.state.transition_to(EngineState::Starting)?;
        match self.core.clone().startup().await {
            Ok(()) => Ok(()),
            Err(e) => {
                let _ = self.core.state.transition_to(EngineState::Error);
                Err(e)
            }
        }
    }

    /// Suspends dispatching. In-flight workers finish; queued work waits.
    pub fn pause(&self) -> Result<(), CrawlError> {
        self.core.state.transition_to(EngineState::Paused)
    }

    pub fn resume(&self) -> Result<(), CrawlError> {
        self.core.state.transition_to(EngineState::Running)
    }

    /// Stops the crawl and releases every collaborator. Idempotent; calling
    /// it on a finished engine is a no-op.
    pub async fn stop(&self) -> Result<(), CrawlError> {
        let current = self.core.state.current();
        if current.is_terminal() || current == EngineState::Idle {
            return Ok(());
        }
        if current != EngineState::Stopping {
            // The crawl may finish naturally between the state read above
            // and this transition; losing that race is not an error.
            let _ = self.core.state.transition_to(EngineState::Stopping);
        }
        self.core.scheduler().close();
        self.core.state.signal_work();

        let handle = self.core.dispatch_task.lock().await.take();
        match handle {
            Some(handle) => {
                if handle.await.is_err() {
                    warn!("dispatch task panicked during shutdown");
                    self.core.clone().finalize().await;
                }
            }
            None => self.core.clone().finalize().await,
        }
        Ok(())
    }

    /// Resolves when the crawl reaches `Stopped` or `Error`, whether by
    /// natural completion or an explicit `stop`.
    pub async fn wait_for_completion(&self) {
        let mut rx = self.core.state.subscribe();
        loop {
            if rx.borrow_and_update().is_terminal() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Runs the crawl to completion and returns the final statistics.
    pub async fn crawl(&self) -> Result<StatsSnapshot, CrawlError> {
        self.start().await?;
        self.wait_for_completion().await;
        Ok(self.stats())
    }

    pub fn state(&self) -> EngineState {
        self.core.state.current()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<EngineState> {
        self.core.state.subscribe()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.core.stats.snapshot()
    }

    pub fn subscribe_stats(&self) -> watch::Receiver<StatsSnapshot> {
        self.core.stats.subscribe()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.core.config
    }

    pub fn dupefilter_stats(&self) -> Option<crate::dupefilter::DupeFilterStats> {
        self.core.dupefilter.as_ref().map(|df| df.stats())
    }
}

impl<S: Spider> EngineCore<S> {
    fn scheduler(&self) -> Arc<Scheduler> {
        self.scheduler.read().clone()
    }

    async fn startup(self: Arc<Self>) -> Result<(), CrawlError> {
        // A restart after Stopped gets fresh counters and a fresh queue.
        if self.cleanup_done.swap(false, Ordering::SeqCst) {
            self.stats.reset();
            *self.scheduler.write() = Arc::new(Scheduler::new());
        }

        // Open pipelines in registration order; a failure closes whatever
        // already opened before the error propagates.
        let mut opened: Vec<&Arc<dyn Pipeline<S::Item>>> = Vec::new();
        for pipeline in &self.pipelines {
            if let Err(e) = pipeline.open().await {
                let err = CrawlError::Pipeline {
                    name: pipeline.name().to_string(),
                    message: format!("open failed: {}", e),
                };
                self.close_pipelines_after_failed_start(&opened).await;
                return Err(err);
            }
            opened.push(pipeline);
        }

        let seeds = match self.spider.start_requests() {
            Ok(seeds) => seeds,
            Err(e) => {
                self.close_pipelines_after_failed_start(&opened).await;
                return Err(e);
            }
        };
        info!(
            "starting crawl '{}' with {} seed request(s)",
            self.spider.name(),
            seeds.len()
        );

        let (tx, rx) = kanal::unbounded_async::<S::Item>();
        *self.item_tx.lock() = Some(tx);
        let core = self.clone();
        *self.item_task.lock().await = Some(tokio::spawn(core.consume_items(rx)));

        let scheduler = self.scheduler();
        for seed in seeds {
            if !seed.dont_filter {
                if let Some(df) = &self.dupefilter {
                    if !df.reserve(&seed).await {
                        trace!("seed already seen, skipping: {}", seed.url);
                        continue;
                    }
                }
            }
            scheduler.enqueue(seed);
        }

        self.stats.mark_started();
        if let Err(e) = self.state.transition_to(EngineState::Running) {
            // A concurrent stop won the state race; tear down what this
            // start brought up instead of leaving it running.
            drop(self.item_tx.lock().take());
            if let Some(handle) = self.item_task.lock().await.take() {
                let _ = handle.await;
            }
            self.clone().finalize().await;
            return Err(e);
        }

        let core = self.clone();
        *self.dispatch_task.lock().await = Some(tokio::spawn(core.dispatch_loop()));
        Ok(())
    }

    /// Best-effort close of pipelines opened by a start attempt that failed
    /// before the crawl began. Marks cleanup as done so a later restart
    /// resets cleanly.
    async fn close_pipelines_after_failed_start(&self, opened: &[&Arc<dyn Pipeline<S::Item>>]) {
        for pipeline in opened {
            if let Err(e) = pipeline.close().await {
                warn!(
                    "pipeline '{}' close failed during aborted start: {}",
                    pipeline.name(),
                    e
                );
            }
        }
        self.cleanup_done.store(true, Ordering::SeqCst);
    }

    async fn dispatch_loop(self: Arc<Self>) {
        loop {
            match self.state.current() {
                EngineState::Stopping | EngineState::Stopped | EngineState::Error => break,
                EngineState::Paused => {
                    let _ = tokio::time::timeout(IDLE_WAIT, self.state.wait_for_signal()).await;
                    continue;
                }
                _ => {}
            }

            if let Some(request) = self.scheduler().dequeue() {
                // Count the request as in flight before awaiting the permit,
                // so an empty queue never looks quiescent while work is held
                // here.
                self.state.worker_started();
                let permit = match self.semaphore.clone().acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        self.state.worker_finished();
                        break;
                    }
                };
                if self.state.current() == EngineState::Stopping {
                    self.state.worker_finished();
                    break;
                }
                let core = self.clone();
                tokio::spawn(async move {
                    core.process(request).await;
                    drop(permit);
                });
            } else if self.state.in_flight() == 0 {
                debug!("scheduler drained and no workers in flight");
                break;
            } else {
                let _ = tokio::time::timeout(IDLE_WAIT, self.state.wait_for_signal()).await;
            }
        }
        self.finalize().await;
    }

    /// One worker: middleware, download, middleware, parse, routing.
    /// Failures never escape; they feed the retry policy.
    async fn process(self: Arc<Self>, request: Request) {
        self.stats.record_request();
        if let Err(e) = self.handle(request.clone()).await {
            self.handle_failure(request, e);
        }
        self.state.worker_finished();
        self.stats.publish();
    }

    async fn handle(&self, request: Request) -> Result<(), CrawlError> {
        let request = match self.middlewares.process_request(request).await? {
            MiddlewareAction::Continue(r) => r,
            MiddlewareAction::Retry(r, delay) => {
                self.stats.record_retry();
                // The resubmitted request's key is already in the
                // scheduler's seen-set; bypass filtering the same way
                // failure retries do.
                self.schedule_delayed((*r).dont_filter(), delay);
                return Ok(());
            }
            MiddlewareAction::Drop => {
                self.stats.record_drop();
                return Ok(());
            }
        };

        let response = self.downloader.download(request).await?;
        self.stats.record_response(response.status, response.body.len());

        let response = match self.middlewares.process_response(response).await? {
            MiddlewareAction::Continue(r) => r,
            MiddlewareAction::Retry(r, delay) => {
                self.stats.record_retry();
                self.schedule_delayed((*r).dont_filter(), delay);
                return Ok(());
            }
            MiddlewareAction::Drop => {
                self.stats.record_drop();
                return Ok(());
            }
        };

        let output = self.spider.parse(response).await?;
        self.stats.record_success();

        let (items, children) = output.into_parts();
        if !items.is_empty() {
            let tx = self.item_tx.lock().clone();
            if let Some(tx) = tx {
                for item in items {
                    self.stats.record_item();
                    let _ = tx.send(item).await;
                }
            }
        }
        for child in children {
            self.admit_child(child).await;
        }
        Ok(())
    }

    /// Gates a discovered request through the domain filter, robots, and
    /// the duplicate filter before it reaches the scheduler.
    async fn admit_child(&self, child: Request) {
        if !domain_allowed(&child.url, &self.allowed_domains) {
            trace!("offsite request dropped: {}", child.url);
            self.stats.record_drop();
            return;
        }
        if let Some(robots) = &self.robots {
            if !robots.is_allowed(&child.url).await {
                self.stats.record_drop();
                return;
            }
        }
        if !child.dont_filter {
            if let Some(df) = &self.dupefilter {
                if !df.reserve(&child).await {
                    trace!("duplicate request dropped: {}", child.url);
                    return;
                }
            }
        }
        if self.scheduler().enqueue(child) {
            self.state.signal_work();
        }
    }

    fn handle_failure(&self, request: Request, error: CrawlError) {
        let attempt = request.attempt.attempt;
        let retryable = self.config.retry.enabled
            && !error.is_terminal()
            && attempt < self.config.retry.max_attempts;
        if retryable {
            let delay = self.config.retry.base_backoff * 2u32.saturating_pow(attempt);
            warn!(
                "request failed (attempt {}), retrying in {:?}: {} ({})",
                attempt + 1,
                delay,
                request.url,
                error
            );
            self.stats.record_retry();
            self.schedule_delayed(request.retried(error.to_string()), delay);
        } else {
            warn!("request failed permanently: {} ({})", request.url, error);
            self.stats.record_failure();
        }
    }

    /// Re-enqueues a request after a delay, holding an in-flight slot so
    /// the crawl cannot be declared complete while the request is parked.
    fn schedule_delayed(&self, request: Request, delay: Duration) {
        self.state.worker_started();
        let scheduler = self.scheduler();
        let state = self.state.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if scheduler.enqueue(request) {
                state.signal_work();
            }
            state.worker_finished();
        });
    }

    async fn consume_items(self: Arc<Self>, rx: kanal::AsyncReceiver<S::Item>) {
        while let Ok(item) = rx.recv().await {
            let mut current = Some(item);
            for pipeline in &self.pipelines {
                let Some(item) = current.take() else { break };
                match pipeline.process_item(item).await {
                    Ok(next) => current = next,
                    Err(e) => {
                        warn!("pipeline '{}' failed: {}", pipeline.name(), e);
                        self.stats.record_item_dropped();
                        break;
                    }
                }
            }
        }
    }

    /// Releases every collaborator exactly once, then moves to `Stopped`.
    async fn finalize(self: Arc<Self>) {
        if self.cleanup_done.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.state.transition_to(EngineState::Stopping);

        let drain = async {
            while self.state.in_flight() > 0 {
                let _ = tokio::time::timeout(IDLE_WAIT, self.state.wait_for_signal()).await;
            }
        };
        if tokio::time::timeout(SHUTDOWN_DRAIN_TIMEOUT, drain).await.is_err() {
            warn!(
                "{} worker(s) still in flight after {:?}, abandoning them",
                self.state.in_flight(),
                SHUTDOWN_DRAIN_TIMEOUT
            );
        }

        // Closing the sender lets the item task drain and exit.
        drop(self.item_tx.lock().take());
        if let Some(handle) = self.item_task.lock().await.take() {
            let _ = handle.await;
        }

        let closes = self.pipelines.iter().map(|p| p.close());
        for (pipeline, result) in self
            .pipelines
            .iter()
            .zip(futures::future::join_all(closes).await)
        {
            if let Err(e) = result {
                warn!("pipeline '{}' close failed: {}", pipeline.name(), e);
            }
        }
        self.downloader.close().await;
        if let Some(df) = &self.dupefilter {
            df.close().await;
        }
        self.scheduler().close();

        self.stats.mark_finished();
        info!("crawl '{}' finished: {}", self.spider.name(), self.stats.snapshot());
        let _ = self.state.transition_to(EngineState::Stopped);
    }
}
