//! # Builder Module
//!
//! Fluent construction of an [`Engine`], with validation at `build` time.
//!
//! Every collaborator has a default: a pooled HTTP downloader, an empty
//! middleware chain, a console-writer pipeline, an in-memory duplicate
//! filter. Tests substitute their own downloader or pipelines through the
//! same setters callers use.

use std::sync::Arc;
use std::time::Duration;

use crate::config::{DedupBackend, DedupConfig, EngineConfig, RetryConfig};
use crate::downloader::{Downloader, FixedDelayDownloader, HttpDownloader};
use crate::dupefilter::{build_dupefilter, DuplicateFilter};
use crate::engine::Engine;
use crate::error::CrawlError;
use crate::middleware::{DownloadMiddleware, MiddlewareChain};
use crate::pipeline::{ConsoleWriterPipeline, Pipeline};
use crate::robots::RobotsChecker;
use crate::spider::Spider;

/// Assembles an [`Engine`] from a spider and configuration.
pub struct EngineBuilder<S: Spider> {
    spider: S,
    config: EngineConfig,
    downloader: Option<Arc<dyn Downloader>>,
    middlewares: MiddlewareChain,
    pipelines: Vec<Arc<dyn Pipeline<S::Item>>>,
}

impl<S: Spider> EngineBuilder<S> {
    pub fn new(spider: S) -> Self {
        EngineBuilder {
            spider,
            config: EngineConfig::default(),
            downloader: None,
            middlewares: MiddlewareChain::new(),
            pipelines: Vec::new(),
        }
    }

    /// Replaces the entire configuration.
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Maximum number of requests in flight at once.
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.config.concurrency = concurrency;
        self
    }

    /// Uniform politeness delay between downloads.
    pub fn download_delay(mut self, delay: Duration) -> Self {
        self.config.download_delay = Some(delay);
        self
    }

    pub fn download_timeout(mut self, timeout: Duration) -> Self {
        self.config.download_timeout = timeout;
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.config.retry = retry;
        self
    }

    /// Enables robots.txt compliance with the configured user agent.
    pub fn respect_robots_txt(mut self) -> Self {
        self.config.robots.enabled = true;
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.robots.user_agent = user_agent.into();
        self
    }

    pub fn dedup(mut self, dedup: DedupConfig) -> Self {
        self.config.dedup = dedup;
        self
    }

    pub fn dedup_backend(mut self, backend: DedupBackend) -> Self {
        self.config.dedup.backend = backend;
        self
    }

    /// Disables duplicate filtering entirely. The scheduler's local seen-set
    /// still applies.
    pub fn without_dedup(mut self) -> Self {
        self.config.dedup.enabled = false;
        self
    }

    /// Substitutes the transport. The politeness delay, if configured, still
    /// wraps the substitute.
    pub fn downloader(mut self, downloader: Arc<dyn Downloader>) -> Self {
        self.downloader = Some(downloader);
        self
    }

    pub fn middleware(mut self, middleware: Arc<dyn DownloadMiddleware>) -> Self {
        self.middlewares.add(middleware);
        self
    }

    pub fn pipeline(mut self, pipeline: Arc<dyn Pipeline<S::Item>>) -> Self {
        self.pipelines.push(pipeline);
        self
    }

    /// Validates the configuration and assembles the engine.
    pub fn build(self) -> Result<Engine<S>, CrawlError> {
        self.config.validate()?;

        let base: Arc<dyn Downloader> = match self.downloader {
            Some(custom) => custom,
            None => Arc::new(HttpDownloader::new(self.config.download_timeout)?),
        };
        let downloader: Arc<dyn Downloader> = match self.config.download_delay {
            Some(delay) => Arc::new(FixedDelayDownloader::new(base, delay)),
            None => base,
        };

        let mut pipelines = self.pipelines;
        if pipelines.is_empty() {
            pipelines.push(Arc::new(ConsoleWriterPipeline::new()));
        }

        let dupefilter: Option<Arc<dyn DuplicateFilter>> = if self.config.dedup.enabled {
            Some(Arc::from(build_dupefilter(
                self.spider.name(),
                &self.config.dedup,
            )?))
        } else {
            None
        };

        let robots = if self.config.robots.enabled {
            Some(Arc::new(RobotsChecker::new(
                self.config.robots.user_agent.clone(),
            )))
        } else {
            None
        };

        Ok(Engine::assemble(
            self.spider,
            self.config,
            downloader,
            self.middlewares,
            pipelines,
            dupefilter,
            robots,
        ))
    }
}
