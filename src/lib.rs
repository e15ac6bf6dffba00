//! # trawler
//!
//! An async crawl-orchestration engine.
//!
//! Provides the main components: `Engine`, `Scheduler`, `Spider` trait,
//! pluggable downloaders, duplicate filters, and robots.txt compliance.
//!
//! ## Example
//!
//! ```rust,ignore
//! use trawler::{CrawlError, EngineBuilder, ParseOutput, Response, Spider};
//!
//! struct MySpider;
//!
//! #[trawler::async_trait]
//! impl Spider for MySpider {
//!     type Item = std::collections::HashMap<String, serde_json::Value>;
//!
//!     fn name(&self) -> &str { "my-spider" }
//!     fn start_urls(&self) -> Vec<String> { vec!["https://example.com".into()] }
//!
//!     async fn parse(&self, response: Response) -> Result<ParseOutput<Self::Item>, CrawlError> {
//!         todo!()
//!     }
//! }
//!
//! async fn run() -> Result<(), CrawlError> {
//!     let engine = EngineBuilder::new(MySpider).concurrency(8).build()?;
//!     let stats = engine.crawl().await?;
//!     println!("{}", stats);
//!     Ok(())
//! }
//! ```

pub mod builder;
pub mod config;
pub mod downloader;
pub mod dupefilter;
pub mod engine;
pub mod error;
pub mod fingerprint;
pub mod item;
pub mod middleware;
pub mod pipeline;
pub mod request;
pub mod response;
pub mod robots;
pub mod scheduler;
pub mod spider;
pub mod state;
pub mod stats;

pub use builder::EngineBuilder;
pub use config::{DedupBackend, DedupConfig, EngineConfig, RedisConfig, RetryConfig, RobotsConfig};
pub use downloader::{
    Downloader, FixedDelayDownloader, HttpDownloader, RandomDelayDownloader, RetryDownloader,
};
pub use dupefilter::{
    build_dupefilter, DupeFilterStats, DuplicateFilter, HybridDupeFilter, MemoryDupeFilter,
    RedisDupeFilter,
};
pub use engine::Engine;
pub use error::CrawlError;
pub use item::{ParseOutput, ScrapedItem};
pub use middleware::{DownloadMiddleware, MiddlewareAction, MiddlewareChain};
pub use pipeline::{ConsoleWriterPipeline, Pipeline};
pub use request::{Method, Request};
pub use response::Response;
pub use robots::RobotsChecker;
pub use scheduler::Scheduler;
pub use spider::Spider;
pub use state::EngineState;
pub use stats::{StatCollector, StatsSnapshot};

pub use async_trait::async_trait;
pub use tokio;
pub use url::Url;
