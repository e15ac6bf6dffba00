//! # Pipeline Module
//!
//! Item pipelines are the sinks of the crawl: every item a spider parses is
//! handed to each registered pipeline in registration order. A pipeline can
//! pass the item on (possibly transformed), swallow it by returning `None`,
//! or fail; pipeline failures drop the item and are counted, never fatal.

use std::marker::PhantomData;

use async_trait::async_trait;
use tracing::info;

use crate::error::CrawlError;
use crate::item::ScrapedItem;

/// A processing stage for scraped items.
///
/// `open` runs once before the crawl starts and may fail, aborting startup.
/// `close` runs once during shutdown.
#[async_trait]
pub trait Pipeline<I: ScrapedItem>: Send + Sync {
    fn name(&self) -> &str;

    async fn open(&self) -> Result<(), CrawlError> {
        Ok(())
    }

    /// Processes one item. `Ok(None)` swallows the item so later pipelines
    /// never see it.
    async fn process_item(&self, item: I) -> Result<Option<I>, CrawlError>;

    async fn close(&self) -> Result<(), CrawlError> {
        Ok(())
    }
}

/// Writes each item's field map to the log as one JSON line. Registered
/// automatically when no other pipeline is configured.
pub struct ConsoleWriterPipeline<I> {
    _marker: PhantomData<fn(I)>,
}

impl<I> ConsoleWriterPipeline<I> {
    pub fn new() -> Self {
        ConsoleWriterPipeline {
            _marker: PhantomData,
        }
    }
}

impl<I> Default for ConsoleWriterPipeline<I> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<I: ScrapedItem> Pipeline<I> for ConsoleWriterPipeline<I> {
    fn name(&self) -> &str {
        "console_writer"
    }

    async fn process_item(&self, item: I) -> Result<Option<I>, CrawlError> {
        let fields = item.to_field_map();
        info!("item: {}", serde_json::to_string(&fields)?);
        Ok(Some(item))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[tokio::test]
    async fn console_writer_passes_items_through() {
        let pipeline = ConsoleWriterPipeline::new();
        let mut item = HashMap::new();
        item.insert("title".to_string(), serde_json::json!("hello"));
        let out = pipeline.process_item(item.clone()).await.unwrap();
        assert_eq!(out, Some(item));
    }

    #[tokio::test]
    async fn default_open_and_close_succeed() {
        let pipeline = ConsoleWriterPipeline::<HashMap<String, serde_json::Value>>::new();
        assert!(pipeline.open().await.is_ok());
        assert!(pipeline.close().await.is_ok());
    }
}
