//! # Middleware Module
//!
//! Download middleware sits between the scheduler and the downloader:
//! request hooks run before the download, response hooks after it. A hook
//! can rewrite its value, ask for the request to be retried later, or drop
//! the exchange entirely.
//!
//! Ordering is by declared priority, ascending, for both directions. The
//! chain short-circuits on the first non-`Continue` action.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, trace};

use crate::error::CrawlError;
use crate::request::Request;
use crate::response::Response;

/// What a middleware wants done with the value it was handed.
pub enum MiddlewareAction<T> {
    /// Pass the (possibly rewritten) value down the chain.
    Continue(T),
    /// Abandon this exchange and schedule the given request after a delay.
    Retry(Box<Request>, Duration),
    /// Silently discard the exchange.
    Drop,
}

/// A hook pair around the download. Both hooks default to pass-through, so
/// implementations override only the direction they care about.
#[async_trait]
pub trait DownloadMiddleware: Send + Sync {
    fn name(&self) -> &str;

    /// Chain position. Lower runs earlier. Defaults to 0.
    fn priority(&self) -> i32 {
        0
    }

    async fn process_request(
        &self,
        request: Request,
    ) -> Result<MiddlewareAction<Request>, CrawlError> {
        Ok(MiddlewareAction::Continue(request))
    }

    async fn process_response(
        &self,
        response: Response,
    ) -> Result<MiddlewareAction<Response>, CrawlError> {
        Ok(MiddlewareAction::Continue(response))
    }
}

/// An ordered set of middlewares applied around every download.
#[derive(Default)]
pub struct MiddlewareChain {
    middlewares: Vec<Arc<dyn DownloadMiddleware>>,
}

impl MiddlewareChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a middleware, keeping the chain sorted by ascending
    /// priority. Registration order breaks ties.
    pub fn add(&mut self, middleware: Arc<dyn DownloadMiddleware>) {
        debug!(
            "registering middleware '{}' (priority {})",
            middleware.name(),
            middleware.priority()
        );
        self.middlewares.push(middleware);
        self.middlewares.sort_by_key(|m| m.priority());
    }

    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    /// Runs every request hook in priority order. Short-circuits on the
    /// first `Retry` or `Drop`.
    pub async fn process_request(
        &self,
        mut request: Request,
    ) -> Result<MiddlewareAction<Request>, CrawlError> {
        for middleware in &self.middlewares {
            trace!("request hook '{}' on {}", middleware.name(), request.url);
            match middleware.process_request(request).await? {
                MiddlewareAction::Continue(r) => request = r,
                other => return Ok(other),
            }
        }
        Ok(MiddlewareAction::Continue(request))
    }

    /// Runs every response hook in priority order. Short-circuits on the
    /// first `Retry` or `Drop`.
    pub async fn process_response(
        &self,
        mut response: Response,
    ) -> Result<MiddlewareAction<Response>, CrawlError> {
        for middleware in &self.middlewares {
            trace!("response hook '{}' on {}", middleware.name(), response.url);
            match middleware.process_response(response).await? {
                MiddlewareAction::Continue(r) => response = r,
                other => return Ok(other),
            }
        }
        Ok(MiddlewareAction::Continue(response))
    }
}
