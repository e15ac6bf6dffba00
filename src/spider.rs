//! # Spider Module
//!
//! Defines the `Spider` trait: the crawl-definition contract supplied by the
//! caller.
//!
//! ## Overview
//!
//! A spider names the crawl, provides the seed URLs, optionally restricts the
//! crawl to a set of domains, and turns each downloaded [`Response`] into a
//! [`ParseOutput`] of scraped items and follow-up requests. The engine calls
//! `parse` once per downloaded response.
//!
//! ## Example
//!
//! ```rust,ignore
//! use trawler::{CrawlError, ParseOutput, Response, Spider};
//! use async_trait::async_trait;
//!
//! struct QuoteSpider;
//!
//! #[async_trait]
//! impl Spider for QuoteSpider {
//!     type Item = std::collections::HashMap<String, serde_json::Value>;
//!
//!     fn name(&self) -> &str {
//!         "quotes"
//!     }
//!
//!     fn start_urls(&self) -> Vec<String> {
//!         vec!["https://quotes.example.com/".into()]
//!     }
//!
//!     async fn parse(&self, response: Response) -> Result<ParseOutput<Self::Item>, CrawlError> {
//!         let mut output = ParseOutput::new();
//!         // ... extract items, discover links ...
//!         Ok(output)
//!     }
//! }
//! ```

use async_trait::async_trait;
use url::Url;

use crate::error::CrawlError;
use crate::item::{ParseOutput, ScrapedItem};
use crate::request::Request;
use crate::response::Response;

/// Defines the contract for a crawl definition.
#[async_trait]
pub trait Spider: Send + Sync + 'static {
    /// The type of item this spider scrapes.
    type Item: ScrapedItem;

    /// A stable name for the crawl, used to namespace dedup fingerprints.
    fn name(&self) -> &str;

    /// The initial URLs to start crawling from.
    fn start_urls(&self) -> Vec<String> {
        Vec::new()
    }

    /// Domains the crawl is allowed to follow links into. Empty means no
    /// restriction. Subdomains of a listed domain are allowed.
    fn allowed_domains(&self) -> Vec<String> {
        Vec::new()
    }

    /// Generates the seed requests. The default implementation parses
    /// `start_urls`; override to seed with non-GET requests or custom
    /// priorities.
    fn start_requests(&self) -> Result<Vec<Request>, CrawlError> {
        let urls: Result<Vec<Url>, url::ParseError> =
            self.start_urls().iter().map(|u| Url::parse(u)).collect();
        Ok(urls?.into_iter().map(Request::new).collect())
    }

    /// Parses a response, extracting scraped items and new requests.
    async fn parse(&self, response: Response) -> Result<ParseOutput<Self::Item>, CrawlError>;
}

/// Returns true when the URL's host falls inside one of the allowed domains.
/// An empty domain list allows everything.
pub(crate) fn domain_allowed(url: &Url, allowed: &[String]) -> bool {
    if allowed.is_empty() {
        return true;
    }
    let host = match url.host_str() {
        Some(h) => h.to_ascii_lowercase(),
        None => return false,
    };
    allowed.iter().any(|d| {
        let d = d.to_ascii_lowercase();
        host == d || host.ends_with(&format!(".{}", d))
    })
}
