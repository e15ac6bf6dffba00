//! # Request Module
//!
//! Defines the [`Request`] value that flows through the scheduler, downloader,
//! and middleware chain.
//!
//! A `Request` is immutable once enqueued. Retry bookkeeping lives in a small
//! typed [`AttemptContext`] attached when a failed request is re-enqueued,
//! keeping the rest of the value untouched. Free-form routing hints travel in
//! the `meta` bag and are copied onto the resulting [`Response`].
//!
//! [`Response`]: crate::response::Response

use std::collections::HashMap;

use url::Url;

use crate::fingerprint;

pub use reqwest::Method;

/// Retry bookkeeping attached to a request when it is re-enqueued after a
/// processing failure.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttemptContext {
    /// How many times this request has been retried so far.
    pub attempt: u32,
    /// Human-readable description of the most recent failure.
    pub last_error: Option<String>,
}

/// A single unit of crawl work: one URL to fetch, plus everything the
/// downloader needs to fetch it.
#[derive(Debug, Clone)]
pub struct Request {
    /// Target URL.
    pub url: Url,
    /// HTTP method. The downloader supports GET/POST/PUT/DELETE/HEAD.
    pub method: Method,
    /// Request-specific headers, merged over the downloader defaults.
    /// Keys are case-sensitive.
    pub headers: HashMap<String, String>,
    /// Optional request body.
    pub body: Option<Vec<u8>>,
    /// Free-form metadata carried across requeues and copied to the response.
    pub meta: HashMap<String, serde_json::Value>,
    /// Dispatch priority. Higher values are dequeued first.
    pub priority: i32,
    /// When set, this request bypasses both the scheduler's seen-set and the
    /// duplicate filter.
    pub dont_filter: bool,
    /// Cookies serialized into a `Cookie` header by the downloader.
    pub cookies: Option<HashMap<String, String>>,
    /// Retry state, present only on re-enqueued copies.
    pub attempt: AttemptContext,
}

impl Request {
    /// Creates a GET request for the given URL with default settings.
    pub fn new(url: Url) -> Self {
        Request {
            url,
            method: Method::GET,
            headers: HashMap::new(),
            body: None,
            meta: HashMap::new(),
            priority: 0,
            dont_filter: false,
            cookies: None,
            attempt: AttemptContext::default(),
        }
    }

    /// Parses the URL and creates a GET request for it.
    pub fn get(url: &str) -> Result<Self, url::ParseError> {
        Ok(Self::new(Url::parse(url)?))
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.meta.insert(key.into(), value);
        self
    }

    pub fn with_cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies
            .get_or_insert_with(HashMap::new)
            .insert(name.into(), value.into());
        self
    }

    /// Marks this request as exempt from duplicate filtering.
    pub fn dont_filter(mut self) -> Self {
        self.dont_filter = true;
        self
    }

    /// The dedup identity of this request: a pure function of the spider
    /// namespace, the method, and the canonical URL. Headers, body, and meta
    /// never influence it.
    pub fn fingerprint(&self, spider_name: &str) -> String {
        fingerprint::generate_for_request(spider_name, self.method.as_str(), self.url.as_str())
    }

    /// Key used by the scheduler's fast local seen-set. Unlike the
    /// fingerprint this does not canonicalize; it is a best-effort filter.
    pub fn seen_key(&self) -> String {
        format!("{} {}", self.method, self.url)
    }

    /// Produces the copy of this request to re-enqueue after a failure, with
    /// the attempt counter incremented and filtering disabled so the
    /// scheduler and duplicate filter accept the resubmission.
    pub fn retried(&self, error: impl Into<String>) -> Request {
        let mut retry = self.clone();
        retry.attempt = AttemptContext {
            attempt: self.attempt.attempt + 1,
            last_error: Some(error.into()),
        };
        retry.dont_filter = true;
        retry
    }
}
