//! # Duplicate Filter Module
//!
//! Crawl-wide URL deduplication, polymorphic over backing store.
//!
//! ## Overview
//!
//! The duplicate filter decides whether a request's semantic target has
//! already been processed this crawl. Three backends implement the same
//! capability set:
//!
//! - [`MemoryDupeFilter`]: an in-process set, O(1), no persistence
//! - [`RedisDupeFilter`]: a shared Redis set with TTL expiry, fail-open
//! - [`HybridDupeFilter`]: local tier in front of the remote tier
//!
//! Selection is by explicit configuration ([`DedupBackend`]), never runtime
//! type inspection.
//!
//! ## Reservation
//!
//! Checking and marking as two separate calls is racy under concurrent
//! workers: two discoveries of the same URL can both pass `is_duplicate`
//! before either marks. The engine therefore calls [`reserve`], which checks
//! and marks in one step (a set insert locally, a `SADD` remotely) and
//! reports whether the caller won the slot.
//!
//! [`reserve`]: DuplicateFilter::reserve

mod hybrid;
mod memory;
mod redis;

pub use hybrid::HybridDupeFilter;
pub use memory::MemoryDupeFilter;
pub use redis::RedisDupeFilter;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant, SystemTime};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::config::{DedupBackend, DedupConfig};
use crate::error::CrawlError;
use crate::request::Request;

/// Capability set shared by every duplicate-filter backend.
#[async_trait]
pub trait DuplicateFilter: Send + Sync {
    /// Whether this request's (method, canonical URL) has been processed.
    async fn is_duplicate(&self, request: &Request) -> bool;

    /// Records this request as processed.
    async fn mark_processed(&self, request: &Request);

    /// Atomic check-and-mark: marks the request processed and returns `true`
    /// if it was not a duplicate, `false` if it already was. Concurrent
    /// callers for the same URL see exactly one `true`.
    async fn reserve(&self, request: &Request) -> bool;

    /// Batch duplicate check, semantically equivalent to repeated single
    /// calls. Backends may coalesce network round trips.
    async fn are_duplicates(&self, requests: &[Request]) -> Vec<bool> {
        let mut results = Vec::with_capacity(requests.len());
        for request in requests {
            results.push(self.is_duplicate(request).await);
        }
        results
    }

    /// Batch mark, semantically equivalent to repeated single calls.
    async fn mark_all_processed(&self, requests: &[Request]) {
        for request in requests {
            self.mark_processed(request).await;
        }
    }

    /// Snapshot of the filter's counters.
    fn stats(&self) -> DupeFilterStats;

    /// Forgets everything and resets counters.
    async fn clear(&self);

    /// Releases backend resources. A closed filter stays usable: backends
    /// lazily re-acquire whatever they released if calls keep coming, so a
    /// restarted crawl gets a working filter again.
    async fn close(&self);
}

/// Counters exposed by every backend, plus backend-specific extras.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DupeFilterStats {
    pub checked: usize,
    pub duplicates: usize,
    pub marked: usize,
    /// duplicates / checked, 0.0 when nothing has been checked.
    pub duplicate_rate: f64,
    /// Running average latency of a membership check.
    pub avg_check_latency: Duration,
    #[serde(with = "epoch_secs")]
    pub last_reset: SystemTime,
    /// Backend-specific fields, e.g. memory footprint or remote reachability.
    pub extra: HashMap<String, serde_json::Value>,
}

// SystemTime serializes as seconds since the epoch; enough for stats export.
mod epoch_secs {
    use serde::Serializer;
    use std::time::{SystemTime, UNIX_EPOCH};

    pub fn serialize<S: Serializer>(t: &SystemTime, s: S) -> Result<S::Ok, S::Error> {
        let secs = t
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        s.serialize_u64(secs)
    }
}

/// Shared counter plumbing used by all backends.
pub(crate) struct FilterMetrics {
    checked: AtomicUsize,
    duplicates: AtomicUsize,
    marked: AtomicUsize,
    check_latency_nanos: AtomicU64,
    last_reset: Mutex<SystemTime>,
}

impl FilterMetrics {
    pub(crate) fn new() -> Self {
        FilterMetrics {
            checked: AtomicUsize::new(0),
            duplicates: AtomicUsize::new(0),
            marked: AtomicUsize::new(0),
            check_latency_nanos: AtomicU64::new(0),
            last_reset: Mutex::new(SystemTime::now()),
        }
    }

    pub(crate) fn record_check(&self, started: Instant, duplicate: bool) {
        self.checked.fetch_add(1, Ordering::Relaxed);
        if duplicate {
            self.duplicates.fetch_add(1, Ordering::Relaxed);
        }
        self.check_latency_nanos
            .fetch_add(started.elapsed().as_nanos() as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_mark(&self) {
        self.marked.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn reset(&self) {
        self.checked.store(0, Ordering::Relaxed);
        self.duplicates.store(0, Ordering::Relaxed);
        self.marked.store(0, Ordering::Relaxed);
        self.check_latency_nanos.store(0, Ordering::Relaxed);
        *self.last_reset.lock() = SystemTime::now();
    }

    pub(crate) fn snapshot(&self, extra: HashMap<String, serde_json::Value>) -> DupeFilterStats {
        let checked = self.checked.load(Ordering::Relaxed);
        let duplicates = self.duplicates.load(Ordering::Relaxed);
        let total_latency = self.check_latency_nanos.load(Ordering::Relaxed);
        DupeFilterStats {
            checked,
            duplicates,
            marked: self.marked.load(Ordering::Relaxed),
            duplicate_rate: if checked > 0 {
                duplicates as f64 / checked as f64
            } else {
                0.0
            },
            avg_check_latency: if checked > 0 {
                Duration::from_nanos(total_latency / checked as u64)
            } else {
                Duration::ZERO
            },
            last_reset: *self.last_reset.lock(),
            extra,
        }
    }
}

/// Builds the duplicate filter selected by configuration.
///
/// The spider name namespaces fingerprints so crawls sharing one backing
/// store cannot collide.
pub fn build_dupefilter(
    spider_name: &str,
    config: &DedupConfig,
) -> Result<Box<dyn DuplicateFilter>, CrawlError> {
    match config.backend {
        DedupBackend::Memory => Ok(Box::new(MemoryDupeFilter::new(spider_name))),
        DedupBackend::Redis => Ok(Box::new(RedisDupeFilter::new(spider_name, &config.redis)?)),
        DedupBackend::Hybrid => {
            let remote = RedisDupeFilter::new(spider_name, &config.redis)?;
            Ok(Box::new(HybridDupeFilter::new(
                spider_name,
                Some(Box::new(remote)),
            )))
        }
    }
}
