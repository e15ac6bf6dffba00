//! In-process duplicate filter backed by a plain string set.

use std::collections::HashMap;
use std::collections::HashSet;
use std::time::Instant;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

use super::{DupeFilterStats, DuplicateFilter, FilterMetrics};
use crate::request::Request;

/// Local-memory duplicate filter. `is_duplicate` is O(1) average; nothing
/// survives a process restart.
pub struct MemoryDupeFilter {
    spider_name: String,
    seen: RwLock<HashSet<String>>,
    metrics: FilterMetrics,
}

impl MemoryDupeFilter {
    pub fn new(spider_name: &str) -> Self {
        MemoryDupeFilter {
            spider_name: spider_name.to_string(),
            seen: RwLock::new(HashSet::new()),
            metrics: FilterMetrics::new(),
        }
    }

    fn fingerprint(&self, request: &Request) -> String {
        request.fingerprint(&self.spider_name)
    }

    /// Rough estimate of the set's heap footprint, exposed through stats.
    fn memory_estimate(&self) -> usize {
        let seen = self.seen.read();
        seen.iter().map(|fp| fp.len()).sum::<usize>()
            + seen.capacity() * std::mem::size_of::<String>()
    }
}

#[async_trait]
impl DuplicateFilter for MemoryDupeFilter {
    async fn is_duplicate(&self, request: &Request) -> bool {
        let started = Instant::now();
        let duplicate = self.seen.read().contains(&self.fingerprint(request));
        self.metrics.record_check(started, duplicate);
        duplicate
    }

    async fn mark_processed(&self, request: &Request) {
        self.seen.write().insert(self.fingerprint(request));
        self.metrics.record_mark();
    }

    async fn reserve(&self, request: &Request) -> bool {
        let started = Instant::now();
        // A single insert under the write lock is the atomic check-and-mark.
        let inserted = self.seen.write().insert(self.fingerprint(request));
        self.metrics.record_check(started, !inserted);
        if inserted {
            self.metrics.record_mark();
        }
        inserted
    }

    fn stats(&self) -> DupeFilterStats {
        let mut extra = HashMap::new();
        extra.insert(
            "entries".to_string(),
            serde_json::json!(self.seen.read().len()),
        );
        extra.insert(
            "memory_bytes_estimate".to_string(),
            serde_json::json!(self.memory_estimate()),
        );
        self.metrics.snapshot(extra)
    }

    async fn clear(&self) {
        let removed = {
            let mut seen = self.seen.write();
            let n = seen.len();
            seen.clear();
            n
        };
        self.metrics.reset();
        debug!("memory dupefilter cleared, removed {} fingerprints", removed);
    }

    async fn close(&self) {
        self.clear().await;
    }
}
