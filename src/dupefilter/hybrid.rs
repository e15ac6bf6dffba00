//! Layered duplicate filter: a local tier in front of the remote tier.
//!
//! Local hits answer without a network round trip; local misses fall through
//! to Redis. A positive at either layer counts as duplicate, and marking
//! writes both layers so subsequent local checks short-circuit. When no
//! remote filter is configured the layer silently degrades to local-only.

use std::collections::HashMap;
use std::time::Instant;

use async_trait::async_trait;

use super::{DupeFilterStats, DuplicateFilter, FilterMetrics, MemoryDupeFilter};
use crate::request::Request;

pub struct HybridDupeFilter {
    local: MemoryDupeFilter,
    remote: Option<Box<dyn DuplicateFilter>>,
    metrics: FilterMetrics,
}

impl HybridDupeFilter {
    pub fn new(spider_name: &str, remote: Option<Box<dyn DuplicateFilter>>) -> Self {
        HybridDupeFilter {
            local: MemoryDupeFilter::new(spider_name),
            remote,
            metrics: FilterMetrics::new(),
        }
    }

    /// Local-only construction, for callers that want the layered shape but
    /// have no remote store configured.
    pub fn local_only(spider_name: &str) -> Self {
        Self::new(spider_name, None)
    }
}

#[async_trait]
impl DuplicateFilter for HybridDupeFilter {
    async fn is_duplicate(&self, request: &Request) -> bool {
        let started = Instant::now();
        let duplicate = if self.local.is_duplicate(request).await {
            true
        } else {
            match &self.remote {
                Some(remote) => remote.is_duplicate(request).await,
                None => false,
            }
        };
        self.metrics.record_check(started, duplicate);
        duplicate
    }

    async fn mark_processed(&self, request: &Request) {
        self.local.mark_processed(request).await;
        if let Some(remote) = &self.remote {
            remote.mark_processed(request).await;
        }
        self.metrics.record_mark();
    }

    async fn reserve(&self, request: &Request) -> bool {
        let started = Instant::now();
        // The local tier arbitrates within this process; the remote tier
        // arbitrates across processes. Only a win at both layers counts.
        let local_won = self.local.reserve(request).await;
        let reserved = if !local_won {
            false
        } else {
            match &self.remote {
                Some(remote) => remote.reserve(request).await,
                None => true,
            }
        };
        self.metrics.record_check(started, !reserved);
        if reserved {
            self.metrics.record_mark();
        }
        reserved
    }

    fn stats(&self) -> DupeFilterStats {
        let mut extra = HashMap::new();
        extra.insert(
            "local".to_string(),
            serde_json::to_value(self.local.stats()).unwrap_or_default(),
        );
        if let Some(remote) = &self.remote {
            extra.insert(
                "remote".to_string(),
                serde_json::to_value(remote.stats()).unwrap_or_default(),
            );
        } else {
            extra.insert("remote".to_string(), serde_json::Value::Null);
        }
        self.metrics.snapshot(extra)
    }

    async fn clear(&self) {
        self.local.clear().await;
        if let Some(remote) = &self.remote {
            remote.clear().await;
        }
        self.metrics.reset();
    }

    async fn close(&self) {
        self.local.close().await;
        if let Some(remote) = &self.remote {
            remote.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, SystemTime};

    use parking_lot::RwLock;

    use super::*;

    fn req(url: &str) -> Request {
        Request::get(url).unwrap()
    }

    /// Remote tier whose state the test can observe from outside the box.
    #[derive(Clone, Default)]
    struct RecordingRemote {
        seen: Arc<RwLock<HashSet<String>>>,
        marks: Arc<AtomicUsize>,
    }

    impl RecordingRemote {
        fn key(request: &Request) -> String {
            request.url.to_string()
        }
    }

    #[async_trait]
    impl DuplicateFilter for RecordingRemote {
        async fn is_duplicate(&self, request: &Request) -> bool {
            self.seen.read().contains(&Self::key(request))
        }

        async fn mark_processed(&self, request: &Request) {
            self.seen.write().insert(Self::key(request));
            self.marks.fetch_add(1, Ordering::SeqCst);
        }

        async fn reserve(&self, request: &Request) -> bool {
            let inserted = self.seen.write().insert(Self::key(request));
            if inserted {
                self.marks.fetch_add(1, Ordering::SeqCst);
            }
            inserted
        }

        fn stats(&self) -> DupeFilterStats {
            DupeFilterStats {
                checked: 0,
                duplicates: 0,
                marked: self.marks.load(Ordering::SeqCst),
                duplicate_rate: 0.0,
                avg_check_latency: Duration::ZERO,
                last_reset: SystemTime::now(),
                extra: HashMap::new(),
            }
        }

        async fn clear(&self) {
            self.seen.write().clear();
        }

        async fn close(&self) {}
    }

    #[tokio::test]
    async fn degrades_to_local_without_remote() {
        let filter = HybridDupeFilter::local_only("test");
        let request = req("https://example.com/page");
        assert!(!filter.is_duplicate(&request).await);
        filter.mark_processed(&request).await;
        assert!(filter.is_duplicate(&request).await);
    }

    #[tokio::test]
    async fn reserve_is_single_winner_locally() {
        let filter = HybridDupeFilter::local_only("test");
        let request = req("https://example.com/page");
        assert!(filter.reserve(&request).await);
        assert!(!filter.reserve(&request).await);
    }

    #[tokio::test]
    async fn stats_nest_layer_snapshots() {
        let filter = HybridDupeFilter::local_only("test");
        filter.mark_processed(&req("https://example.com/a")).await;
        let stats = filter.stats();
        assert!(stats.extra.contains_key("local"));
        assert!(stats.extra.contains_key("remote"));
        assert_eq!(stats.marked, 1);
    }

    #[tokio::test]
    async fn remote_positive_is_duplicate_on_local_miss() {
        let remote = RecordingRemote::default();
        let request = req("https://example.com/elsewhere");
        remote.mark_processed(&request).await;

        let filter = HybridDupeFilter::new("test", Some(Box::new(remote)));
        // The local tier has never seen this request; the remote has.
        assert!(filter.is_duplicate(&request).await);
    }

    #[tokio::test]
    async fn mark_writes_both_layers() {
        let remote = RecordingRemote::default();
        let remote_seen = remote.seen.clone();
        let filter = HybridDupeFilter::new("test", Some(Box::new(remote)));

        let request = req("https://example.com/page");
        filter.mark_processed(&request).await;

        assert!(remote_seen.read().contains(request.url.as_str()));
        assert!(filter.local.is_duplicate(&request).await);
    }

    #[tokio::test]
    async fn reserve_honors_a_remote_claim() {
        let remote = RecordingRemote::default();
        let request = req("https://example.com/claimed");
        // Another process already claimed this URL remotely.
        remote.reserve(&request).await;

        let filter = HybridDupeFilter::new("test", Some(Box::new(remote)));
        assert!(!filter.reserve(&request).await);
    }

    #[tokio::test]
    async fn reserve_claims_both_layers_when_free() {
        let remote = RecordingRemote::default();
        let marks = remote.marks.clone();
        let filter = HybridDupeFilter::new("test", Some(Box::new(remote)));

        let request = req("https://example.com/fresh");
        assert!(filter.reserve(&request).await);
        assert_eq!(marks.load(Ordering::SeqCst), 1);
        assert!(!filter.reserve(&request).await);
    }
}
