//! # Statistics Module
//!
//! Lock-free counters shared by every worker, with point-in-time snapshots
//! published on a watch channel so callers can observe a running crawl
//! without polling the engine.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::watch;

/// Point-in-time view of the crawl counters, cheap to clone and serialize.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct StatsSnapshot {
    pub requests_total: usize,
    pub requests_succeeded: usize,
    pub requests_failed: usize,
    pub requests_retried: usize,
    pub requests_dropped: usize,
    pub responses_received: usize,
    pub pages_crawled: usize,
    pub items_scraped: usize,
    /// Items lost to pipeline failures.
    pub items_dropped: usize,
    pub bytes_downloaded: u64,
    /// Response count per HTTP status code.
    pub status_codes: std::collections::BTreeMap<u16, usize>,
    pub elapsed: Duration,
    /// pages_crawled / elapsed seconds; 0.0 before the crawl starts.
    pub pages_per_second: f64,
    /// requests_succeeded / requests_total; 0.0 when nothing dispatched.
    pub success_rate: f64,
}

impl std::fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "requests: {} ({} ok, {} failed, {} retried, {} dropped), \
             pages: {}, items: {}, {:.1} KiB downloaded, \
             {:.2} pages/s, {:.1}% success, elapsed {:?}",
            self.requests_total,
            self.requests_succeeded,
            self.requests_failed,
            self.requests_retried,
            self.requests_dropped,
            self.pages_crawled,
            self.items_scraped,
            self.bytes_downloaded as f64 / 1024.0,
            self.pages_per_second,
            self.success_rate * 100.0,
            self.elapsed,
        )
    }
}

/// Shared crawl counters. All mutation is atomic; snapshotting never blocks
/// the workers.
pub struct StatCollector {
    requests_total: AtomicUsize,
    requests_succeeded: AtomicUsize,
    requests_failed: AtomicUsize,
    requests_retried: AtomicUsize,
    requests_dropped: AtomicUsize,
    responses_received: AtomicUsize,
    pages_crawled: AtomicUsize,
    items_scraped: AtomicUsize,
    items_dropped: AtomicUsize,
    bytes_downloaded: AtomicU64,
    status_codes: DashMap<u16, usize>,
    started_at: Mutex<Option<Instant>>,
    finished_at: Mutex<Option<Instant>>,
    publisher: watch::Sender<StatsSnapshot>,
}

impl StatCollector {
    pub fn new() -> Self {
        let (publisher, _) = watch::channel(StatsSnapshot::default());
        StatCollector {
            requests_total: AtomicUsize::new(0),
            requests_succeeded: AtomicUsize::new(0),
            requests_failed: AtomicUsize::new(0),
            requests_retried: AtomicUsize::new(0),
            requests_dropped: AtomicUsize::new(0),
            responses_received: AtomicUsize::new(0),
            pages_crawled: AtomicUsize::new(0),
            items_scraped: AtomicUsize::new(0),
            items_dropped: AtomicUsize::new(0),
            bytes_downloaded: AtomicU64::new(0),
            status_codes: DashMap::new(),
            started_at: Mutex::new(None),
            finished_at: Mutex::new(None),
            publisher,
        }
    }

    /// Marks the crawl as started. Idempotent; only the first call sets the
    /// clock.
    pub fn mark_started(&self) {
        let mut started = self.started_at.lock();
        if started.is_none() {
            *started = Some(Instant::now());
        }
    }

    pub fn mark_finished(&self) {
        *self.finished_at.lock() = Some(Instant::now());
        self.publish();
    }

    pub fn record_request(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_success(&self) {
        self.requests_succeeded.fetch_add(1, Ordering::Relaxed);
        self.pages_crawled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.requests_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.requests_retried.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_drop(&self) {
        self.requests_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_response(&self, status: u16, body_len: usize) {
        self.responses_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_downloaded
            .fetch_add(body_len as u64, Ordering::Relaxed);
        *self.status_codes.entry(status).or_insert(0) += 1;
    }

    pub fn record_item(&self) {
        self.items_scraped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_item_dropped(&self) {
        self.items_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn elapsed(&self) -> Duration {
        let started = self.started_at.lock();
        match *started {
            Some(start) => {
                let end = (*self.finished_at.lock()).unwrap_or_else(Instant::now);
                end.duration_since(start)
            }
            None => Duration::ZERO,
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let requests_total = self.requests_total.load(Ordering::Relaxed);
        let requests_succeeded = self.requests_succeeded.load(Ordering::Relaxed);
        let pages_crawled = self.pages_crawled.load(Ordering::Relaxed);
        let elapsed = self.elapsed();
        let secs = elapsed.as_secs_f64();

        StatsSnapshot {
            requests_total,
            requests_succeeded,
            requests_failed: self.requests_failed.load(Ordering::Relaxed),
            requests_retried: self.requests_retried.load(Ordering::Relaxed),
            requests_dropped: self.requests_dropped.load(Ordering::Relaxed),
            responses_received: self.responses_received.load(Ordering::Relaxed),
            pages_crawled,
            items_scraped: self.items_scraped.load(Ordering::Relaxed),
            items_dropped: self.items_dropped.load(Ordering::Relaxed),
            bytes_downloaded: self.bytes_downloaded.load(Ordering::Relaxed),
            status_codes: self
                .status_codes
                .iter()
                .map(|e| (*e.key(), *e.value()))
                .collect(),
            elapsed,
            pages_per_second: if secs > 0.0 {
                pages_crawled as f64 / secs
            } else {
                0.0
            },
            success_rate: if requests_total > 0 {
                requests_succeeded as f64 / requests_total as f64
            } else {
                0.0
            },
        }
    }

    /// Publishes the current snapshot to every subscriber.
    pub fn publish(&self) {
        // send_replace never fails, even with zero receivers.
        self.publisher.send_replace(self.snapshot());
    }

    /// A receiver that observes each published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<StatsSnapshot> {
        self.publisher.subscribe()
    }

    /// Zeroes every counter and clears the clocks.
    pub fn reset(&self) {
        self.requests_total.store(0, Ordering::Relaxed);
        self.requests_succeeded.store(0, Ordering::Relaxed);
        self.requests_failed.store(0, Ordering::Relaxed);
        self.requests_retried.store(0, Ordering::Relaxed);
        self.requests_dropped.store(0, Ordering::Relaxed);
        self.responses_received.store(0, Ordering::Relaxed);
        self.pages_crawled.store(0, Ordering::Relaxed);
        self.items_scraped.store(0, Ordering::Relaxed);
        self.items_dropped.store(0, Ordering::Relaxed);
        self.bytes_downloaded.store(0, Ordering::Relaxed);
        self.status_codes.clear();
        *self.started_at.lock() = None;
        *self.finished_at.lock() = None;
        self.publish();
    }
}

impl Default for StatCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let stats = StatCollector::new();
        stats.mark_started();
        stats.record_request();
        stats.record_request();
        stats.record_response(200, 1024);
        stats.record_success();
        stats.record_response(500, 64);
        stats.record_failure();
        stats.record_item();

        let snap = stats.snapshot();
        assert_eq!(snap.requests_total, 2);
        assert_eq!(snap.requests_succeeded, 1);
        assert_eq!(snap.requests_failed, 1);
        assert_eq!(snap.items_scraped, 1);
        assert_eq!(snap.bytes_downloaded, 1088);
        assert_eq!(snap.status_codes.get(&200), Some(&1));
        assert_eq!(snap.status_codes.get(&500), Some(&1));
        assert!((snap.success_rate - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn dropped_items_are_counted_separately() {
        let stats = StatCollector::new();
        stats.record_item();
        stats.record_item();
        stats.record_item_dropped();

        let snap = stats.snapshot();
        assert_eq!(snap.items_scraped, 2);
        assert_eq!(snap.items_dropped, 1);

        stats.reset();
        assert_eq!(stats.snapshot().items_dropped, 0);
    }

    #[test]
    fn reset_zeroes_everything() {
        let stats = StatCollector::new();
        stats.mark_started();
        stats.record_request();
        stats.record_response(200, 100);
        stats.reset();

        let snap = stats.snapshot();
        assert_eq!(snap.requests_total, 0);
        assert_eq!(snap.bytes_downloaded, 0);
        assert!(snap.status_codes.is_empty());
        assert_eq!(snap.elapsed, Duration::ZERO);
    }

    #[tokio::test]
    async fn subscribers_see_published_snapshots() {
        let stats = StatCollector::new();
        let mut rx = stats.subscribe();
        stats.record_request();
        stats.publish();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().requests_total, 1);
    }

    #[test]
    fn snapshot_serializes_to_json() {
        let stats = StatCollector::new();
        stats.record_request();
        let json = serde_json::to_string(&stats.snapshot()).unwrap();
        assert!(json.contains("\"requests_total\":1"));
    }

    #[test]
    fn display_is_single_line() {
        let stats = StatCollector::new();
        stats.record_request();
        stats.record_success();
        let line = stats.snapshot().to_string();
        assert!(line.contains("pages: 1"));
        assert!(!line.contains('\n'));
    }
}
