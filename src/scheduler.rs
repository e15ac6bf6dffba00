//! # Scheduler Module
//!
//! Implements the priority-ordered request queue that feeds the engine's
//! worker pool.
//!
//! ## Overview
//!
//! The `Scheduler` holds pending requests in per-priority FIFO queues and
//! tracks a local seen-set so filterable duplicates are dropped at the door.
//! The seen-set is keyed by `(method, URL)` without canonicalization; it is a
//! fast, best-effort filter, distinct from and in addition to the
//! [`DuplicateFilter`], which governs crawl-wide semantic dedup.
//!
//! ## Ordering
//!
//! `dequeue` always picks from the highest-priority non-empty queue, FIFO
//! within that priority. There is no starvation prevention: if high-priority
//! work never drains, lower priorities wait indefinitely. The crawl is
//! cooperative, not fair-queued.
//!
//! [`DuplicateFilter`]: crate::dupefilter::DuplicateFilter

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use moka::sync::Cache;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::request::Request;

const SEEN_SET_CAPACITY: u64 = 100_000;

/// Priority-ordered work queue with a local duplicate seen-set.
pub struct Scheduler {
    queues: Mutex<BTreeMap<i32, VecDeque<Request>>>,
    seen: Cache<String, ()>,
    pending: AtomicUsize,
    closed: AtomicBool,
}

impl Scheduler {
    pub fn new() -> Self {
        Scheduler {
            queues: Mutex::new(BTreeMap::new()),
            seen: Cache::builder().max_capacity(SEEN_SET_CAPACITY).build(),
            pending: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Accepts a request into the queue for its priority.
    ///
    /// Returns `false` when the request was silently dropped: either the
    /// scheduler is closed, or the request is a filterable duplicate of one
    /// already accepted. Requests with `dont_filter` set always pass the
    /// seen-set.
    pub fn enqueue(&self, request: Request) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            debug!("scheduler closed, dropping request: {}", request.url);
            return false;
        }

        if !request.dont_filter {
            let key = request.seen_key();
            if self.seen.contains_key(&key) {
                trace!("request already seen, dropping: {}", request.url);
                return false;
            }
            self.seen.insert(key, ());
        }

        trace!(
            "enqueuing request: {} (priority {})",
            request.url, request.priority
        );
        let mut queues = self.queues.lock();
        queues
            .entry(request.priority)
            .or_default()
            .push_back(request);
        self.pending.fetch_add(1, Ordering::SeqCst);
        true
    }

    /// Removes and returns the next request: highest priority first, FIFO
    /// within a priority.
    pub fn dequeue(&self) -> Option<Request> {
        let mut queues = self.queues.lock();
        // BTreeMap iterates ascending; take from the back for highest priority.
        let (&priority, _) = queues.iter().rev().find(|(_, q)| !q.is_empty())?;
        let queue = queues.get_mut(&priority)?;
        let request = queue.pop_front();
        if queue.is_empty() {
            queues.remove(&priority);
        }
        if request.is_some() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
        }
        request
    }

    /// Whether the given request would be rejected as already seen.
    pub fn has_seen(&self, request: &Request) -> bool {
        self.seen.contains_key(&request.seen_key())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops all pending requests. The seen-set is kept.
    pub fn clear(&self) {
        let mut queues = self.queues.lock();
        let dropped: usize = queues.values().map(VecDeque::len).sum();
        queues.clear();
        self.pending.store(0, Ordering::SeqCst);
        if dropped > 0 {
            debug!("scheduler cleared, dropped {} pending requests", dropped);
        }
    }

    /// Stops accepting new work and drops whatever is still queued.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(url: &str) -> Request {
        Request::get(url).unwrap()
    }

    #[test]
    fn fifo_within_priority() {
        let scheduler = Scheduler::new();
        assert!(scheduler.enqueue(req("https://example.com/1")));
        assert!(scheduler.enqueue(req("https://example.com/2")));
        assert_eq!(scheduler.dequeue().unwrap().url.path(), "/1");
        assert_eq!(scheduler.dequeue().unwrap().url.path(), "/2");
        assert!(scheduler.dequeue().is_none());
    }

    #[test]
    fn higher_priority_dequeues_first() {
        let scheduler = Scheduler::new();
        scheduler.enqueue(req("https://example.com/low").with_priority(-1));
        scheduler.enqueue(req("https://example.com/high").with_priority(10));
        scheduler.enqueue(req("https://example.com/mid"));
        assert_eq!(scheduler.dequeue().unwrap().url.path(), "/high");
        assert_eq!(scheduler.dequeue().unwrap().url.path(), "/mid");
        assert_eq!(scheduler.dequeue().unwrap().url.path(), "/low");
    }

    #[test]
    fn filterable_duplicates_are_dropped() {
        let scheduler = Scheduler::new();
        assert!(scheduler.enqueue(req("https://example.com/a")));
        assert!(!scheduler.enqueue(req("https://example.com/a")));
        assert_eq!(scheduler.len(), 1);
        assert!(scheduler.has_seen(&req("https://example.com/a")));
    }

    #[test]
    fn dont_filter_requests_always_accepted() {
        let scheduler = Scheduler::new();
        assert!(scheduler.enqueue(req("https://example.com/a")));
        for _ in 0..3 {
            assert!(scheduler.enqueue(req("https://example.com/a").dont_filter()));
        }
        assert_eq!(scheduler.len(), 4);
    }

    #[test]
    fn method_distinguishes_seen_entries() {
        use crate::request::Method;
        let scheduler = Scheduler::new();
        assert!(scheduler.enqueue(req("https://example.com/a")));
        assert!(scheduler.enqueue(req("https://example.com/a").with_method(Method::POST)));
        assert_eq!(scheduler.len(), 2);
    }

    #[test]
    fn close_rejects_and_clears() {
        let scheduler = Scheduler::new();
        scheduler.enqueue(req("https://example.com/a"));
        scheduler.close();
        assert!(scheduler.is_empty());
        assert!(!scheduler.enqueue(req("https://example.com/b")));
    }

    #[test]
    fn clear_keeps_seen_set() {
        let scheduler = Scheduler::new();
        scheduler.enqueue(req("https://example.com/a"));
        scheduler.clear();
        assert!(scheduler.is_empty());
        assert!(!scheduler.enqueue(req("https://example.com/a")));
    }
}
