//! Remote duplicate filter backed by a shared Redis set.
//!
//! Every membership check and insert is a network round trip against a
//! per-spider set key. The set carries a TTL so stale entries expire between
//! crawls. When the store is unreachable the filter answers fail-open ("not
//! a duplicate") rather than blocking the crawl; reachability is surfaced
//! through stats.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{DupeFilterStats, DuplicateFilter, FilterMetrics};
use crate::config::RedisConfig;
use crate::error::CrawlError;
use crate::request::Request;

pub struct RedisDupeFilter {
    spider_name: String,
    key: String,
    ttl_secs: i64,
    client: redis::Client,
    connection: Mutex<Option<MultiplexedConnection>>,
    reachable: AtomicBool,
    metrics: FilterMetrics,
}

impl RedisDupeFilter {
    pub fn new(spider_name: &str, config: &RedisConfig) -> Result<Self, CrawlError> {
        let client = redis::Client::open(config.url.as_str())?;
        Ok(RedisDupeFilter {
            spider_name: spider_name.to_string(),
            key: format!("{}:{}", config.key_prefix, spider_name),
            ttl_secs: config.ttl.as_secs() as i64,
            client,
            connection: Mutex::new(None),
            reachable: AtomicBool::new(true),
            metrics: FilterMetrics::new(),
        })
    }

    fn fingerprint(&self, request: &Request) -> String {
        request.fingerprint(&self.spider_name)
    }

    /// Returns the cached connection, establishing it on first use. `None`
    /// means the store is currently unreachable.
    async fn connection(&self) -> Option<MultiplexedConnection> {
        let mut guard = self.connection.lock().await;
        if let Some(conn) = guard.as_ref() {
            return Some(conn.clone());
        }
        match self.client.get_multiplexed_async_connection().await {
            Ok(conn) => {
                self.reachable.store(true, Ordering::Relaxed);
                *guard = Some(conn.clone());
                Some(conn)
            }
            Err(e) => {
                self.reachable.store(false, Ordering::Relaxed);
                warn!("redis dupefilter unreachable, failing open: {}", e);
                None
            }
        }
    }

    /// Drops the cached connection so the next call reconnects.
    async fn invalidate_connection(&self) {
        *self.connection.lock().await = None;
        self.reachable.store(false, Ordering::Relaxed);
    }

    async fn sadd(&self, fingerprint: &str) -> Option<bool> {
        let mut conn = self.connection().await?;
        let added: Result<i64, _> = conn.sadd(&self.key, fingerprint).await;
        match added {
            Ok(n) => {
                // Refresh the TTL on every insert so an active crawl never
                // watches its own set expire.
                let _: Result<(), _> = conn.expire(&self.key, self.ttl_secs).await;
                Some(n > 0)
            }
            Err(e) => {
                warn!("redis SADD failed, failing open: {}", e);
                self.invalidate_connection().await;
                None
            }
        }
    }
}

#[async_trait]
impl DuplicateFilter for RedisDupeFilter {
    async fn is_duplicate(&self, request: &Request) -> bool {
        let started = Instant::now();
        let fingerprint = self.fingerprint(request);
        let duplicate = match self.connection().await {
            Some(mut conn) => match conn.sismember(&self.key, &fingerprint).await {
                Ok(member) => member,
                Err(e) => {
                    warn!("redis SISMEMBER failed, failing open: {}", e);
                    self.invalidate_connection().await;
                    false
                }
            },
            None => false,
        };
        self.metrics.record_check(started, duplicate);
        duplicate
    }

    async fn mark_processed(&self, request: &Request) {
        let fingerprint = self.fingerprint(request);
        if self.sadd(&fingerprint).await.is_some() {
            self.metrics.record_mark();
        }
    }

    async fn reserve(&self, request: &Request) -> bool {
        let started = Instant::now();
        let fingerprint = self.fingerprint(request);
        // SADD's return value is the atomic check-and-mark: 1 means this
        // caller inserted the fingerprint, 0 means it was already present.
        let result = match self.sadd(&fingerprint).await {
            Some(inserted) => {
                if inserted {
                    self.metrics.record_mark();
                }
                inserted
            }
            // Store unavailable: fail open, treat as newly reserved.
            None => true,
        };
        self.metrics.record_check(started, !result);
        result
    }

    async fn are_duplicates(&self, requests: &[Request]) -> Vec<bool> {
        if requests.is_empty() {
            return Vec::new();
        }
        let started = Instant::now();
        let fingerprints: Vec<String> =
            requests.iter().map(|r| self.fingerprint(r)).collect();

        // One SMISMEMBER round trip instead of N SISMEMBERs.
        let results = match self.connection().await {
            Some(mut conn) => {
                let res: Result<Vec<bool>, _> =
                    conn.smismember(&self.key, &fingerprints).await;
                match res {
                    Ok(flags) if flags.len() == requests.len() => flags,
                    Ok(_) | Err(_) => {
                        warn!("redis SMISMEMBER failed, failing open");
                        self.invalidate_connection().await;
                        vec![false; requests.len()]
                    }
                }
            }
            None => vec![false; requests.len()],
        };

        for duplicate in &results {
            self.metrics.record_check(started, *duplicate);
        }
        results
    }

    async fn mark_all_processed(&self, requests: &[Request]) {
        if requests.is_empty() {
            return;
        }
        let fingerprints: Vec<String> =
            requests.iter().map(|r| self.fingerprint(r)).collect();
        if let Some(mut conn) = self.connection().await {
            let res: Result<i64, _> = conn.sadd(&self.key, &fingerprints).await;
            match res {
                Ok(_) => {
                    let _: Result<(), _> = conn.expire(&self.key, self.ttl_secs).await;
                    for _ in requests {
                        self.metrics.record_mark();
                    }
                }
                Err(e) => {
                    warn!("redis batch SADD failed: {}", e);
                    self.invalidate_connection().await;
                }
            }
        }
    }

    fn stats(&self) -> DupeFilterStats {
        let mut extra = HashMap::new();
        extra.insert(
            "remote_reachable".to_string(),
            serde_json::json!(self.reachable.load(Ordering::Relaxed)),
        );
        extra.insert("redis_key".to_string(), serde_json::json!(self.key));
        self.metrics.snapshot(extra)
    }

    async fn clear(&self) {
        if let Some(mut conn) = self.connection().await {
            let res: Result<i64, _> = conn.del(&self.key).await;
            if let Err(e) = res {
                warn!("redis DEL failed during clear: {}", e);
                self.invalidate_connection().await;
            }
        }
        self.metrics.reset();
        debug!("redis dupefilter cleared for key {}", self.key);
    }

    async fn close(&self) {
        // Only the cached connection is released; the next call after a
        // restart reconnects through the client.
        *self.connection.lock().await = None;
    }
}

impl RedisDupeFilter {
    /// Number of fingerprints currently held remotely. Used by callers that
    /// want the set cardinality in monitoring output; `None` when the store
    /// is unreachable.
    pub async fn remote_cardinality(&self) -> Option<u64> {
        let mut conn = self.connection().await?;
        match conn.scard::<_, u64>(&self.key).await {
            Ok(n) => Some(n),
            Err(e) => {
                warn!("redis SCARD failed: {}", e);
                self.invalidate_connection().await;
                None
            }
        }
    }
}
