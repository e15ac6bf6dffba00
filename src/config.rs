//! Engine configuration.
//!
//! [`EngineConfig`] gathers every tunable the engine consults: the
//! concurrency ceiling, politeness delay, retry policy, robots compliance,
//! and duplicate-filter backend selection. Validation happens once at build
//! time; invalid configurations surface as [`CrawlError::Configuration`].

use std::time::Duration;

use crate::error::CrawlError;

/// Which backing store the duplicate filter uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DedupBackend {
    /// In-process set. Fast, no persistence across restarts.
    #[default]
    Memory,
    /// Shared Redis set with TTL expiry. Survives restarts, shared across
    /// processes, fail-open when unreachable.
    Redis,
    /// Local set in front of Redis. Local hits short-circuit the round trip.
    Hybrid,
}

/// Connection parameters for the remote duplicate store.
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Connection URL, e.g. `redis://127.0.0.1/`.
    pub url: String,
    /// Prefix for the per-spider set key.
    pub key_prefix: String,
    /// Time-to-live applied to the set so stale entries expire.
    pub ttl: Duration,
}

impl Default for RedisConfig {
    fn default() -> Self {
        RedisConfig {
            url: "redis://127.0.0.1/".to_string(),
            key_prefix: "trawler:dupefilter".to_string(),
            ttl: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

/// Duplicate-filter settings.
#[derive(Debug, Clone)]
pub struct DedupConfig {
    pub enabled: bool,
    pub backend: DedupBackend,
    pub redis: RedisConfig,
}

impl Default for DedupConfig {
    fn default() -> Self {
        DedupConfig {
            enabled: true,
            backend: DedupBackend::Memory,
            redis: RedisConfig::default(),
        }
    }
}

/// Retry policy for failed requests.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub enabled: bool,
    /// Maximum number of retries per request, beyond the initial attempt.
    pub max_attempts: u32,
    /// Base backoff delay; the actual wait is `base_backoff * 2^attempt`.
    pub base_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            enabled: true,
            max_attempts: 3,
            base_backoff: Duration::from_millis(500),
        }
    }
}

/// Robots.txt compliance settings. The robots cache is global, keyed by
/// robots URL, and shared across all hosts the crawl touches.
#[derive(Debug, Clone)]
pub struct RobotsConfig {
    pub enabled: bool,
    /// Agent string matched against `User-agent:` blocks and sent when
    /// fetching robots.txt.
    pub user_agent: String,
}

impl Default for RobotsConfig {
    fn default() -> Self {
        RobotsConfig {
            enabled: false,
            user_agent: default_user_agent(),
        }
    }
}

/// Full engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Worker-pool size: the maximum number of requests in flight at once.
    pub concurrency: usize,
    /// Uniform delay enforced between downloads. Global, not per-host.
    pub download_delay: Option<Duration>,
    /// Per-download timeout.
    pub download_timeout: Duration,
    pub retry: RetryConfig,
    pub robots: RobotsConfig,
    pub dedup: DedupConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            concurrency: num_cpus::get().clamp(2, 16),
            download_delay: None,
            download_timeout: Duration::from_secs(30),
            retry: RetryConfig::default(),
            robots: RobotsConfig::default(),
            dedup: DedupConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Validates the configuration. Called by the builder before the engine
    /// is assembled.
    pub fn validate(&self) -> Result<(), CrawlError> {
        if self.concurrency == 0 {
            return Err(CrawlError::Configuration(
                "concurrency must be greater than 0".to_string(),
            ));
        }
        if self.download_timeout.is_zero() {
            return Err(CrawlError::Configuration(
                "download_timeout must be greater than 0".to_string(),
            ));
        }
        if self.retry.enabled && self.retry.base_backoff.is_zero() {
            return Err(CrawlError::Configuration(
                "retry base_backoff must be greater than 0".to_string(),
            ));
        }
        if self.robots.enabled && self.robots.user_agent.is_empty() {
            return Err(CrawlError::Configuration(
                "robots compliance requires a user_agent".to_string(),
            ));
        }
        match self.dedup.backend {
            DedupBackend::Redis | DedupBackend::Hybrid if self.dedup.enabled => {
                if self.dedup.redis.url.is_empty() {
                    return Err(CrawlError::Configuration(
                        "redis backend selected but no connection URL given".to_string(),
                    ));
                }
            }
            _ => {}
        }
        Ok(())
    }
}

pub(crate) fn default_user_agent() -> String {
    format!("trawler/{}", env!("CARGO_PKG_VERSION"))
}
