//! # Robots Compliance Module
//!
//! Fetches, parses, and caches robots.txt, and answers "may I crawl this
//! URL" questions for the engine.
//!
//! ## Caching
//!
//! Rules are fetched lazily on the first check for a host and held in a
//! TTL cache keyed by the robots URL, so a crawl touching the same host
//! repeatedly pays one fetch per day. The cache is global across all hosts
//! the crawl visits, not partitioned per spider.
//!
//! ## Fail-open
//!
//! A missing, unreachable, or non-200 robots.txt imposes no restrictions.
//! Denying a crawl because a server is briefly unhealthy would be worse
//! than the occasional uninvited fetch.

use std::sync::Arc;
use std::time::Duration;

use moka::sync::Cache;
use regex::Regex;
use tracing::{debug, trace, warn};
use url::Url;

const CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);
const CACHE_CAPACITY: u64 = 10_000;
const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// One Allow/Disallow line. Patterns containing `*` compile to a regex;
/// plain patterns match by prefix.
#[derive(Debug)]
struct RulePattern {
    raw: String,
    regex: Option<Regex>,
}

impl RulePattern {
    fn new(raw: &str) -> Self {
        let regex = if raw.contains('*') {
            let mut pattern = String::from("^");
            for ch in raw.chars() {
                match ch {
                    '*' => pattern.push_str(".*"),
                    '$' => pattern.push('$'),
                    c => pattern.push_str(&regex::escape(&c.to_string())),
                }
            }
            match Regex::new(&pattern) {
                Ok(re) => Some(re),
                Err(e) => {
                    debug!("unparseable robots pattern {:?}: {}", raw, e);
                    None
                }
            }
        } else {
            None
        };
        RulePattern {
            raw: raw.to_string(),
            regex,
        }
    }

    fn matches(&self, path: &str) -> bool {
        match &self.regex {
            Some(re) => re.is_match(path),
            None => path.starts_with(&self.raw),
        }
    }
}

/// Parsed rules applicable to one user agent on one host.
#[derive(Debug, Default)]
pub struct RobotsRules {
    allow: Vec<RulePattern>,
    disallow: Vec<RulePattern>,
}

impl RobotsRules {
    /// Extracts the rules relevant to `user_agent` from a robots.txt body.
    ///
    /// Blocks are opened by `User-agent:` lines; a block applies when its
    /// agent is `*` or a case-insensitive prefix of ours. Rules from every
    /// applicable block accumulate.
    fn parse(body: &str, user_agent: &str) -> Self {
        let agent_lower = user_agent.to_lowercase();
        let mut rules = RobotsRules::default();
        let mut applies = false;
        // Consecutive User-agent lines share the rule group that follows.
        let mut in_agent_run = false;

        for line in body.lines() {
            let line = match line.find('#') {
                Some(idx) => &line[..idx],
                None => line,
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let (field, value) = match line.split_once(':') {
                Some((f, v)) => (f.trim().to_lowercase(), v.trim()),
                None => continue,
            };

            match field.as_str() {
                "user-agent" => {
                    if !in_agent_run {
                        applies = false;
                        in_agent_run = true;
                    }
                    let agent = value.to_lowercase();
                    if agent == "*" || agent_lower.starts_with(&agent) {
                        applies = true;
                    }
                }
                "allow" if applies => {
                    in_agent_run = false;
                    if !value.is_empty() {
                        rules.allow.push(RulePattern::new(value));
                    }
                }
                "disallow" if applies => {
                    in_agent_run = false;
                    if !value.is_empty() {
                        rules.disallow.push(RulePattern::new(value));
                    }
                }
                _ => {
                    in_agent_run = false;
                }
            }
        }
        rules
    }

    /// Allow rules are consulted first: any match permits. Then Disallow:
    /// any match denies. No match at all means allowed.
    fn is_allowed(&self, path: &str) -> bool {
        if self.allow.iter().any(|p| p.matches(path)) {
            return true;
        }
        !self.disallow.iter().any(|p| p.matches(path))
    }
}

/// Fetches and caches robots.txt, answering per-URL allow checks.
pub struct RobotsChecker {
    client: reqwest::Client,
    user_agent: String,
    cache: Cache<String, Arc<RobotsRules>>,
}

impl RobotsChecker {
    pub fn new(user_agent: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .unwrap_or_default();
        RobotsChecker {
            client,
            user_agent: user_agent.into(),
            cache: Cache::builder()
                .max_capacity(CACHE_CAPACITY)
                .time_to_live(CACHE_TTL)
                .build(),
        }
    }

    /// Whether `url` may be fetched under the host's robots.txt rules.
    ///
    /// The first check for a host fetches `{scheme}://{host}/robots.txt`;
    /// subsequent checks hit the cache until its daily TTL expires. URLs
    /// without a host (and hosts whose robots.txt cannot be fetched) are
    /// always allowed.
    pub async fn is_allowed(&self, url: &Url) -> bool {
        let robots_url = match Self::robots_url(url) {
            Some(u) => u,
            None => return true,
        };

        let rules = match self.cache.get(&robots_url) {
            Some(rules) => rules,
            None => {
                let rules = Arc::new(self.fetch_rules(&robots_url).await);
                self.cache.insert(robots_url.clone(), rules.clone());
                rules
            }
        };

        let mut path = url.path().to_string();
        if let Some(query) = url.query() {
            path.push('?');
            path.push_str(query);
        }
        let allowed = rules.is_allowed(&path);
        if !allowed {
            debug!("robots.txt disallows {}", url);
        }
        allowed
    }

    fn robots_url(url: &Url) -> Option<String> {
        let host = url.host_str()?;
        let mut robots = format!("{}://{}", url.scheme(), host);
        if let Some(port) = url.port() {
            robots.push_str(&format!(":{}", port));
        }
        robots.push_str("/robots.txt");
        Some(robots)
    }

    async fn fetch_rules(&self, robots_url: &str) -> RobotsRules {
        trace!("fetching {}", robots_url);
        let response = self
            .client
            .get(robots_url)
            .header("User-Agent", &self.user_agent)
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => match resp.text().await {
                Ok(body) => RobotsRules::parse(&body, &self.user_agent),
                Err(e) => {
                    warn!("failed to read {}: {}, allowing all", robots_url, e);
                    RobotsRules::default()
                }
            },
            Ok(resp) => {
                debug!(
                    "{} answered {}, allowing all",
                    robots_url,
                    resp.status()
                );
                RobotsRules::default()
            }
            Err(e) => {
                warn!("failed to fetch {}: {}, allowing all", robots_url, e);
                RobotsRules::default()
            }
        }
    }

    /// Drops all cached rule sets.
    pub fn invalidate(&self) {
        self.cache.invalidate_all();
    }
}
