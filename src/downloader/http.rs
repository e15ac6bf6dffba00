//! HTTP transport over a shared reqwest client.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::{debug, trace};

use super::Downloader;
use crate::config::default_user_agent;
use crate::error::CrawlError;
use crate::request::Request;
use crate::response::Response;

/// Downloader backed by a pooled [`reqwest::Client`].
///
/// Request headers are merged over the configured defaults, cookies are
/// serialized into a `Cookie` header, and a User-Agent is supplied when the
/// request carries none. Supports GET, POST, PUT, DELETE, and HEAD.
pub struct HttpDownloader {
    client: reqwest::Client,
    default_headers: HashMap<String, String>,
    timeout: Duration,
}

impl HttpDownloader {
    pub fn new(timeout: Duration) -> Result<Self, CrawlError> {
        Self::with_default_headers(timeout, HashMap::new())
    }

    pub fn with_default_headers(
        timeout: Duration,
        default_headers: HashMap<String, String>,
    ) -> Result<Self, CrawlError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .gzip(true)
            .cookie_store(true)
            .build()
            .map_err(|e| CrawlError::Configuration(format!("http client: {}", e)))?;
        Ok(HttpDownloader {
            client,
            default_headers,
            timeout,
        })
    }

    fn build_headers(&self, request: &Request) -> Result<HeaderMap, CrawlError> {
        let mut headers = HeaderMap::new();
        for (name, value) in self.default_headers.iter().chain(request.headers.iter()) {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| CrawlError::General(format!("invalid header name {:?}: {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| CrawlError::General(format!("invalid header value: {}", e)))?;
            headers.insert(name, value);
        }

        if let Some(cookies) = &request.cookies {
            let cookie_line = cookies
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join("; ");
            headers.insert(
                reqwest::header::COOKIE,
                HeaderValue::from_str(&cookie_line)
                    .map_err(|e| CrawlError::General(format!("invalid cookie value: {}", e)))?,
            );
        }

        if !headers.contains_key(reqwest::header::USER_AGENT) {
            headers.insert(
                reqwest::header::USER_AGENT,
                HeaderValue::from_str(&default_user_agent())
                    .map_err(|e| CrawlError::General(e.to_string()))?,
            );
        }
        Ok(headers)
    }

    fn classify_error(&self, url: &str, error: reqwest::Error) -> CrawlError {
        if error.is_timeout() {
            CrawlError::Timeout {
                url: url.to_string(),
                timeout: self.timeout,
            }
        } else {
            CrawlError::Download {
                url: url.to_string(),
                source: error,
            }
        }
    }
}

/// Pulls the `charset=` parameter out of a Content-Type header value.
fn declared_charset(content_type: &str) -> Option<String> {
    content_type
        .split(';')
        .map(str::trim)
        .find_map(|part| part.strip_prefix("charset="))
        .map(|cs| cs.trim_matches('"').to_lowercase())
}

#[async_trait]
impl Downloader for HttpDownloader {
    async fn download(&self, request: Request) -> Result<Response, CrawlError> {
        let url = request.url.clone();
        trace!("downloading {} {}", request.method, url);

        let builder = match request.method.as_str() {
            "GET" => self.client.get(url.clone()),
            "POST" => self.client.post(url.clone()),
            "PUT" => self.client.put(url.clone()),
            "DELETE" => self.client.delete(url.clone()),
            "HEAD" => self.client.head(url.clone()),
            other => return Err(CrawlError::UnsupportedMethod(other.to_string())),
        };

        let mut builder = builder.headers(self.build_headers(&request)?);
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let resp = builder
            .send()
            .await
            .map_err(|e| self.classify_error(url.as_str(), e))?;

        let status = resp.status();
        let final_url = resp.url().clone();
        let mut headers = HashMap::new();
        for (name, value) in resp.headers() {
            if let Ok(v) = value.to_str() {
                headers.insert(name.to_string(), v.to_string());
            }
        }
        let encoding = headers
            .get("content-type")
            .and_then(|ct| declared_charset(ct));

        let body = resp
            .bytes()
            .await
            .map_err(|e| self.classify_error(url.as_str(), e))?
            .to_vec();

        debug!(
            "downloaded {} -> {} ({} bytes)",
            url,
            status.as_u16(),
            body.len()
        );

        Ok(Response {
            request,
            status: status.as_u16(),
            reason: status.canonical_reason().map(String::from),
            headers,
            body,
            encoding,
            url: final_url,
        })
    }
}
