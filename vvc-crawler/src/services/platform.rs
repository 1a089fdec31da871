//! Platform search API client
//!
//! Cursor-paginated keyword and channel search with request-level rate
//! limiting and API-key rotation. Upstream failures are mapped to typed
//! error kinds at this boundary: 5xx and timeouts become `Transient`,
//! exhausted keys become `QuotaExhausted`, so callers pattern-match policy
//! instead of inspecting messages.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use vvc_common::{Error, Result};

const USER_AGENT: &str = "VVC/0.1.0 (https://github.com/vvc/vvc-crawler)";
const RATE_LIMIT_MS: u64 = 1000; // 1 request per second

/// Candidate video metadata as returned by the platform, before any
/// download is attempted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoMeta {
    pub video_id: String,
    pub url: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub channel: String,
    #[serde(default)]
    pub duration_seconds: Option<f64>,
    #[serde(default)]
    pub view_count: Option<u64>,
}

/// One page of search results plus the continuation cursor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchPage {
    pub items: Vec<VideoMeta>,
    pub cursor: Option<String>,
    pub has_more: bool,
}

/// Seam over the platform search/channel endpoints.
#[async_trait]
pub trait PlatformClient: Send + Sync {
    /// Fetch one page of keyword search results.
    async fn search_page(&self, query: &str, cursor: Option<&str>) -> Result<SearchPage>;

    /// Fetch one page of a channel's videos.
    async fn channel_page(&self, username: &str, cursor: Option<&str>) -> Result<SearchPage>;
}

/// Rate limiter enforcing a minimum interval between requests
struct RateLimiter {
    last_request: Mutex<Option<Instant>>,
    min_interval: Duration,
}

impl RateLimiter {
    fn new(min_interval_ms: u64) -> Self {
        Self {
            last_request: Mutex::new(None),
            min_interval: Duration::from_millis(min_interval_ms),
        }
    }

    /// Wait if necessary to comply with the rate limit
    async fn wait(&self) {
        let mut last = self.last_request.lock().await;

        if let Some(last_time) = *last {
            let elapsed = last_time.elapsed();
            if elapsed < self.min_interval {
                let wait_time = self.min_interval - elapsed;
                tracing::debug!("Rate limiting: waiting {:?}", wait_time);
                tokio::time::sleep(wait_time).await;
            }
        }

        *last = Some(Instant::now());
    }
}

/// Rotating API key pool. A key that reports quota exhaustion is retired
/// for the run; when the pool empties the caller gets `QuotaExhausted`.
struct KeyPool {
    keys: Mutex<Vec<String>>,
}

impl KeyPool {
    fn new(keys: Vec<String>) -> Self {
        Self {
            keys: Mutex::new(keys),
        }
    }

    async fn current(&self) -> Result<String> {
        let keys = self.keys.lock().await;
        keys.first()
            .cloned()
            .ok_or_else(|| Error::QuotaExhausted("all API keys exhausted".to_string()))
    }

    async fn retire(&self, key: &str) -> usize {
        let mut keys = self.keys.lock().await;
        keys.retain(|k| k != key);
        keys.len()
    }
}

/// HTTP implementation over the platform's JSON API.
pub struct HttpPlatformClient {
    http_client: reqwest::Client,
    base_url: String,
    keys: KeyPool,
    rate_limiter: Arc<RateLimiter>,
}

#[derive(Debug, Deserialize)]
struct PageResponse {
    #[serde(default)]
    items: Vec<VideoMeta>,
    #[serde(default)]
    cursor: Option<String>,
    #[serde(default)]
    has_more: bool,
}

impl HttpPlatformClient {
    pub fn new(base_url: String, api_keys: Vec<String>) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Internal(format!("HTTP client build failed: {}", e)))?;

        Ok(Self {
            http_client,
            base_url,
            keys: KeyPool::new(api_keys),
            rate_limiter: Arc::new(RateLimiter::new(RATE_LIMIT_MS)),
        })
    }

    async fn fetch_page(&self, path: &str, param: (&str, &str), cursor: Option<&str>) -> Result<SearchPage> {
        self.rate_limiter.wait().await;

        let key = self.keys.current().await?;
        let mut url = format!(
            "{}/{}?{}={}",
            self.base_url,
            path,
            param.0,
            urlencode(param.1)
        );
        if let Some(cursor) = cursor {
            url.push_str(&format!("&cursor={}", urlencode(cursor)));
        }

        tracing::debug!(url = %url, "Querying platform API");

        let response = self
            .http_client
            .get(&url)
            .header("X-API-KEY", &key)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() {
                    Error::Transient(format!("request failed: {}", e))
                } else {
                    Error::Internal(format!("request failed: {}", e))
                }
            })?;

        let status = response.status();

        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::NotFound(format!("{}: {}", path, param.1)));
        }

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS
            || status == reqwest::StatusCode::FORBIDDEN
            || status == reqwest::StatusCode::UNAUTHORIZED
        {
            let remaining = self.keys.retire(&key).await;
            tracing::warn!(status = %status, remaining_keys = remaining, "API key retired");
            if remaining == 0 {
                return Err(Error::QuotaExhausted("all API keys exhausted".to_string()));
            }
            // Another key is available; the caller's retry picks it up
            return Err(Error::Transient(format!("key rejected with {}", status)));
        }

        if status.is_server_error() {
            return Err(Error::Transient(format!("server error {}", status)));
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Internal(format!("API error {}: {}", status, body)));
        }

        let page: PageResponse = response
            .json()
            .await
            .map_err(|e| Error::Transient(format!("malformed API response: {}", e)))?;

        Ok(SearchPage {
            items: page.items,
            cursor: page.cursor,
            has_more: page.has_more,
        })
    }
}

#[async_trait]
impl PlatformClient for HttpPlatformClient {
    async fn search_page(&self, query: &str, cursor: Option<&str>) -> Result<SearchPage> {
        self.fetch_page("search/video", ("query", query), cursor).await
    }

    async fn channel_page(&self, username: &str, cursor: Option<&str>) -> Result<SearchPage> {
        self.fetch_page("user/videos", ("username", username), cursor)
            .await
    }
}

fn urlencode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rate_limiter_enforces_interval() {
        let limiter = RateLimiter::new(50);

        let start = Instant::now();
        limiter.wait().await;
        limiter.wait().await;
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn key_pool_exhaustion_is_quota_error() {
        let pool = KeyPool::new(vec!["k1".into()]);
        assert_eq!(pool.current().await.unwrap(), "k1");

        assert_eq!(pool.retire("k1").await, 0);
        assert!(pool.current().await.unwrap_err().is_quota());
    }

    #[test]
    fn urlencode_escapes_query() {
        assert_eq!(urlencode("trẻ em hát"), "tr%E1%BA%BB+em+h%C3%A1t");
    }
}
