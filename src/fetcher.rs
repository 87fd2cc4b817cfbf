//! Rate-limited access to the external search providers
//!
//! - [`ProviderTransport`]: one raw call, any HTTP status returned as data
//! - [`HttpTransport`]: reqwest-backed transport
//! - [`RateLimitedFetcher`]: global pacing plus backoff on throttling
//! - [`SearchClient`]: author and title searches keyed by the shared codec

use crate::cache_key::{author_query, encode, title_query};
use crate::config::FetcherConfig;
use crate::error::{Result, WarmError};
use crate::models::{Bibliography, SearchKind, SearchQuery};
use crate::rate_limiter::RateGovernor;
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Raw provider response
#[derive(Debug, Clone)]
pub struct ProviderResponse {
    pub status: u16,
    pub body: Bytes,
    /// `Retry-After` in seconds, when the provider sent one
    pub retry_after: Option<Duration>,
}

impl ProviderResponse {
    pub fn ok(body: impl Into<Bytes>) -> Self {
        ProviderResponse {
            status: 200,
            body: body.into(),
            retry_after: None,
        }
    }

    pub fn status(status: u16) -> Self {
        ProviderResponse {
            status,
            body: Bytes::new(),
            retry_after: None,
        }
    }
}

/// One call to a search provider
///
/// Implementations return `Ok` for every HTTP response, whatever its
/// status, and `Err(TransientFetch)` only when no response arrived.
#[async_trait]
pub trait ProviderTransport: Send + Sync {
    async fn send(&self, query: &SearchQuery) -> Result<ProviderResponse>;
}

/// HTTP transport issuing `GET <endpoint>?<params>`
pub struct HttpTransport {
    client: Client,
    author_url: String,
    title_url: String,
}

impl HttpTransport {
    pub fn new(author_url: impl Into<String>, title_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| WarmError::ConfigError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(HttpTransport {
            client,
            author_url: author_url.into(),
            title_url: title_url.into(),
        })
    }

    pub fn from_config(config: &FetcherConfig) -> Result<Self> {
        Self::new(
            config.author_search_url.clone(),
            config.title_search_url.clone(),
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    fn endpoint(&self, kind: SearchKind) -> &str {
        match kind {
            SearchKind::Author => &self.author_url,
            SearchKind::Title => &self.title_url,
        }
    }
}

#[async_trait]
impl ProviderTransport for HttpTransport {
    async fn send(&self, query: &SearchQuery) -> Result<ProviderResponse> {
        let url = self.endpoint(query.kind());
        let params: Vec<(&str, &str)> = query.params().collect();

        let response = self
            .client
            .get(url)
            .query(&params)
            .send()
            .await
            .map_err(|e| {
                if e.is_builder() {
                    WarmError::PermanentFetch(format!("Invalid request to {}: {}", url, e))
                } else {
                    WarmError::TransientFetch(format!("Request to {} failed: {}", url, e))
                }
            })?;

        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);

        let body = response
            .bytes()
            .await
            .map_err(|e| WarmError::TransientFetch(format!("Failed to read response body: {}", e)))?;

        debug!("Provider {} responded {} ({} bytes)", url, status, body.len());
        Ok(ProviderResponse {
            status,
            body,
            retry_after,
        })
    }
}

/// Paces every call through the shared governor and backs off on 429
pub struct RateLimitedFetcher {
    transport: Arc<dyn ProviderTransport>,
    governor: Arc<RateGovernor>,
    policy: RetryPolicy,
}

impl RateLimitedFetcher {
    pub fn new(transport: Arc<dyn ProviderTransport>, governor: Arc<RateGovernor>, policy: RetryPolicy) -> Self {
        RateLimitedFetcher {
            transport,
            governor,
            policy,
        }
    }

    pub fn from_config(
        transport: Arc<dyn ProviderTransport>,
        governor: Arc<RateGovernor>,
        config: &FetcherConfig,
    ) -> Self {
        let policy = RetryPolicy::new(
            config.max_attempts,
            Duration::from_millis(config.backoff_base_ms),
            Duration::from_millis(config.backoff_max_ms),
        )
        .with_jitter(Duration::from_millis(config.jitter_ms));
        Self::new(transport, governor, policy)
    }

    pub fn governor(&self) -> &Arc<RateGovernor> {
        &self.governor
    }

    /// Fetch one search result
    ///
    /// # Returns
    /// * `Ok(Bytes)` for a 2xx response body
    /// * `Err(RateLimited)` once `max_attempts` throttled responses were seen
    /// * `Err(TransientFetch)` for network failures, 408 and 5xx
    /// * `Err(PermanentFetch)` for other statuses
    pub async fn fetch(&self, query: &SearchQuery) -> Result<Bytes> {
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            self.governor.acquire().await;
            let response = self.transport.send(query).await?;

            match response.status {
                200..=299 => return Ok(response.body),
                429 => {
                    if attempt >= self.policy.max_attempts {
                        warn!(
                            "{} search still throttled after {} attempts",
                            query.kind(),
                            attempt
                        );
                        return Err(WarmError::RateLimited { attempts: attempt });
                    }

                    let mut pause = self.policy.jittered_backoff(attempt - 1);
                    if let Some(retry_after) = response.retry_after {
                        pause = pause.max(retry_after);
                    }
                    warn!(
                        "{} search throttled (attempt {}), backing off {:?}",
                        query.kind(),
                        attempt,
                        pause
                    );
                    // Next acquire() waits out the pause, for this caller and everyone else
                    self.governor.throttle(pause);
                }
                status => {
                    let snippet = String::from_utf8_lossy(&response.body[..response.body.len().min(200)])
                        .into_owned();
                    return Err(WarmError::from_http_status(status, snippet));
                }
            }
        }
    }
}

/// Result of an author search, ready to cache
#[derive(Debug, Clone)]
pub struct AuthorSearch {
    pub key: String,
    pub payload: Bytes,
    pub bibliography: Bibliography,
}

/// Result of a title search, ready to cache
#[derive(Debug, Clone)]
pub struct TitleSearch {
    pub key: String,
    pub payload: Bytes,
}

/// Author and title searches issued with the same parameters the serving
/// path uses, so the keys line up
pub struct SearchClient {
    fetcher: RateLimitedFetcher,
    author_limit: usize,
    title_max_results: usize,
}

impl SearchClient {
    pub fn new(fetcher: RateLimitedFetcher, author_limit: usize, title_max_results: usize) -> Self {
        SearchClient {
            fetcher,
            author_limit,
            title_max_results,
        }
    }

    pub fn fetcher(&self) -> &RateLimitedFetcher {
        &self.fetcher
    }

    pub fn author_query(&self, name: &str) -> SearchQuery {
        author_query(name, self.author_limit)
    }

    pub fn title_query(&self, title: &str) -> SearchQuery {
        title_query(title, self.title_max_results)
    }

    /// Fetch an author's bibliography
    pub async fn search_author(&self, name: &str) -> Result<AuthorSearch> {
        let query = self.author_query(name);
        let payload = self.fetcher.fetch(&query).await?;
        let bibliography: Bibliography = serde_json::from_slice(&payload).map_err(|e| {
            WarmError::PermanentFetch(format!("Unreadable bibliography for {}: {}", name, e))
        })?;

        Ok(AuthorSearch {
            key: encode(&query),
            payload,
            bibliography,
        })
    }

    /// Fetch the search result for one title
    pub async fn search_title(&self, title: &str) -> Result<TitleSearch> {
        let query = self.title_query(title);
        let payload = self.fetcher.fetch(&query).await?;
        Ok(TitleSearch {
            key: encode(&query),
            payload,
        })
    }
}
