//! Configuration management for the cache warmer

use crate::error::{Result, WarmError};
use crate::models::TierPolicy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Top-level configuration for the warmer
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WarmerConfig {
    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub fetcher: FetcherConfig,

    #[serde(default)]
    pub consumer: ConsumerConfig,

    #[serde(default)]
    pub ledger: LedgerConfig,

    /// JSON-lines file receiving dead-letter records
    #[serde(default = "default_dead_letter_path")]
    pub dead_letter_path: String,
}

/// Tier TTLs and storage locations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Edge tier TTL in seconds (default: 6 hours)
    #[serde(default = "default_fast_ttl")]
    pub edge_ttl_secs: u64,

    /// Key-value tier TTL in seconds (default: 6 hours)
    #[serde(default = "default_fast_ttl")]
    pub kv_ttl_secs: u64,

    /// Cold index TTL in seconds (default: 90 days)
    #[serde(default = "default_cold_ttl")]
    pub cold_ttl_secs: u64,

    /// Edge tier memory budget in bytes (default: 64MB)
    #[serde(default = "default_edge_max_bytes")]
    pub edge_max_bytes: usize,

    /// Root directory of the cold index tier
    #[serde(default = "default_cold_dir")]
    pub cold_dir: String,

    /// Tiers written by the warmer
    #[serde(default)]
    pub write_policy: TierPolicy,
}

/// Provider endpoints and throttling behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetcherConfig {
    #[serde(default = "default_author_url")]
    pub author_search_url: String,

    #[serde(default = "default_title_url")]
    pub title_search_url: String,

    /// Per-request timeout in seconds (default: 30)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Minimum gap between any two provider calls, process-wide (default: 50ms)
    #[serde(default = "default_min_interval")]
    pub min_interval_ms: u64,

    /// Attempts per call while the provider keeps throttling (default: 4)
    #[serde(default = "default_fetch_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_backoff_base")]
    pub backoff_base_ms: u64,

    #[serde(default = "default_backoff_max")]
    pub backoff_max_ms: u64,

    /// Upper bound of the random jitter added to each backoff
    #[serde(default = "default_jitter")]
    pub jitter_ms: u64,

    /// `limit` sent with author searches (default: 100)
    #[serde(default = "default_author_limit")]
    pub author_result_limit: usize,

    /// `maxresults` sent with title searches (default: 20)
    #[serde(default = "default_title_max_results")]
    pub title_max_results: usize,
}

/// Queue draining, batching and retry settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerConfig {
    /// Messages drawn per batch (default: 10)
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Batches processed concurrently (default: 2)
    #[serde(default = "default_concurrent_batches")]
    pub max_concurrent_batches: usize,

    /// Subjects processed concurrently within one batch (default: 1)
    #[serde(default = "default_intra_batch")]
    pub intra_batch_concurrency: usize,

    /// Titles enumerated per author (default: 100)
    #[serde(default = "default_max_titles")]
    pub max_titles_per_subject: usize,

    /// Pause between consecutive title fetches (default: 100ms)
    #[serde(default = "default_inter_title_delay")]
    pub inter_title_delay_ms: u64,

    /// Deliveries before a message is dead-lettered (default: 3)
    #[serde(default = "default_delivery_attempts")]
    pub max_delivery_attempts: u32,

    #[serde(default = "default_redelivery_backoff")]
    pub redelivery_backoff_ms: u64,

    #[serde(default = "default_redelivery_backoff_max")]
    pub redelivery_backoff_max_ms: u64,

    /// Sleep between empty polls (default: 500ms)
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Stop workers once the queue is fully drained (default: true)
    #[serde(default = "default_true")]
    pub stop_when_idle: bool,
}

/// Dedup ledger settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Retention window in days (default: 90)
    #[serde(default = "default_retention_days")]
    pub retention_days: u64,

    /// Directory of the on-disk ledger; in-memory when unset
    #[serde(default)]
    pub dir: Option<String>,
}

// Default value functions for serde
fn default_true() -> bool {
    true
}

fn default_fast_ttl() -> u64 {
    6 * 3600
}

fn default_cold_ttl() -> u64 {
    90 * 24 * 3600
}

fn default_edge_max_bytes() -> usize {
    64 * 1024 * 1024
}

fn default_cold_dir() -> String {
    "/var/cache/book-search-warmer/cold".to_string()
}

fn default_dead_letter_path() -> String {
    "/var/lib/book-search-warmer/dead-letter.jsonl".to_string()
}

fn default_author_url() -> String {
    "http://127.0.0.1:8080/search/author".to_string()
}

fn default_title_url() -> String {
    "http://127.0.0.1:8080/search/title".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_min_interval() -> u64 {
    50
}

fn default_fetch_attempts() -> u32 {
    4
}

fn default_backoff_base() -> u64 {
    500
}

fn default_backoff_max() -> u64 {
    30_000
}

fn default_jitter() -> u64 {
    250
}

fn default_author_limit() -> usize {
    100
}

fn default_title_max_results() -> usize {
    20
}

fn default_batch_size() -> usize {
    10
}

fn default_concurrent_batches() -> usize {
    2
}

fn default_intra_batch() -> usize {
    1
}

fn default_max_titles() -> usize {
    100
}

fn default_inter_title_delay() -> u64 {
    100
}

fn default_delivery_attempts() -> u32 {
    3
}

fn default_redelivery_backoff() -> u64 {
    1_000
}

fn default_redelivery_backoff_max() -> u64 {
    60_000
}

fn default_poll_interval() -> u64 {
    500
}

fn default_retention_days() -> u64 {
    90
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            edge_ttl_secs: default_fast_ttl(),
            kv_ttl_secs: default_fast_ttl(),
            cold_ttl_secs: default_cold_ttl(),
            edge_max_bytes: default_edge_max_bytes(),
            cold_dir: default_cold_dir(),
            write_policy: TierPolicy::default(),
        }
    }
}

impl Default for FetcherConfig {
    fn default() -> Self {
        FetcherConfig {
            author_search_url: default_author_url(),
            title_search_url: default_title_url(),
            request_timeout_secs: default_request_timeout(),
            min_interval_ms: default_min_interval(),
            max_attempts: default_fetch_attempts(),
            backoff_base_ms: default_backoff_base(),
            backoff_max_ms: default_backoff_max(),
            jitter_ms: default_jitter(),
            author_result_limit: default_author_limit(),
            title_max_results: default_title_max_results(),
        }
    }
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        ConsumerConfig {
            batch_size: default_batch_size(),
            max_concurrent_batches: default_concurrent_batches(),
            intra_batch_concurrency: default_intra_batch(),
            max_titles_per_subject: default_max_titles(),
            inter_title_delay_ms: default_inter_title_delay(),
            max_delivery_attempts: default_delivery_attempts(),
            redelivery_backoff_ms: default_redelivery_backoff(),
            redelivery_backoff_max_ms: default_redelivery_backoff_max(),
            poll_interval_ms: default_poll_interval(),
            stop_when_idle: default_true(),
        }
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        LedgerConfig {
            retention_days: default_retention_days(),
            dir: None,
        }
    }
}

impl CacheConfig {
    pub fn edge_ttl(&self) -> Duration {
        Duration::from_secs(self.edge_ttl_secs)
    }

    pub fn kv_ttl(&self) -> Duration {
        Duration::from_secs(self.kv_ttl_secs)
    }

    pub fn cold_ttl(&self) -> Duration {
        Duration::from_secs(self.cold_ttl_secs)
    }
}

impl ConsumerConfig {
    pub fn inter_title_delay(&self) -> Duration {
        Duration::from_millis(self.inter_title_delay_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl LedgerConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_days * 24 * 3600)
    }
}

impl WarmerConfig {
    /// Load configuration from a YAML file
    ///
    /// # Returns
    /// * `Ok(WarmerConfig)` if loading and validation succeed
    /// * `Err(WarmError)` if file cannot be read or config is invalid
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            WarmError::ConfigError(format!("Failed to read config file: {}", e))
        })?;

        Self::from_yaml(&content)
    }

    /// Parse and validate configuration from a YAML string
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: WarmerConfig = serde_yaml::from_str(content).map_err(|e| {
            WarmError::ConfigError(format!("Failed to parse config file: {}", e))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    ///
    /// # Validation Rules
    /// - every TTL must be > 0, fast tier TTLs must not outlive the cold TTL
    /// - the write policy must enable at least one tier
    /// - provider URLs must not be empty
    /// - batch size, worker counts and attempt ceilings must be > 0
    /// - ledger retention must be > 0
    pub fn validate(&self) -> Result<()> {
        let cache = &self.cache;
        if cache.edge_ttl_secs == 0 || cache.kv_ttl_secs == 0 || cache.cold_ttl_secs == 0 {
            return Err(WarmError::ConfigError(
                "cache TTLs must be greater than 0".to_string(),
            ));
        }

        if cache.edge_ttl_secs > cache.cold_ttl_secs || cache.kv_ttl_secs > cache.cold_ttl_secs {
            return Err(WarmError::ConfigError(format!(
                "edge ({}s) and kv ({}s) TTLs must not exceed cold TTL ({}s)",
                cache.edge_ttl_secs, cache.kv_ttl_secs, cache.cold_ttl_secs
            )));
        }

        if cache.write_policy.is_empty() {
            return Err(WarmError::ConfigError(
                "write_policy must enable at least one tier".to_string(),
            ));
        }

        if cache.write_policy.cold && cache.cold_dir.trim().is_empty() {
            return Err(WarmError::ConfigError(
                "cold_dir must not be empty when the cold tier is written".to_string(),
            ));
        }

        let fetcher = &self.fetcher;
        if fetcher.author_search_url.trim().is_empty() || fetcher.title_search_url.trim().is_empty()
        {
            return Err(WarmError::ConfigError(
                "provider search URLs must not be empty".to_string(),
            ));
        }

        if fetcher.max_attempts == 0 {
            return Err(WarmError::ConfigError(
                "fetcher.max_attempts must be greater than 0".to_string(),
            ));
        }

        if fetcher.backoff_base_ms > fetcher.backoff_max_ms {
            return Err(WarmError::ConfigError(format!(
                "fetcher.backoff_base_ms ({}) must not exceed backoff_max_ms ({})",
                fetcher.backoff_base_ms, fetcher.backoff_max_ms
            )));
        }

        let consumer = &self.consumer;
        if consumer.batch_size == 0
            || consumer.max_concurrent_batches == 0
            || consumer.intra_batch_concurrency == 0
        {
            return Err(WarmError::ConfigError(
                "batch_size, max_concurrent_batches and intra_batch_concurrency must be greater than 0"
                    .to_string(),
            ));
        }

        if consumer.max_delivery_attempts == 0 {
            return Err(WarmError::ConfigError(
                "consumer.max_delivery_attempts must be greater than 0".to_string(),
            ));
        }

        if self.ledger.retention_days == 0 {
            return Err(WarmError::ConfigError(
                "ledger.retention_days must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}
