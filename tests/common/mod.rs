//! Shared fixtures for the warming pipeline tests

#![allow(dead_code)]

use async_trait::async_trait;
use book_search_warmer::cache_key::normalize_text;
use book_search_warmer::config::ConsumerConfig;
use book_search_warmer::consumer::{WarmingConsumer, WarmingPipeline};
use book_search_warmer::error::Result;
use book_search_warmer::fetcher::{ProviderResponse, ProviderTransport, RateLimitedFetcher, SearchClient};
use book_search_warmer::ledger::{DedupLedger, MemoryLedger};
use book_search_warmer::memory_tier::MemoryTier;
use book_search_warmer::metrics::WarmingMetrics;
use book_search_warmer::models::{SearchKind, SearchQuery, TierPolicy};
use book_search_warmer::queue::{MemoryDeadLetters, MemoryQueue};
use book_search_warmer::rate_limiter::RateGovernor;
use book_search_warmer::retry::RetryPolicy;
use book_search_warmer::tiered_cache::TieredCacheStore;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const AUTHOR_LIMIT: usize = 100;
pub const TITLE_MAX_RESULTS: usize = 20;

/// In-process stand-in for the book-search provider
#[derive(Default)]
pub struct FakeProvider {
    bibliographies: HashMap<String, Vec<String>>,
    author_status: HashMap<String, u16>,
    title_status: HashMap<String, u16>,
    author_calls: AtomicUsize,
    title_calls: AtomicUsize,
    seen: Mutex<Vec<SearchQuery>>,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_author<S: AsRef<str>>(mut self, name: &str, titles: &[S]) -> Self {
        self.bibliographies.insert(
            normalize_text(name),
            titles.iter().map(|t| t.as_ref().to_string()).collect(),
        );
        self
    }

    /// Every author search for `name` answers `status`
    pub fn failing_author(mut self, name: &str, status: u16) -> Self {
        self.author_status.insert(normalize_text(name), status);
        self
    }

    /// Every title search for `title` answers `status`
    pub fn failing_title(mut self, title: &str, status: u16) -> Self {
        self.title_status.insert(normalize_text(title), status);
        self
    }

    pub fn author_calls(&self) -> usize {
        self.author_calls.load(Ordering::SeqCst)
    }

    pub fn title_calls(&self) -> usize {
        self.title_calls.load(Ordering::SeqCst)
    }

    pub fn seen(&self) -> Vec<SearchQuery> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProviderTransport for FakeProvider {
    async fn send(&self, query: &SearchQuery) -> Result<ProviderResponse> {
        self.seen.lock().unwrap().push(query.clone());

        match query.kind() {
            SearchKind::Author => {
                self.author_calls.fetch_add(1, Ordering::SeqCst);
                let name = query.get("name").unwrap_or_default().to_string();
                if let Some(status) = self.author_status.get(&name) {
                    return Ok(ProviderResponse::status(*status));
                }
                let works: Vec<_> = self
                    .bibliographies
                    .get(&name)
                    .into_iter()
                    .flatten()
                    .map(|t| serde_json::json!({ "title": t }))
                    .collect();
                let body = serde_json::json!({ "works": works }).to_string();
                Ok(ProviderResponse::ok(body))
            }
            SearchKind::Title => {
                self.title_calls.fetch_add(1, Ordering::SeqCst);
                let title = query.get("title").unwrap_or_default().to_string();
                if let Some(status) = self.title_status.get(&title) {
                    return Ok(ProviderResponse::status(*status));
                }
                let body = serde_json::json!({ "title": title, "results": [] }).to_string();
                Ok(ProviderResponse::ok(body))
            }
        }
    }
}

pub fn titles(prefix: &str, n: usize) -> Vec<String> {
    (1..=n).map(|i| format!("{} {}", prefix, i)).collect()
}

/// Consumer settings with every delay removed
pub fn fast_settings() -> ConsumerConfig {
    ConsumerConfig {
        batch_size: 4,
        max_concurrent_batches: 2,
        intra_batch_concurrency: 2,
        inter_title_delay_ms: 0,
        redelivery_backoff_ms: 0,
        redelivery_backoff_max_ms: 0,
        poll_interval_ms: 5,
        stop_when_idle: true,
        ..ConsumerConfig::default()
    }
}

pub fn memory_store() -> Arc<TieredCacheStore> {
    Arc::new(TieredCacheStore::new(
        Arc::new(MemoryTier::edge(Duration::from_secs(3600), 16 * 1024 * 1024)),
        Arc::new(MemoryTier::key_value(Duration::from_secs(3600))),
        Arc::new(MemoryTier::new(
            book_search_warmer::models::CacheTier::ColdIndex,
            Duration::from_secs(90 * 24 * 3600),
            None,
        )),
    ))
}

pub fn search_client(provider: Arc<FakeProvider>, max_attempts: u32) -> Arc<SearchClient> {
    let fetcher = RateLimitedFetcher::new(
        provider,
        Arc::new(RateGovernor::unlimited()),
        RetryPolicy::new(max_attempts, Duration::from_millis(1), Duration::from_millis(2)),
    );
    Arc::new(SearchClient::new(fetcher, AUTHOR_LIMIT, TITLE_MAX_RESULTS))
}

/// Everything a test needs to drive and inspect one consumer
pub struct Harness {
    pub provider: Arc<FakeProvider>,
    pub store: Arc<TieredCacheStore>,
    pub ledger: Arc<MemoryLedger>,
    pub queue: Arc<MemoryQueue>,
    pub dead_letters: Arc<MemoryDeadLetters>,
    pub metrics: WarmingMetrics,
    pub consumer: Arc<WarmingConsumer>,
}

impl Harness {
    pub fn new(provider: FakeProvider, settings: ConsumerConfig) -> Self {
        Self::with_store(provider, settings, memory_store())
    }

    pub fn with_store(provider: FakeProvider, settings: ConsumerConfig, store: Arc<TieredCacheStore>) -> Self {
        let provider = Arc::new(provider);
        let ledger = Arc::new(MemoryLedger::new(Duration::from_secs(90 * 24 * 3600)));
        let queue = Arc::new(MemoryQueue::new());
        let dead_letters = Arc::new(MemoryDeadLetters::new());
        let metrics = WarmingMetrics::new().unwrap();

        let ledger_dyn: Arc<dyn DedupLedger> = ledger.clone();
        let consumer = Arc::new(WarmingConsumer::new(
            settings,
            TierPolicy::all(),
            WarmingPipeline {
                client: search_client(provider.clone(), 3),
                store: store.clone(),
                ledger: ledger_dyn,
                queue: queue.clone(),
                dead_letters: dead_letters.clone(),
                metrics: metrics.clone(),
            },
        ));

        Harness {
            provider,
            store,
            ledger,
            queue,
            dead_letters,
            metrics,
            consumer,
        }
    }
}
