//! Book Search Cache Warmer
//!
//! Pre-populates a tiered search-result cache for an author catalog so the
//! first user request for an author, or any of that author's titles, is a
//! cache hit instead of a rate-limited call to the upstream book-search
//! provider.
//!
//! # Overview
//!
//! A job submits author names. Each name becomes one queue message. The
//! consumer fetches the author's bibliography, caches it, then fetches and
//! caches a search result for every distinct title in it. Subjects already
//! warmed inside the retention window are skipped.
//!
//! Entries are written under the same canonical key the serving path
//! computes for the equivalent user query, so a warmed entry is found by
//! the first real lookup.
//!
//! # Architecture
//!
//! - [`cache_key`]: canonical, order- and case-insensitive search keys
//! - [`TieredCacheStore`]: write-through over the edge, key-value and
//!   cold index tiers, with read-repair on lower-tier hits
//! - [`DedupLedger`]: subjects processed within the retention window
//! - [`RateLimitedFetcher`]: provider calls paced by a shared
//!   [`RateGovernor`], with backoff on throttling
//! - [`JobOrchestrator`]: turns a subject list into queue messages
//! - [`WarmingConsumer`]: per-subject warming, redelivery and dead-letter
//!   routing
//! - [`WarmingMetrics`]: Prometheus counters for warming activity
//!
//! # Configuration
//!
//! ```yaml
//! cache:
//!   cold_dir: /var/lib/book-search-warmer/cold
//! fetcher:
//!   author_search_url: https://books.example.com/search/author
//!   title_search_url: https://books.example.com/search/title
//!   min_interval_ms: 50
//! consumer:
//!   batch_size: 10
//!   max_concurrent_batches: 2
//!   max_delivery_attempts: 3
//! ledger:
//!   retention_days: 90
//! ```
//!
//! See [`WarmerConfig`] for every option and its default.
//!
//! # Example
//!
//! ```rust,no_run
//! use book_search_warmer::{JobOrchestrator, MemoryQueue};
//! use std::sync::Arc;
//!
//! # async fn run() -> book_search_warmer::Result<()> {
//! let queue = Arc::new(MemoryQueue::new());
//! let orchestrator = JobOrchestrator::new(queue.clone());
//! let receipt = orchestrator
//!     .submit(["Neil Gaiman", "Ursula K. Le Guin"], "authors.csv")
//!     .await?;
//! println!("job {} enqueued {}", receipt.job_id, receipt.enqueued);
//! # Ok(())
//! # }
//! ```

pub mod cache_key;
pub mod cold_index;
pub mod config;
pub mod consumer;
pub mod error;
pub mod fetcher;
pub mod ledger;
pub mod memory_tier;
pub mod metrics;
pub mod models;
pub mod orchestrator;
pub mod queue;
pub mod rate_limiter;
pub mod retry;
pub mod tiered_cache;

// Re-export commonly used types
pub use cold_index::ColdIndexTier;
pub use config::WarmerConfig;
pub use consumer::{DeliveryReport, RunReport, WarmingConsumer, WarmingPipeline};
pub use error::{Result, WarmError};
pub use fetcher::{HttpTransport, ProviderResponse, ProviderTransport, RateLimitedFetcher, SearchClient};
pub use ledger::{DedupLedger, DiskLedger, MemoryLedger};
pub use memory_tier::MemoryTier;
pub use metrics::WarmingMetrics;
pub use models::{
    CacheTier, SearchKind, SearchQuery, SubjectOutcome, SubjectState, SubjectSummary, TierPolicy,
    WarmingMessage,
};
pub use orchestrator::{JobOrchestrator, JobReceipt};
pub use queue::{DeadLetterSink, JsonlDeadLetterFile, MemoryDeadLetters, MemoryQueue, WarmingQueue};
pub use rate_limiter::RateGovernor;
pub use retry::RetryPolicy;
pub use tiered_cache::{TierBackend, TieredCacheStore};
