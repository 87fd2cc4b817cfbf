//! Three-tier search response cache
//!
//! This module ties together the storage tiers, fastest first:
//! - Edge: in-memory, byte-bounded, short TTL
//! - Key-value: in-memory fallback with the same TTL class as edge
//! - Cold index: durable disk objects with a long TTL, used to rehydrate
//!   the fast tiers after a full miss
//!
//! Tiers are independent copies. Writes report per-tier failures without
//! rolling back the tiers that succeeded, and reads below the edge tier
//! repopulate the faster tiers in the background (read-repair).

use crate::cold_index::ColdIndexTier;
use crate::config::CacheConfig;
use crate::error::{Result, WarmError};
use crate::memory_tier::MemoryTier;
use crate::models::{CacheEntry, CacheTier, TierPolicy};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

/// Storage backend for a single cache tier
#[async_trait]
pub trait TierBackend: Send + Sync {
    /// Which tier this backend serves
    fn tier(&self) -> CacheTier;

    /// TTL applied to entries written into this tier
    fn ttl(&self) -> Duration;

    /// Fetch a live entry; expired entries are reported as a miss
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>>;

    /// Insert or overwrite an entry
    async fn put(&self, entry: CacheEntry) -> Result<()>;

    /// Remove an entry, returning whether it existed
    async fn delete(&self, key: &str) -> Result<bool>;
}

/// A successful read and the tier that served it
#[derive(Debug, Clone, PartialEq)]
pub struct CacheHit {
    pub tier: CacheTier,
    pub payload: Bytes,
}

/// Outcome of a multi-tier write
#[derive(Debug, Clone, Default)]
pub struct SetReport {
    pub written: Vec<CacheTier>,
    pub failures: Vec<WarmError>,
}

impl SetReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn any_written(&self) -> bool {
        !self.written.is_empty()
    }

    /// Collapse into a Result that fails on the first tier failure
    pub fn into_result(self) -> Result<Vec<CacheTier>> {
        match self.failures.into_iter().next() {
            Some(err) => Err(err),
            None => Ok(self.written),
        }
    }
}

/// Outcome of a best-effort invalidation
#[derive(Debug, Clone, Default)]
pub struct InvalidateReport {
    pub removed: Vec<CacheTier>,
    pub failures: Vec<WarmError>,
}

/// Cache statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TieredCacheStats {
    pub edge_hits: u64,
    pub kv_hits: u64,
    pub cold_hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub write_failures: u64,
    pub read_repairs: u64,
    pub invalidations: u64,
}

#[derive(Debug, Default)]
struct StoreCounters {
    edge_hits: AtomicU64,
    kv_hits: AtomicU64,
    cold_hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    write_failures: AtomicU64,
    read_repairs: AtomicU64,
    invalidations: AtomicU64,
}

/// Read/write facade over the edge, key-value and cold index tiers
pub struct TieredCacheStore {
    // Fastest first
    tiers: Vec<Arc<dyn TierBackend>>,
    counters: Arc<StoreCounters>,
}

impl TieredCacheStore {
    /// Create a store from explicit tier backends
    pub fn new(
        edge: Arc<dyn TierBackend>,
        kv: Arc<dyn TierBackend>,
        cold: Arc<dyn TierBackend>,
    ) -> Self {
        TieredCacheStore {
            tiers: vec![edge, kv, cold],
            counters: Arc::new(StoreCounters::default()),
        }
    }

    /// Build the default tier stack from configuration
    pub async fn from_config(config: &CacheConfig) -> Result<Self> {
        let edge = MemoryTier::edge(config.edge_ttl(), config.edge_max_bytes);
        let kv = MemoryTier::key_value(config.kv_ttl());
        let cold = ColdIndexTier::open(&config.cold_dir, config.cold_ttl()).await?;

        info!(
            "Initializing tiered cache: edge={}MB ttl={}s, kv ttl={}s, cold={} ttl={}s",
            config.edge_max_bytes / 1024 / 1024,
            config.edge_ttl_secs,
            config.kv_ttl_secs,
            config.cold_dir,
            config.cold_ttl_secs
        );

        Ok(Self::new(Arc::new(edge), Arc::new(kv), Arc::new(cold)))
    }

    fn backend(&self, tier: CacheTier) -> Option<&Arc<dyn TierBackend>> {
        self.tiers.iter().find(|b| b.tier() == tier)
    }

    /// Write a payload to every tier the policy names
    ///
    /// Tiers that succeed stay written even when another tier fails; the
    /// failures come back in the report.
    pub async fn set(&self, key: &str, payload: Bytes, policy: TierPolicy) -> SetReport {
        let mut report = SetReport::default();

        for tier in policy.tiers() {
            let Some(backend) = self.backend(tier) else {
                report
                    .failures
                    .push(WarmError::tier_write(tier, "tier not configured"));
                continue;
            };

            let entry = CacheEntry::new(key, payload.clone(), backend.ttl());
            match backend.put(entry).await {
                Ok(()) => {
                    self.counters.writes.fetch_add(1, Ordering::Relaxed);
                    report.written.push(tier);
                }
                Err(e) => {
                    self.counters.write_failures.fetch_add(1, Ordering::Relaxed);
                    warn!("Cache write to {} failed for {}: {}", tier, key, e);
                    let err = match e {
                        WarmError::TierWrite { .. } => e,
                        other => WarmError::tier_write(tier, other.to_string()),
                    };
                    report.failures.push(err);
                }
            }
        }

        debug!(
            "Stored {} in {:?} ({} failures)",
            key,
            report.written,
            report.failures.len()
        );
        report
    }

    /// Probe edge, then key-value, then cold index
    ///
    /// A hit below the edge tier schedules a background write of the
    /// payload into every faster tier. Tier read errors are logged and
    /// treated as a miss for that tier; the call only fails when every
    /// tier errored.
    pub async fn get(&self, key: &str) -> Result<Option<CacheHit>> {
        let mut last_error = None;
        let mut any_answered = false;

        for (idx, backend) in self.tiers.iter().enumerate() {
            match backend.get(key).await {
                Ok(Some(entry)) => {
                    let tier = backend.tier();
                    self.record_hit(tier);
                    debug!("{} cache hit: {}", tier, key);

                    if idx > 0 {
                        self.spawn_read_repair(idx, entry.clone());
                    }

                    return Ok(Some(CacheHit {
                        tier,
                        payload: entry.payload,
                    }));
                }
                Ok(None) => any_answered = true,
                Err(e) => {
                    warn!("{} cache read failed for {}: {}", backend.tier(), key, e);
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(err) if !any_answered => Err(err),
            _ => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                debug!("Cache miss: {}", key);
                Ok(None)
            }
        }
    }

    fn record_hit(&self, tier: CacheTier) {
        let counter = match tier {
            CacheTier::Edge => &self.counters.edge_hits,
            CacheTier::KeyValue => &self.counters.kv_hits,
            CacheTier::ColdIndex => &self.counters.cold_hits,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Repopulate the tiers faster than `hit_idx`
    fn spawn_read_repair(&self, hit_idx: usize, source: CacheEntry) {
        let targets: Vec<Arc<dyn TierBackend>> = self.tiers[..hit_idx].to_vec();
        let counters = self.counters.clone();

        tokio::spawn(async move {
            let now = SystemTime::now();
            let remaining = source
                .expires_at()
                .duration_since(now)
                .unwrap_or_default();
            if remaining.is_zero() {
                return;
            }

            for target in targets {
                let entry = CacheEntry {
                    key: source.key.clone(),
                    payload: source.payload.clone(),
                    created_at: now,
                    ttl: target.ttl().min(remaining),
                };
                match target.put(entry).await {
                    Ok(()) => {
                        counters.read_repairs.fetch_add(1, Ordering::Relaxed);
                        debug!("Read-repaired {} into {}", source.key, target.tier());
                    }
                    Err(e) => {
                        warn!("Read-repair into {} failed for {}: {}", target.tier(), source.key, e);
                    }
                }
            }
        });
    }

    /// Best-effort delete across all tiers
    pub async fn invalidate(&self, key: &str) -> InvalidateReport {
        let mut report = InvalidateReport::default();

        for backend in &self.tiers {
            match backend.delete(key).await {
                Ok(true) => report.removed.push(backend.tier()),
                Ok(false) => {}
                Err(e) => {
                    warn!("Invalidate in {} failed for {}: {}", backend.tier(), key, e);
                    report.failures.push(e);
                }
            }
        }

        self.counters.invalidations.fetch_add(1, Ordering::Relaxed);
        info!("Invalidated cache entry: {} (tiers: {:?})", key, report.removed);
        report
    }

    /// Get cache statistics
    pub fn stats(&self) -> TieredCacheStats {
        let c = &self.counters;
        TieredCacheStats {
            edge_hits: c.edge_hits.load(Ordering::Relaxed),
            kv_hits: c.kv_hits.load(Ordering::Relaxed),
            cold_hits: c.cold_hits.load(Ordering::Relaxed),
            misses: c.misses.load(Ordering::Relaxed),
            writes: c.writes.load(Ordering::Relaxed),
            write_failures: c.write_failures.load(Ordering::Relaxed),
            read_repairs: c.read_repairs.load(Ordering::Relaxed),
            invalidations: c.invalidations.load(Ordering::Relaxed),
        }
    }
}
