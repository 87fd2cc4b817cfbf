//! In-memory cache tiers
//!
//! Backs both the edge tier (byte-bounded with LRU eviction) and the
//! key-value tier (unbounded, TTL only).

use crate::error::Result;
use crate::models::{CacheEntry, CacheTier};
use crate::tiered_cache::TierBackend;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::{Duration, SystemTime};
use tokio::sync::RwLock;
use tracing::debug;

/// Entry with access tracking
#[derive(Clone)]
struct MemoryEntry {
    entry: CacheEntry,
    last_accessed: SystemTime,
}

#[derive(Default)]
struct MemoryState {
    entries: HashMap<String, MemoryEntry>,
    current_bytes: usize,
}

impl MemoryState {
    fn remove(&mut self, key: &str) -> Option<MemoryEntry> {
        let removed = self.entries.remove(key)?;
        self.current_bytes = self
            .current_bytes
            .saturating_sub(removed.entry.payload.len());
        Some(removed)
    }
}

/// HashMap-backed tier with optional byte budget
pub struct MemoryTier {
    tier: CacheTier,
    ttl: Duration,
    max_bytes: Option<usize>,
    state: RwLock<MemoryState>,
}

impl MemoryTier {
    pub fn new(tier: CacheTier, ttl: Duration, max_bytes: Option<usize>) -> Self {
        MemoryTier {
            tier,
            ttl,
            max_bytes,
            state: RwLock::new(MemoryState::default()),
        }
    }

    /// Edge tier evicting least recently used entries past `max_bytes`
    pub fn edge(ttl: Duration, max_bytes: usize) -> Self {
        Self::new(CacheTier::Edge, ttl, Some(max_bytes))
    }

    pub fn key_value(ttl: Duration) -> Self {
        Self::new(CacheTier::KeyValue, ttl, None)
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn size_bytes(&self) -> usize {
        self.state.read().await.current_bytes
    }
}

#[async_trait]
impl TierBackend for MemoryTier {
    fn tier(&self) -> CacheTier {
        self.tier
    }

    fn ttl(&self) -> Duration {
        self.ttl
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        let now = SystemTime::now();
        let mut state = self.state.write().await;

        let expired = match state.entries.get_mut(key) {
            Some(slot) if !slot.entry.is_expired(now) => {
                slot.last_accessed = now;
                return Ok(Some(slot.entry.clone()));
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            state.remove(key);
            debug!("Expired {} entry removed: {}", self.tier, key);
        }
        Ok(None)
    }

    async fn put(&self, entry: CacheEntry) -> Result<()> {
        let size = entry.payload.len();
        let now = SystemTime::now();
        let mut state = self.state.write().await;

        state.remove(&entry.key);

        if let Some(max_bytes) = self.max_bytes {
            while state.current_bytes + size > max_bytes && !state.entries.is_empty() {
                let lru_key = state
                    .entries
                    .iter()
                    .min_by_key(|(_, e)| e.last_accessed)
                    .map(|(k, _)| k.clone());
                match lru_key {
                    Some(k) => {
                        state.remove(&k);
                        debug!("Evicted LRU entry from {}: {}", self.tier, k);
                    }
                    None => break,
                }
            }
        }

        let key = entry.key.clone();
        state.current_bytes += size;
        state.entries.insert(
            key,
            MemoryEntry {
                entry,
                last_accessed: now,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.state.write().await.remove(key).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn entry(key: &str, size: usize, ttl: Duration) -> CacheEntry {
        CacheEntry::new(key, Bytes::from(vec![0u8; size]), ttl)
    }

    #[tokio::test]
    async fn test_put_get_delete() {
        let tier = MemoryTier::key_value(Duration::from_secs(60));
        tier.put(entry("a", 10, Duration::from_secs(60))).await.unwrap();

        assert!(tier.get("a").await.unwrap().is_some());
        assert!(tier.delete("a").await.unwrap());
        assert!(!tier.delete("a").await.unwrap());
        assert!(tier.get("a").await.unwrap().is_none());
        assert_eq!(tier.size_bytes().await, 0);
    }

    #[tokio::test]
    async fn test_expired_entry_is_a_miss() {
        let tier = MemoryTier::key_value(Duration::from_millis(10));
        tier.put(entry("a", 10, Duration::from_millis(10))).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(tier.get("a").await.unwrap().is_none());
        assert!(tier.is_empty().await);
    }

    #[tokio::test]
    async fn test_overwrite_keeps_size_accurate() {
        let tier = MemoryTier::edge(Duration::from_secs(60), 1000);
        tier.put(entry("a", 100, Duration::from_secs(60))).await.unwrap();
        tier.put(entry("a", 300, Duration::from_secs(60))).await.unwrap();

        assert_eq!(tier.len().await, 1);
        assert_eq!(tier.size_bytes().await, 300);
    }

    #[tokio::test]
    async fn test_edge_evicts_lru() {
        let tier = MemoryTier::edge(Duration::from_secs(60), 250);
        tier.put(entry("a", 100, Duration::from_secs(60))).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        tier.put(entry("b", 100, Duration::from_secs(60))).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        // Touch "a" so "b" becomes least recently used
        assert!(tier.get("a").await.unwrap().is_some());
        tokio::time::sleep(Duration::from_millis(5)).await;

        tier.put(entry("c", 100, Duration::from_secs(60))).await.unwrap();
        assert!(tier.get("a").await.unwrap().is_some());
        assert!(tier.get("b").await.unwrap().is_none());
        assert!(tier.get("c").await.unwrap().is_some());
        assert_eq!(tier.size_bytes().await, 200);
    }
}
