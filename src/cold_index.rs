//! Cold index tier backed by the local filesystem
//!
//! Each key owns two files under hash-sharded directories:
//! - `index/XX/YY/<hash>.idx`: a bincode [`ColdIndexEntry`] naming the object
//! - `objects/XX/YY/<hash>.zst`: the zstd-compressed payload
//!
//! The object is written before its index record, so a reader never sees an
//! index entry pointing at a missing object from a completed write. Corrupt,
//! mismatched or expired records read as a miss and are removed.

use crate::error::{Result, WarmError};
use crate::models::{CacheEntry, CacheTier, ColdIndexEntry};
use crate::tiered_cache::TierBackend;
use async_trait::async_trait;
use bytes::Bytes;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::fs;
use tracing::{debug, info, warn};
use uuid::Uuid;
use xxhash_rust::xxh3::xxh3_64;

const COMPRESSION_LEVEL: i32 = 3;

/// Durable, long-TTL tier used to rehydrate the fast tiers
pub struct ColdIndexTier {
    root: PathBuf,
    ttl: Duration,
}

impl ColdIndexTier {
    /// Open (creating if needed) a cold index rooted at `root`
    pub async fn open(root: impl AsRef<Path>, ttl: Duration) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        for sub in ["index", "objects"] {
            fs::create_dir_all(root.join(sub)).await.map_err(|e| {
                WarmError::CacheError(format!(
                    "Failed to create cold index directory {}: {}",
                    root.join(sub).display(),
                    e
                ))
            })?;
        }

        info!("Cold index tier at {:?} (ttl={}s)", root, ttl.as_secs());
        Ok(ColdIndexTier { root, ttl })
    }

    /// Relative shard path `XX/YY/<hash>` for a key
    fn shard(key: &str) -> PathBuf {
        let hash = xxh3_64(key.as_bytes());
        let dir1 = format!("{:02x}", (hash >> 8) & 0xFF);
        let dir2 = format!("{:02x}", hash & 0xFF);
        PathBuf::from(dir1).join(dir2).join(format!("{:016x}", hash))
    }

    fn index_path(&self, key: &str) -> PathBuf {
        self.root
            .join("index")
            .join(Self::shard(key))
            .with_extension("idx")
    }

    fn object_rel_path(key: &str) -> PathBuf {
        PathBuf::from("objects")
            .join(Self::shard(key))
            .with_extension("zst")
    }

    /// Read the index record for a key, if present and readable
    pub async fn read_index(&self, key: &str) -> Result<Option<ColdIndexEntry>> {
        let path = self.index_path(key);
        let raw = match fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(WarmError::CacheError(format!(
                    "Failed to read cold index {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        match bincode::deserialize::<ColdIndexEntry>(&raw) {
            // Different key sharing the same hash
            Ok(entry) if entry.key != key => Ok(None),
            Ok(entry) => Ok(Some(entry)),
            Err(e) => {
                warn!("Corrupt cold index record {}: {}", path.display(), e);
                self.remove_files(key, None).await;
                Ok(None)
            }
        }
    }

    async fn remove_files(&self, key: &str, entry: Option<&ColdIndexEntry>) {
        let object = match entry {
            Some(e) => self.root.join(&e.object_path),
            None => self.root.join(Self::object_rel_path(key)),
        };
        for path in [self.index_path(key), object] {
            if let Err(e) = fs::remove_file(&path).await {
                if e.kind() != ErrorKind::NotFound {
                    warn!("Failed to delete cold file {}: {}", path.display(), e);
                }
            }
        }
    }

    async fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        // Concurrent writers of the same key each stage their own file
        let tmp = path.with_extension(format!("{}.tmp", Uuid::new_v4().simple()));
        if let Err(e) = fs::write(&tmp, data).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e);
        }
        fs::rename(&tmp, path).await
    }
}

fn unix_secs(at: SystemTime) -> u64 {
    at.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

#[async_trait]
impl TierBackend for ColdIndexTier {
    fn tier(&self) -> CacheTier {
        CacheTier::ColdIndex
    }

    fn ttl(&self) -> Duration {
        self.ttl
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        let Some(entry) = self.read_index(key).await? else {
            return Ok(None);
        };

        let now = SystemTime::now();
        if entry.is_expired(now) {
            debug!("Cold index entry expired: {}", key);
            self.remove_files(key, Some(&entry)).await;
            return Ok(None);
        }

        let object_path = self.root.join(&entry.object_path);
        let compressed = match fs::read(&object_path).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!("Cold object missing for {}", key);
                self.remove_files(key, Some(&entry)).await;
                return Ok(None);
            }
            Err(e) => {
                return Err(WarmError::CacheError(format!(
                    "Failed to read cold object {}: {}",
                    object_path.display(),
                    e
                )))
            }
        };

        let payload = match zstd::decode_all(compressed.as_slice()) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Cold object for {} failed to decompress: {}", key, e);
                self.remove_files(key, Some(&entry)).await;
                return Ok(None);
            }
        };

        if crc32fast::hash(&payload) != entry.checksum || payload.len() as u64 != entry.size {
            warn!("Cold object checksum mismatch for {}", key);
            self.remove_files(key, Some(&entry)).await;
            return Ok(None);
        }

        let created_at = entry.created_at();
        let ttl = Duration::from_secs(entry.expires_at_secs.saturating_sub(entry.created_at_secs));
        Ok(Some(CacheEntry {
            key: entry.key,
            payload: Bytes::from(payload),
            created_at,
            ttl,
        }))
    }

    async fn put(&self, entry: CacheEntry) -> Result<()> {
        let object_rel = Self::object_rel_path(&entry.key);
        let compressed = zstd::encode_all(entry.payload.as_ref(), COMPRESSION_LEVEL)
            .map_err(|e| WarmError::tier_write(CacheTier::ColdIndex, format!("compression failed: {}", e)))?;

        Self::write_atomic(&self.root.join(&object_rel), &compressed)
            .await
            .map_err(|e| WarmError::tier_write(CacheTier::ColdIndex, format!("object write failed: {}", e)))?;

        let record = ColdIndexEntry {
            key: entry.key.clone(),
            object_path: object_rel.to_string_lossy().into_owned(),
            size: entry.payload.len() as u64,
            checksum: crc32fast::hash(&entry.payload),
            created_at_secs: unix_secs(entry.created_at),
            expires_at_secs: unix_secs(entry.expires_at()),
        };
        let encoded = bincode::serialize(&record)
            .map_err(|e| WarmError::tier_write(CacheTier::ColdIndex, format!("index encode failed: {}", e)))?;

        Self::write_atomic(&self.index_path(&entry.key), &encoded)
            .await
            .map_err(|e| WarmError::tier_write(CacheTier::ColdIndex, format!("index write failed: {}", e)))?;

        debug!(
            "Wrote cold object: {} ({} -> {} bytes)",
            entry.key,
            entry.payload.len(),
            compressed.len()
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let existing = self.read_index(key).await?;
        let found = existing.is_some();
        self.remove_files(key, existing.as_ref()).await;
        Ok(found)
    }
}
