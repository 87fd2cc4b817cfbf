//! Dedup ledger of subjects already warmed
//!
//! A subject is recorded only after all of its titles have been attempted.
//! Markers live for a fixed retention window; an expired marker reads as
//! "not processed" so the subject is warmed again.

use crate::cache_key::normalize_text;
use crate::error::{Result, WarmError};
use crate::models::{ProcessedMarker, SubjectSummary};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;
use xxhash_rust::xxh3::xxh3_64;

/// Ledger key for a subject: `processed:author:{normalized-subject}`
pub fn ledger_key(subject: &str) -> String {
    format!("processed:author:{}", normalize_text(subject))
}

fn is_live(marker: &ProcessedMarker, retention: Duration) -> bool {
    let age = Utc::now().signed_duration_since(marker.last_warmed_at);
    match age.to_std() {
        Ok(age) => age < retention,
        // Timestamp in the future; clock skew, keep it
        Err(_) => true,
    }
}

/// Record of which subjects were warmed within the retention window
#[async_trait]
pub trait DedupLedger: Send + Sync {
    /// Live marker for a subject, if any
    async fn marker(&self, subject: &str) -> Result<Option<ProcessedMarker>>;

    /// Record a fully processed subject, overwriting any older marker
    async fn mark_processed(&self, subject: &str, summary: &SubjectSummary) -> Result<()>;

    async fn is_processed(&self, subject: &str) -> Result<bool> {
        Ok(self.marker(subject).await?.is_some())
    }
}

/// In-process ledger
pub struct MemoryLedger {
    retention: Duration,
    markers: RwLock<HashMap<String, ProcessedMarker>>,
}

impl MemoryLedger {
    pub fn new(retention: Duration) -> Self {
        MemoryLedger {
            retention,
            markers: RwLock::new(HashMap::new()),
        }
    }

    pub async fn len(&self) -> usize {
        self.markers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl DedupLedger for MemoryLedger {
    async fn marker(&self, subject: &str) -> Result<Option<ProcessedMarker>> {
        let key = ledger_key(subject);
        let mut markers = self.markers.write().await;

        match markers.get(&key) {
            Some(m) if is_live(m, self.retention) => Ok(Some(m.clone())),
            Some(_) => {
                markers.remove(&key);
                debug!("Ledger marker expired: {}", key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn mark_processed(&self, subject: &str, summary: &SubjectSummary) -> Result<()> {
        let key = ledger_key(subject);
        self.markers
            .write()
            .await
            .insert(key.clone(), summary.to_marker(Utc::now()));
        debug!("Marked processed: {}", key);
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredMarker {
    key: String,
    #[serde(flatten)]
    marker: ProcessedMarker,
}

/// Ledger persisted as one JSON document per subject
pub struct DiskLedger {
    dir: PathBuf,
    retention: Duration,
}

impl DiskLedger {
    pub async fn open(dir: impl AsRef<Path>, retention: Duration) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).await.map_err(|e| {
            WarmError::LedgerError(format!(
                "Failed to create ledger directory {}: {}",
                dir.display(),
                e
            ))
        })?;
        Ok(DiskLedger { dir, retention })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{:016x}.json", xxh3_64(key.as_bytes())))
    }
}

#[async_trait]
impl DedupLedger for DiskLedger {
    async fn marker(&self, subject: &str) -> Result<Option<ProcessedMarker>> {
        let key = ledger_key(subject);
        let path = self.path_for(&key);

        let raw = match fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(WarmError::LedgerError(format!(
                    "Failed to read ledger entry {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        let stored: StoredMarker = match serde_json::from_slice(&raw) {
            Ok(stored) => stored,
            Err(e) => {
                warn!("Unreadable ledger entry {}: {}", path.display(), e);
                return Ok(None);
            }
        };

        if stored.key != key {
            return Ok(None);
        }

        if !is_live(&stored.marker, self.retention) {
            if let Err(e) = fs::remove_file(&path).await {
                if e.kind() != ErrorKind::NotFound {
                    warn!("Failed to delete expired ledger entry {}: {}", path.display(), e);
                }
            }
            return Ok(None);
        }

        Ok(Some(stored.marker))
    }

    async fn mark_processed(&self, subject: &str, summary: &SubjectSummary) -> Result<()> {
        let key = ledger_key(subject);
        let path = self.path_for(&key);
        let stored = StoredMarker {
            key,
            marker: summary.to_marker(Utc::now()),
        };
        let body = serde_json::to_vec_pretty(&stored)
            .map_err(|e| WarmError::LedgerError(format!("Failed to encode ledger entry: {}", e)))?;

        let tmp = path.with_extension(format!("{}.tmp", Uuid::new_v4().simple()));
        fs::write(&tmp, &body).await.map_err(|e| {
            WarmError::LedgerError(format!("Failed to write ledger entry {}: {}", tmp.display(), e))
        })?;
        fs::rename(&tmp, &path).await.map_err(|e| {
            WarmError::LedgerError(format!("Failed to commit ledger entry {}: {}", path.display(), e))
        })?;

        debug!("Marked processed: {}", stored.key);
        Ok(())
    }
}
