//! Work queue and dead-letter path for warming messages
//!
//! Deliveries are at-least-once: a message stays in flight until it is
//! acked, scheduled for redelivery, or released. Each delivery carries its
//! attempt number, starting at 1.

use crate::error::{Result, WarmError};
use crate::models::{DeadLetterRecord, WarmingMessage};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error};

/// A message handed to a consumer
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub id: u64,
    pub message: WarmingMessage,
    /// 1 on first delivery, incremented on every redelivery
    pub attempt: u32,
}

/// Source of warming messages
#[async_trait]
pub trait WarmingQueue: Send + Sync {
    async fn enqueue(&self, message: WarmingMessage) -> Result<()>;

    /// Up to `max` ready messages; empty when nothing is ready
    async fn receive_batch(&self, max: usize) -> Result<Vec<Delivery>>;

    /// Remove a delivered message for good
    async fn ack(&self, delivery: &Delivery) -> Result<()>;

    /// Redeliver after `delay`, charging one attempt
    async fn retry(&self, delivery: Delivery, delay: Duration) -> Result<()>;

    /// Put an unprocessed message back without charging an attempt
    async fn release(&self, delivery: Delivery) -> Result<()>;

    /// No ready, delayed or in-flight messages remain
    async fn is_idle(&self) -> Result<bool>;
}

/// Terminal destination for messages that exhausted their retries
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn send(&self, record: DeadLetterRecord) -> Result<()>;
}

#[derive(Debug, Clone)]
struct Pending {
    message: WarmingMessage,
    deliveries: u32,
}

#[derive(Debug, Default)]
struct QueueState {
    ready: VecDeque<Pending>,
    delayed: Vec<(Instant, Pending)>,
    in_flight: HashMap<u64, Pending>,
    next_id: u64,
}

/// Queue depth snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueDepth {
    pub ready: usize,
    pub delayed: usize,
    pub in_flight: usize,
}

/// In-process queue with delayed redelivery
#[derive(Debug, Default)]
pub struct MemoryQueue {
    state: Mutex<QueueState>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn depth(&self) -> QueueDepth {
        let state = self.state.lock().await;
        QueueDepth {
            ready: state.ready.len(),
            delayed: state.delayed.len(),
            in_flight: state.in_flight.len(),
        }
    }

    fn take_in_flight(state: &mut QueueState, delivery: &Delivery) -> Result<Pending> {
        state.in_flight.remove(&delivery.id).ok_or_else(|| {
            WarmError::QueueError(format!("Unknown or already settled delivery {}", delivery.id))
        })
    }
}

#[async_trait]
impl WarmingQueue for MemoryQueue {
    async fn enqueue(&self, message: WarmingMessage) -> Result<()> {
        self.state.lock().await.ready.push_back(Pending {
            message,
            deliveries: 0,
        });
        Ok(())
    }

    async fn receive_batch(&self, max: usize) -> Result<Vec<Delivery>> {
        let mut state = self.state.lock().await;
        let now = Instant::now();

        let (due, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut state.delayed)
            .into_iter()
            .partition(|(ready_at, _)| *ready_at <= now);
        state.delayed = waiting;
        state.ready.extend(due.into_iter().map(|(_, p)| p));

        let mut batch = Vec::new();
        while batch.len() < max {
            let Some(mut pending) = state.ready.pop_front() else {
                break;
            };
            pending.deliveries += 1;
            state.next_id += 1;
            let id = state.next_id;

            batch.push(Delivery {
                id,
                message: pending.message.clone(),
                attempt: pending.deliveries,
            });
            state.in_flight.insert(id, pending);
        }

        if !batch.is_empty() {
            debug!("Delivered batch of {}", batch.len());
        }
        Ok(batch)
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        let mut state = self.state.lock().await;
        Self::take_in_flight(&mut state, delivery)?;
        Ok(())
    }

    async fn retry(&self, delivery: Delivery, delay: Duration) -> Result<()> {
        let mut state = self.state.lock().await;
        let pending = Self::take_in_flight(&mut state, &delivery)?;
        state.delayed.push((Instant::now() + delay, pending));
        Ok(())
    }

    async fn release(&self, delivery: Delivery) -> Result<()> {
        let mut state = self.state.lock().await;
        let mut pending = Self::take_in_flight(&mut state, &delivery)?;
        pending.deliveries = pending.deliveries.saturating_sub(1);
        state.ready.push_front(pending);
        Ok(())
    }

    async fn is_idle(&self) -> Result<bool> {
        let state = self.state.lock().await;
        Ok(state.ready.is_empty() && state.delayed.is_empty() && state.in_flight.is_empty())
    }
}

/// Dead letters kept in memory
#[derive(Debug, Default)]
pub struct MemoryDeadLetters {
    records: Mutex<Vec<DeadLetterRecord>>,
}

impl MemoryDeadLetters {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self) -> Vec<DeadLetterRecord> {
        self.records.lock().await.clone()
    }
}

#[async_trait]
impl DeadLetterSink for MemoryDeadLetters {
    async fn send(&self, record: DeadLetterRecord) -> Result<()> {
        self.records.lock().await.push(record);
        Ok(())
    }
}

/// Dead letters appended as JSON lines for manual review
#[derive(Debug)]
pub struct JsonlDeadLetterFile {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlDeadLetterFile {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        Ok(JsonlDeadLetterFile {
            path,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl DeadLetterSink for JsonlDeadLetterFile {
    async fn send(&self, record: DeadLetterRecord) -> Result<()> {
        let mut line = serde_json::to_vec(&record)
            .map_err(|e| WarmError::QueueError(format!("Failed to encode dead letter: {}", e)))?;
        line.push(b'\n');

        let _guard = self.write_lock.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| {
                error!("Cannot open dead-letter file {}: {}", self.path.display(), e);
                WarmError::QueueError(format!("Failed to open dead-letter file: {}", e))
            })?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}
