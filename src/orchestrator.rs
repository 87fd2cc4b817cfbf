//! Job orchestrator: turns a batch of subjects into queue messages

use crate::cache_key::normalize_text;
use crate::error::Result;
use crate::models::WarmingMessage;
use crate::queue::WarmingQueue;
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// What a submission put on the queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobReceipt {
    pub job_id: String,
    pub enqueued: usize,
    /// Blank or duplicate subjects left out
    pub dropped: usize,
}

pub struct JobOrchestrator {
    queue: Arc<dyn WarmingQueue>,
}

impl JobOrchestrator {
    pub fn new(queue: Arc<dyn WarmingQueue>) -> Self {
        JobOrchestrator { queue }
    }

    /// Enqueue one message per distinct subject under a fresh job id
    pub async fn submit<I, S>(&self, subjects: I, source: &str) -> Result<JobReceipt>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let job_id = Uuid::new_v4().to_string();
        let queued_at = Utc::now();
        let mut seen = HashSet::new();
        let mut enqueued = 0;
        let mut dropped = 0;

        for subject in subjects {
            let subject = subject.as_ref().trim();
            if subject.is_empty() || !seen.insert(normalize_text(subject)) {
                dropped += 1;
                continue;
            }

            self.queue
                .enqueue(WarmingMessage {
                    subject: subject.to_string(),
                    source: source.to_string(),
                    queued_at,
                    job_id: job_id.clone(),
                })
                .await?;
            enqueued += 1;
        }

        info!(
            "Submitted job {} from {}: {} subjects enqueued, {} dropped",
            job_id, source, enqueued, dropped
        );
        Ok(JobReceipt {
            job_id,
            enqueued,
            dropped,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::MemoryQueue;

    #[tokio::test]
    async fn test_submit_enqueues_distinct_subjects() {
        let queue = Arc::new(MemoryQueue::new());
        let orchestrator = JobOrchestrator::new(queue.clone());

        let receipt = orchestrator
            .submit(["Neil Gaiman", "  ", "neil gaiman ", "Terry Pratchett"], "authors.csv")
            .await
            .unwrap();
        assert_eq!(receipt.enqueued, 2);
        assert_eq!(receipt.dropped, 2);

        let batch = queue.receive_batch(10).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].message.subject, "Neil Gaiman");
        assert_eq!(batch[1].message.subject, "Terry Pratchett");
        assert!(batch.iter().all(|d| d.message.job_id == receipt.job_id));
        assert!(batch.iter().all(|d| d.message.source == "authors.csv"));
    }

    #[tokio::test]
    async fn test_each_submission_gets_new_job_id() {
        let queue = Arc::new(MemoryQueue::new());
        let orchestrator = JobOrchestrator::new(queue);

        let a = orchestrator.submit(["x"], "s").await.unwrap();
        let b = orchestrator.submit(["x"], "s").await.unwrap();
        assert_ne!(a.job_id, b.job_id);
    }
}
