//! Warming consumer: drains the queue and warms one subject per message
//!
//! Per subject the sequence is strictly author fetch, author cache write,
//! then each title fetch and write in turn, then the ledger mark. Subjects
//! from different messages run in parallel: `max_concurrent_batches`
//! workers each draw a batch and work through it with at most
//! `intra_batch_concurrency` subjects in flight.
//!
//! Failure routing:
//! - a failed title is counted and skipped, the subject carries on
//! - a failed author fetch fails the delivery; retryable errors are
//!   redelivered with backoff until `max_delivery_attempts`, everything
//!   else (and ceiling exhaustion) goes to the dead-letter sink
//!
//! Cancellation stops new subjects from starting. A subject already past
//! its ledger check runs to completion, and undrawn messages of the current
//! batch are released back to the queue.

use crate::config::ConsumerConfig;
use crate::error::WarmError;
use crate::fetcher::SearchClient;
use crate::ledger::DedupLedger;
use crate::metrics::WarmingMetrics;
use crate::models::{DeadLetterRecord, SubjectOutcome, SubjectState, SubjectSummary, TierPolicy};
use crate::queue::{DeadLetterSink, Delivery, WarmingQueue};
use crate::retry::RetryPolicy;
use crate::tiered_cache::{SetReport, TieredCacheStore};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Shared collaborators of the consumer
pub struct WarmingPipeline {
    pub client: Arc<SearchClient>,
    pub store: Arc<TieredCacheStore>,
    pub ledger: Arc<dyn DedupLedger>,
    pub queue: Arc<dyn WarmingQueue>,
    pub dead_letters: Arc<dyn DeadLetterSink>,
    pub metrics: WarmingMetrics,
}

/// What happened to one delivery
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryReport {
    pub subject: String,
    pub attempt: u32,
    pub state: SubjectState,
    pub summary: Option<SubjectSummary>,
    pub error: Option<WarmError>,
}

/// Aggregate over every delivery a run handled
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub completed: usize,
    pub partially_completed: usize,
    pub skipped: usize,
    pub retried: usize,
    pub dead_lettered: usize,
    /// Drawn but not started because of cancellation
    pub released: usize,
    pub titles_warmed: usize,
    pub titles_skipped: usize,
}

impl RunReport {
    pub fn record(&mut self, report: &DeliveryReport) {
        match report.state {
            SubjectState::Completed => self.completed += 1,
            SubjectState::PartiallyCompleted => self.partially_completed += 1,
            SubjectState::Skipped => self.skipped += 1,
            SubjectState::Retrying => self.retried += 1,
            SubjectState::DeadLettered => self.dead_lettered += 1,
            SubjectState::Queued => self.released += 1,
            SubjectState::Processing | SubjectState::Failed => {}
        }
        if let Some(summary) = &report.summary {
            self.titles_warmed += summary.titles_warmed;
            self.titles_skipped += summary.titles_skipped;
        }
    }

    pub fn merge(&mut self, other: &RunReport) {
        self.completed += other.completed;
        self.partially_completed += other.partially_completed;
        self.skipped += other.skipped;
        self.retried += other.retried;
        self.dead_lettered += other.dead_lettered;
        self.released += other.released;
        self.titles_warmed += other.titles_warmed;
        self.titles_skipped += other.titles_skipped;
    }
}

pub struct WarmingConsumer {
    settings: ConsumerConfig,
    write_policy: TierPolicy,
    redelivery: RetryPolicy,
    pipeline: WarmingPipeline,
}

impl WarmingConsumer {
    pub fn new(settings: ConsumerConfig, write_policy: TierPolicy, pipeline: WarmingPipeline) -> Self {
        let redelivery = RetryPolicy::new(
            settings.max_delivery_attempts,
            Duration::from_millis(settings.redelivery_backoff_ms),
            Duration::from_millis(settings.redelivery_backoff_max_ms),
        );
        WarmingConsumer {
            settings,
            write_policy,
            redelivery,
            pipeline,
        }
    }

    pub fn pipeline(&self) -> &WarmingPipeline {
        &self.pipeline
    }

    /// Run the worker pool until the queue drains (with `stop_when_idle`)
    /// or `shutdown` flips to true
    pub async fn run(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> RunReport {
        let governor = self.pipeline.client.fetcher().governor().clone();
        let throttles_before = governor.stats().throttles;

        let mut workers = JoinSet::new();
        for worker_id in 0..self.settings.max_concurrent_batches {
            let consumer = self.clone();
            let shutdown = shutdown.clone();
            workers.spawn(async move { consumer.worker_loop(worker_id, shutdown).await });
        }

        let mut report = RunReport::default();
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(worker_report) => report.merge(&worker_report),
                Err(e) => error!("Warming worker terminated abnormally: {}", e),
            }
        }

        let throttled = governor.stats().throttles.saturating_sub(throttles_before);
        self.pipeline.metrics.fetch_throttled_total.inc_by(throttled);

        info!("Warming run finished: {:?}", report);
        report
    }

    async fn worker_loop(&self, worker_id: usize, mut shutdown: watch::Receiver<bool>) -> RunReport {
        let mut report = RunReport::default();
        let poll = self.settings.poll_interval();
        debug!("Worker {} started", worker_id);

        loop {
            let cancelled = *shutdown.borrow();
            if cancelled {
                info!("Worker {} stopping on cancellation", worker_id);
                break;
            }

            let batch = match self.pipeline.queue.receive_batch(self.settings.batch_size).await {
                Ok(batch) => batch,
                Err(e) => {
                    error!("Worker {} failed to receive batch: {}", worker_id, e);
                    sleep(poll).await;
                    continue;
                }
            };

            if batch.is_empty() {
                if self.settings.stop_when_idle && self.pipeline.queue.is_idle().await.unwrap_or(false) {
                    debug!("Worker {} found the queue drained", worker_id);
                    break;
                }
                tokio::select! {
                    _ = sleep(poll) => {}
                    changed = shutdown.changed() => {
                        // Sender gone: no further signal can arrive, keep polling
                        if changed.is_err() {
                            sleep(poll).await;
                        }
                    }
                }
                continue;
            }

            let batch_report = self.process_batch(batch, &shutdown).await;
            report.merge(&batch_report);
        }

        report
    }

    /// Work through one batch with bounded intra-batch concurrency
    pub async fn process_batch(&self, batch: Vec<Delivery>, shutdown: &watch::Receiver<bool>) -> RunReport {
        let deliveries: Vec<DeliveryReport> = stream::iter(batch)
            .map(|delivery| async move {
                let cancelled = *shutdown.borrow();
                if cancelled {
                    return self.release(delivery).await;
                }
                self.handle_delivery(delivery).await
            })
            .buffer_unordered(self.settings.intra_batch_concurrency)
            .collect()
            .await;

        let mut report = RunReport::default();
        for delivery in &deliveries {
            report.record(delivery);
        }
        report
    }

    async fn release(&self, delivery: Delivery) -> DeliveryReport {
        let subject = delivery.message.subject.clone();
        let attempt = delivery.attempt;
        if let Err(e) = self.pipeline.queue.release(delivery).await {
            warn!("Failed to release {} back to the queue: {}", subject, e);
        }
        DeliveryReport {
            subject,
            attempt,
            state: SubjectState::Queued,
            summary: None,
            error: None,
        }
    }

    /// Process one delivery and settle it with the queue
    pub async fn handle_delivery(&self, delivery: Delivery) -> DeliveryReport {
        info!(
            "Processing subject '{}' (job {}, attempt {})",
            delivery.message.subject, delivery.message.job_id, delivery.attempt
        );

        let outcome = self.process_subject(&delivery.message.subject, &delivery.message.job_id).await;
        self.pipeline.metrics.record_outcome(&outcome);

        match outcome {
            SubjectOutcome::Failed(err) => self.route_failure(delivery, err).await,
            outcome => {
                if let Err(e) = self.pipeline.queue.ack(&delivery).await {
                    warn!("Failed to ack {}: {}", delivery.message.subject, e);
                }
                DeliveryReport {
                    subject: delivery.message.subject,
                    attempt: delivery.attempt,
                    state: outcome.state(),
                    summary: outcome.summary().cloned(),
                    error: None,
                }
            }
        }
    }

    /// Redeliver or dead-letter a failed delivery
    async fn route_failure(&self, delivery: Delivery, err: WarmError) -> DeliveryReport {
        let subject = delivery.message.subject.clone();
        let attempt = delivery.attempt;

        if self.redelivery.should_retry(attempt, &err) {
            let delay = self.redelivery.backoff_duration(attempt - 1);
            warn!(
                "Subject '{}' failed on attempt {}, redelivering in {:?}: {}",
                subject, attempt, delay, err
            );
            if let Err(e) = self.pipeline.queue.retry(delivery, delay).await {
                error!("Failed to schedule redelivery of {}: {}", subject, e);
            }
            self.pipeline.metrics.redeliveries_total.inc();
            return DeliveryReport {
                subject,
                attempt,
                state: SubjectState::Retrying,
                summary: None,
                error: Some(err),
            };
        }

        let final_error = if err.should_retry() {
            WarmError::QueueRedeliveryExhausted {
                attempts: attempt,
                last_error: err.to_string(),
            }
        } else {
            err
        };

        let record = DeadLetterRecord {
            message: delivery.message.clone(),
            attempts: attempt,
            last_error: final_error.to_string(),
            failed_at: Utc::now(),
        };

        match self.pipeline.dead_letters.send(record).await {
            Ok(()) => {
                if let Err(e) = self.pipeline.queue.ack(&delivery).await {
                    warn!("Failed to ack dead-lettered {}: {}", subject, e);
                }
                self.pipeline.metrics.dead_lettered_total.inc();
                error!(
                    "Subject '{}' dead-lettered after {} attempts: {}",
                    subject, attempt, final_error
                );
                DeliveryReport {
                    subject,
                    attempt,
                    state: SubjectState::DeadLettered,
                    summary: None,
                    error: Some(final_error),
                }
            }
            Err(e) => {
                // Keep the message rather than lose it
                error!("Dead-letter write failed for {}: {}", subject, e);
                let delay = self.redelivery.backoff_duration(attempt.saturating_sub(1));
                if let Err(e) = self.pipeline.queue.retry(delivery, delay).await {
                    error!("Failed to requeue {} after dead-letter failure: {}", subject, e);
                }
                DeliveryReport {
                    subject,
                    attempt,
                    state: SubjectState::Retrying,
                    summary: None,
                    error: Some(final_error),
                }
            }
        }
    }

    fn count_tier_failures(&self, report: &SetReport, summary: &mut SubjectSummary) {
        for failure in &report.failures {
            summary.tier_write_failures += 1;
            if let WarmError::TierWrite { tier, .. } = failure {
                self.pipeline.metrics.record_tier_failure(*tier);
            }
        }
    }

    /// Warm a single subject without touching the queue
    pub async fn process_subject(&self, subject: &str, job_id: &str) -> SubjectOutcome {
        let subject = subject.trim();
        if subject.is_empty() {
            return SubjectOutcome::Failed(WarmError::PermanentFetch("empty subject".to_string()));
        }

        match self.pipeline.ledger.is_processed(subject).await {
            Ok(true) => {
                info!("Subject '{}' already warmed inside the retention window", subject);
                return SubjectOutcome::Skipped;
            }
            Ok(false) => {}
            Err(e) => warn!("Ledger lookup failed for '{}', warming anyway: {}", subject, e),
        }

        let client = &self.pipeline.client;
        let store = &self.pipeline.store;

        let author = match client.search_author(subject).await {
            Ok(author) => author,
            Err(e) => {
                warn!("Author search failed for '{}': {}", subject, e);
                return SubjectOutcome::Failed(e);
            }
        };

        let mut summary = SubjectSummary::new(subject, job_id, author.bibliography.works_count());
        let report = store.set(&author.key, author.payload.clone(), self.write_policy).await;
        self.count_tier_failures(&report, &mut summary);

        let titles = author
            .bibliography
            .distinct_titles(self.settings.max_titles_per_subject);
        let delay = self.settings.inter_title_delay();

        for (idx, title) in titles.iter().enumerate() {
            if idx > 0 && !delay.is_zero() {
                sleep(delay).await;
            }

            match client.search_title(title).await {
                Ok(result) => {
                    let report = store.set(&result.key, result.payload, self.write_policy).await;
                    self.count_tier_failures(&report, &mut summary);
                    if report.any_written() {
                        summary.titles_warmed += 1;
                    } else {
                        warn!("No tier accepted title '{}' of '{}'", title, subject);
                        summary.titles_skipped += 1;
                    }
                }
                Err(e) => {
                    warn!("Skipping title '{}' of '{}': {}", title, subject, e);
                    summary.titles_skipped += 1;
                }
            }
        }

        if let Err(e) = self.pipeline.ledger.mark_processed(subject, &summary).await {
            warn!("Failed to mark '{}' processed, it will be warmed again: {}", subject, e);
        }

        self.pipeline.metrics.record_summary(&summary);
        info!(
            target: "warming::summary",
            subject = %summary.subject,
            job_id = %summary.job_id,
            works_found = summary.works_count,
            titles_warmed = summary.titles_warmed,
            titles_skipped = summary.titles_skipped,
            tier_write_failures = summary.tier_write_failures,
            "subject warmed"
        );

        if summary.titles_skipped == 0 {
            SubjectOutcome::Completed(summary)
        } else {
            SubjectOutcome::PartiallyCompleted(summary)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delivery_report(state: SubjectState, warmed: usize) -> DeliveryReport {
        DeliveryReport {
            subject: "s".into(),
            attempt: 1,
            state,
            summary: Some(SubjectSummary {
                titles_warmed: warmed,
                ..Default::default()
            }),
            error: None,
        }
    }

    #[test]
    fn test_run_report_tallies_states() {
        let mut report = RunReport::default();
        report.record(&delivery_report(SubjectState::Completed, 3));
        report.record(&delivery_report(SubjectState::PartiallyCompleted, 2));
        report.record(&delivery_report(SubjectState::Queued, 0));
        report.record(&delivery_report(SubjectState::DeadLettered, 0));

        assert_eq!(report.completed, 1);
        assert_eq!(report.partially_completed, 1);
        assert_eq!(report.released, 1);
        assert_eq!(report.dead_lettered, 1);
        assert_eq!(report.titles_warmed, 5);

        let mut total = RunReport::default();
        total.merge(&report);
        total.merge(&report);
        assert_eq!(total.completed, 2);
        assert_eq!(total.titles_warmed, 10);
    }
}
