//! Prometheus metrics for the warming pipeline

use crate::models::{CacheTier, SubjectOutcome, SubjectSummary};
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

/// Counters for warming activity, registered in a registry this value owns
#[derive(Clone)]
pub struct WarmingMetrics {
    registry: Registry,

    /// Subjects by outcome: completed, partially_completed, skipped, failed
    pub subjects_total: IntCounterVec,

    pub works_found_total: IntCounter,
    pub titles_warmed_total: IntCounter,
    pub titles_skipped_total: IntCounter,

    /// Tier write failures by tier
    pub tier_write_failures_total: IntCounterVec,

    /// Throttled provider responses (HTTP 429)
    pub fetch_throttled_total: IntCounter,

    pub redeliveries_total: IntCounter,
    pub dead_lettered_total: IntCounter,
}

impl WarmingMetrics {
    /// Create metrics in a fresh registry
    pub fn new() -> Result<Self, prometheus::Error> {
        Self::with_registry(Registry::new())
    }

    /// Create metrics registered in `registry`
    pub fn with_registry(registry: Registry) -> Result<Self, prometheus::Error> {
        let subjects_total = IntCounterVec::new(
            Opts::new("warming_subjects_total", "Subjects processed by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(subjects_total.clone()))?;

        let works_found_total = IntCounter::new(
            "warming_works_found_total",
            "Works found in author bibliographies",
        )?;
        registry.register(Box::new(works_found_total.clone()))?;

        let titles_warmed_total =
            IntCounter::new("warming_titles_warmed_total", "Title searches cached")?;
        registry.register(Box::new(titles_warmed_total.clone()))?;

        let titles_skipped_total = IntCounter::new(
            "warming_titles_skipped_total",
            "Titles skipped after a fetch or write failure",
        )?;
        registry.register(Box::new(titles_skipped_total.clone()))?;

        let tier_write_failures_total = IntCounterVec::new(
            Opts::new(
                "warming_tier_write_failures_total",
                "Cache tier writes that failed during warming",
            ),
            &["tier"],
        )?;
        registry.register(Box::new(tier_write_failures_total.clone()))?;

        let fetch_throttled_total = IntCounter::new(
            "warming_fetch_throttled_total",
            "Provider responses that asked the warmer to slow down",
        )?;
        registry.register(Box::new(fetch_throttled_total.clone()))?;

        let redeliveries_total = IntCounter::new(
            "warming_redeliveries_total",
            "Messages scheduled for redelivery",
        )?;
        registry.register(Box::new(redeliveries_total.clone()))?;

        let dead_lettered_total = IntCounter::new(
            "warming_dead_lettered_total",
            "Messages routed to the dead-letter path",
        )?;
        registry.register(Box::new(dead_lettered_total.clone()))?;

        Ok(WarmingMetrics {
            registry,
            subjects_total,
            works_found_total,
            titles_warmed_total,
            titles_skipped_total,
            tier_write_failures_total,
            fetch_throttled_total,
            redeliveries_total,
            dead_lettered_total,
        })
    }

    pub fn record_outcome(&self, outcome: &SubjectOutcome) {
        self.subjects_total
            .with_label_values(&[outcome.label()])
            .inc();
    }

    /// Per-subject counters, once per finished subject
    pub fn record_summary(&self, summary: &SubjectSummary) {
        self.works_found_total.inc_by(summary.works_count as u64);
        self.titles_warmed_total.inc_by(summary.titles_warmed as u64);
        self.titles_skipped_total.inc_by(summary.titles_skipped as u64);
    }

    pub fn record_tier_failure(&self, tier: CacheTier) {
        self.tier_write_failures_total
            .with_label_values(&[tier.as_str()])
            .inc();
    }

    pub fn subjects(&self, outcome: &str) -> u64 {
        self.subjects_total.with_label_values(&[outcome]).get()
    }

    /// Text exposition of every registered metric
    pub fn render(&self) -> String {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if encoder.encode(&self.registry.gather(), &mut buffer).is_err() {
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_summary() {
        let metrics = WarmingMetrics::new().unwrap();
        let summary = SubjectSummary {
            subject: "Neil Gaiman".into(),
            job_id: "j".into(),
            works_count: 47,
            titles_warmed: 45,
            titles_skipped: 2,
            tier_write_failures: 0,
        };

        metrics.record_summary(&summary);
        metrics.record_outcome(&SubjectOutcome::PartiallyCompleted(summary));
        metrics.record_tier_failure(CacheTier::ColdIndex);

        assert_eq!(metrics.works_found_total.get(), 47);
        assert_eq!(metrics.titles_warmed_total.get(), 45);
        assert_eq!(metrics.titles_skipped_total.get(), 2);
        assert_eq!(metrics.subjects("partially_completed"), 1);

        let text = metrics.render();
        assert!(text.contains("warming_works_found_total 47"));
        assert!(text.contains("tier=\"cold-index\""));
    }

    #[test]
    fn test_independent_registries() {
        // Two instances must not collide on registration
        assert!(WarmingMetrics::new().is_ok());
        assert!(WarmingMetrics::new().is_ok());
    }
}
