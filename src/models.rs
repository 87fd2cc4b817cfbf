//! Core data models for the cache-warming pipeline

use crate::cache_key::normalize_text;
use crate::error::WarmError;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Which search path a query belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchKind {
    Author,
    Title,
}

impl SearchKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchKind::Author => "author",
            SearchKind::Title => "title",
        }
    }
}

impl fmt::Display for SearchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single search parameter value
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Text(String),
    Int(i64),
    UInt(u64),
    Float(f64),
    Bool(bool),
}

impl ParamValue {
    /// Canonical textual form used in cache keys and provider query strings
    ///
    /// Text is lower-cased and trimmed. Numbers render in plain decimal with
    /// no leading zeros, and floats with an integral value drop the `.0`.
    pub fn canonical(&self) -> String {
        match self {
            ParamValue::Text(s) => normalize_text(s),
            ParamValue::Int(n) => n.to_string(),
            ParamValue::UInt(n) => n.to_string(),
            ParamValue::Float(f) => canonical_float(*f),
            ParamValue::Bool(b) => b.to_string(),
        }
    }
}

fn canonical_float(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e15 {
        // -0.0 and 0.0 are the same query
        format!("{}", value as i64)
    } else {
        // Shortest round-trip form
        format!("{}", value).to_lowercase()
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Text(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        ParamValue::Text(value)
    }
}

impl From<&String> for ParamValue {
    fn from(value: &String) -> Self {
        ParamValue::Text(value.clone())
    }
}

impl From<i32> for ParamValue {
    fn from(value: i32) -> Self {
        ParamValue::Int(value as i64)
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        ParamValue::Int(value)
    }
}

impl From<u32> for ParamValue {
    fn from(value: u32) -> Self {
        ParamValue::UInt(value as u64)
    }
}

impl From<u64> for ParamValue {
    fn from(value: u64) -> Self {
        ParamValue::UInt(value)
    }
}

impl From<usize> for ParamValue {
    fn from(value: usize) -> Self {
        ParamValue::UInt(value as u64)
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        ParamValue::Float(value)
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        ParamValue::Bool(value)
    }
}

/// A normalized search query
///
/// Parameter names are lower-cased and trimmed on insertion and kept in a
/// sorted map, so two queries built from the same logical parameters in
/// any order or casing compare equal. Builder methods consume `self`;
/// there is no way to mutate a query after it has been built.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery {
    kind: SearchKind,
    params: BTreeMap<String, String>,
}

impl SearchQuery {
    pub fn new(kind: SearchKind) -> Self {
        SearchQuery {
            kind,
            params: BTreeMap::new(),
        }
    }

    /// Add a parameter. A later value for the same normalized name wins.
    pub fn with_param(mut self, name: &str, value: impl Into<ParamValue>) -> Self {
        self.params
            .insert(normalize_text(name), value.into().canonical());
        self
    }

    /// Add a parameter only when it has a value; absent values are omitted
    /// entirely rather than encoded as empty.
    pub fn with_optional<V: Into<ParamValue>>(self, name: &str, value: Option<V>) -> Self {
        match value {
            Some(v) => self.with_param(name, v),
            None => self,
        }
    }

    /// Build a query from an arbitrary name/value mapping
    pub fn from_params<I, K, V>(kind: SearchKind, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<ParamValue>,
    {
        params
            .into_iter()
            .fold(SearchQuery::new(kind), |q, (k, v)| q.with_param(k.as_ref(), v))
    }

    pub fn kind(&self) -> SearchKind {
        self.kind
    }

    /// Normalized parameters in sorted order
    pub fn params(&self) -> impl Iterator<Item = (&str, &str)> {
        self.params.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.params.get(&normalize_text(name)).map(|v| v.as_str())
    }
}

/// One of the cache storage layers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CacheTier {
    Edge,
    KeyValue,
    ColdIndex,
}

impl CacheTier {
    /// All tiers, fastest first
    pub const ALL: [CacheTier; 3] = [CacheTier::Edge, CacheTier::KeyValue, CacheTier::ColdIndex];

    pub fn as_str(&self) -> &'static str {
        match self {
            CacheTier::Edge => "edge",
            CacheTier::KeyValue => "key-value",
            CacheTier::ColdIndex => "cold-index",
        }
    }
}

impl fmt::Display for CacheTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which tiers a write should reach
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierPolicy {
    #[serde(default = "default_true")]
    pub edge: bool,
    #[serde(default = "default_true")]
    pub kv: bool,
    #[serde(default = "default_true")]
    pub cold: bool,
}

fn default_true() -> bool {
    true
}

impl TierPolicy {
    pub fn all() -> Self {
        TierPolicy {
            edge: true,
            kv: true,
            cold: true,
        }
    }

    /// Edge and key-value only
    pub fn fast_only() -> Self {
        TierPolicy {
            edge: true,
            kv: true,
            cold: false,
        }
    }

    pub fn includes(&self, tier: CacheTier) -> bool {
        match tier {
            CacheTier::Edge => self.edge,
            CacheTier::KeyValue => self.kv,
            CacheTier::ColdIndex => self.cold,
        }
    }

    pub fn tiers(&self) -> Vec<CacheTier> {
        CacheTier::ALL
            .iter()
            .copied()
            .filter(|t| self.includes(*t))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        !(self.edge || self.kv || self.cold)
    }
}

impl Default for TierPolicy {
    fn default() -> Self {
        Self::all()
    }
}

/// A cached payload as held by one tier
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub key: String,
    pub payload: Bytes,
    pub created_at: SystemTime,
    pub ttl: Duration,
}

impl CacheEntry {
    pub fn new(key: impl Into<String>, payload: Bytes, ttl: Duration) -> Self {
        CacheEntry {
            key: key.into(),
            payload,
            created_at: SystemTime::now(),
            ttl,
        }
    }

    pub fn expires_at(&self) -> SystemTime {
        self.created_at + self.ttl
    }

    pub fn is_expired(&self, now: SystemTime) -> bool {
        self.expires_at() <= now
    }
}

/// Durable pointer from a cache key to a payload object in cold storage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColdIndexEntry {
    pub key: String,
    /// Object path relative to the cold storage root
    pub object_path: String,
    /// Uncompressed payload size
    pub size: u64,
    /// crc32 of the uncompressed payload
    pub checksum: u32,
    pub created_at_secs: u64,
    pub expires_at_secs: u64,
}

impl ColdIndexEntry {
    pub fn is_expired(&self, now: SystemTime) -> bool {
        let now_secs = now
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        self.expires_at_secs <= now_secs
    }

    pub fn created_at(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(self.created_at_secs)
    }

    /// Remaining lifetime, zero once expired
    pub fn remaining_ttl(&self, now: SystemTime) -> Duration {
        let expires_at = UNIX_EPOCH + Duration::from_secs(self.expires_at_secs);
        expires_at.duration_since(now).unwrap_or_default()
    }
}

/// Inbound queue message produced by the job orchestrator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WarmingMessage {
    pub subject: String,
    pub source: String,
    pub queued_at: DateTime<Utc>,
    pub job_id: String,
}

impl WarmingMessage {
    pub fn new(subject: impl Into<String>, source: impl Into<String>, job_id: impl Into<String>) -> Self {
        WarmingMessage {
            subject: subject.into(),
            source: source.into(),
            queued_at: Utc::now(),
            job_id: job_id.into(),
        }
    }
}

/// A warming message that exhausted its retries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterRecord {
    #[serde(flatten)]
    pub message: WarmingMessage,
    pub attempts: u32,
    pub last_error: String,
    pub failed_at: DateTime<Utc>,
}

/// Ledger value recorded after a subject finished warming
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedMarker {
    pub works_count: usize,
    pub titles_warmed: usize,
    #[serde(default)]
    pub titles_skipped: usize,
    pub last_warmed_at: DateTime<Utc>,
    pub job_id: String,
}

/// Per-subject counters reported once a subject reaches a terminal state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectSummary {
    pub subject: String,
    pub job_id: String,
    pub works_count: usize,
    pub titles_warmed: usize,
    pub titles_skipped: usize,
    pub tier_write_failures: usize,
}

impl SubjectSummary {
    pub fn new(subject: impl Into<String>, job_id: impl Into<String>, works_count: usize) -> Self {
        SubjectSummary {
            subject: subject.into(),
            job_id: job_id.into(),
            works_count,
            ..Default::default()
        }
    }

    pub fn to_marker(&self, at: DateTime<Utc>) -> ProcessedMarker {
        ProcessedMarker {
            works_count: self.works_count,
            titles_warmed: self.titles_warmed,
            titles_skipped: self.titles_skipped,
            last_warmed_at: at,
            job_id: self.job_id.clone(),
        }
    }
}

/// Lifecycle of a subject inside the warming consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubjectState {
    Queued,
    Processing,
    Completed,
    PartiallyCompleted,
    Skipped,
    Failed,
    Retrying,
    DeadLettered,
}

impl SubjectState {
    /// Whether the subject is done for good. `Retrying` hands the subject
    /// back to the queue, so the current delivery is finished but the
    /// subject is not.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SubjectState::Completed
                | SubjectState::PartiallyCompleted
                | SubjectState::Skipped
                | SubjectState::DeadLettered
        )
    }
}

/// Result of processing one subject
#[derive(Debug, Clone, PartialEq)]
pub enum SubjectOutcome {
    /// Every enumerated title was warmed
    Completed(SubjectSummary),
    /// Finished, but some titles were skipped
    PartiallyCompleted(SubjectSummary),
    /// Already warmed inside the retention window
    Skipped,
    /// The author fetch failed; nothing was marked
    Failed(WarmError),
}

impl SubjectOutcome {
    pub fn state(&self) -> SubjectState {
        match self {
            SubjectOutcome::Completed(_) => SubjectState::Completed,
            SubjectOutcome::PartiallyCompleted(_) => SubjectState::PartiallyCompleted,
            SubjectOutcome::Skipped => SubjectState::Skipped,
            SubjectOutcome::Failed(_) => SubjectState::Failed,
        }
    }

    pub fn summary(&self) -> Option<&SubjectSummary> {
        match self {
            SubjectOutcome::Completed(s) | SubjectOutcome::PartiallyCompleted(s) => Some(s),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SubjectOutcome::Completed(_) => "completed",
            SubjectOutcome::PartiallyCompleted(_) => "partially_completed",
            SubjectOutcome::Skipped => "skipped",
            SubjectOutcome::Failed(_) => "failed",
        }
    }
}

/// A work listed in an author's bibliography
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Work {
    pub title: String,
}

/// Author-search response body
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Bibliography {
    #[serde(default, alias = "docs", alias = "items")]
    pub works: Vec<Work>,
}

impl Bibliography {
    pub fn works_count(&self) -> usize {
        self.works.len()
    }

    /// Titles to warm, in bibliography order, blank and duplicate titles
    /// removed, capped at `limit`
    pub fn distinct_titles(&self, limit: usize) -> Vec<String> {
        let mut seen = HashSet::new();
        self.works
            .iter()
            .map(|w| w.title.trim())
            .filter(|t| !t.is_empty())
            .filter(|t| seen.insert(normalize_text(t)))
            .take(limit)
            .map(str::to_string)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_param_canonical_numbers() {
        assert_eq!(ParamValue::from(100u32).canonical(), "100");
        assert_eq!(ParamValue::from(-7i64).canonical(), "-7");
        assert_eq!(ParamValue::from(20.0f64).canonical(), "20");
        assert_eq!(ParamValue::from(-0.0f64).canonical(), "0");
        assert_eq!(ParamValue::from(2.5f64).canonical(), "2.5");
        assert_eq!(ParamValue::from("  Neil GAIMAN ").canonical(), "neil gaiman");
    }

    #[test]
    fn test_query_order_and_case_insensitive() {
        let a = SearchQuery::new(SearchKind::Author)
            .with_param("Name", "Neil Gaiman")
            .with_param("LIMIT", 100u32);
        let b = SearchQuery::new(SearchKind::Author)
            .with_param("limit", 100u32)
            .with_param("name", "neil gaiman  ");
        assert_eq!(a, b);
        assert_eq!(a.get("NAME"), Some("neil gaiman"));
    }

    #[test]
    fn test_optional_param_omitted() {
        let q = SearchQuery::new(SearchKind::Title)
            .with_param("title", "Coraline")
            .with_optional::<u32>("offset", None);
        assert_eq!(q.params().count(), 1);
        assert_eq!(q.get("offset"), None);
    }

    #[test]
    fn test_tier_policy() {
        assert_eq!(TierPolicy::all().tiers(), CacheTier::ALL.to_vec());
        assert_eq!(
            TierPolicy::fast_only().tiers(),
            vec![CacheTier::Edge, CacheTier::KeyValue]
        );
        let none = TierPolicy {
            edge: false,
            kv: false,
            cold: false,
        };
        assert!(none.is_empty());
    }

    #[test]
    fn test_distinct_titles() {
        let bib = Bibliography {
            works: vec![
                Work { title: "Coraline".into() },
                Work { title: "  coraline ".into() },
                Work { title: "".into() },
                Work { title: "Stardust".into() },
                Work { title: "Neverwhere".into() },
            ],
        };
        assert_eq!(bib.works_count(), 5);
        assert_eq!(bib.distinct_titles(10), vec!["Coraline", "Stardust", "Neverwhere"]);
        assert_eq!(bib.distinct_titles(2), vec!["Coraline", "Stardust"]);
    }

    #[test]
    fn test_bibliography_aliases() {
        let bib: Bibliography =
            serde_json::from_str(r#"{"docs":[{"title":"American Gods","year":2001}]}"#).unwrap();
        assert_eq!(bib.works[0].title, "American Gods");
    }

    #[test]
    fn test_dead_letter_wire_format() {
        let record = DeadLetterRecord {
            message: WarmingMessage::new("Neil Gaiman", "csv", "job-1"),
            attempts: 3,
            last_error: "boom".into(),
            failed_at: Utc::now(),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["subject"], "Neil Gaiman");
        assert_eq!(json["jobId"], "job-1");
        assert_eq!(json["attempts"], 3);
        assert!(json.get("queuedAt").is_some());
        assert!(json.get("failedAt").is_some());
        assert!(json.get("lastError").is_some());
    }

    #[test]
    fn test_subject_states() {
        assert!(SubjectState::PartiallyCompleted.is_terminal());
        assert!(SubjectState::DeadLettered.is_terminal());
        assert!(!SubjectState::Retrying.is_terminal());
        assert!(!SubjectState::Failed.is_terminal());
    }
}
