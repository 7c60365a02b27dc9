use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use sha2::{Digest, Sha256};

/// A single job posting as produced by a source adapter.
///
/// The core stores and moves these around but never looks inside them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostingRecord {
    /// Source name (e.g. "indeed")
    #[serde(alias = "site")]
    pub source: String,
    /// Provider-side identifier
    pub id: String,
    pub title: String,
    pub company: String,
    pub description: String,
    pub url: String,
    #[serde(alias = "scraped_date", deserialize_with = "deserialize_timestamp")]
    pub fetched_at: DateTime<Utc>,
}

/// One unit of work for the orchestrator: a single source query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTask {
    pub source_name: String,
    pub query: String,
    pub location: String,
    pub requested_count: usize,
}

impl FetchTask {
    pub fn new(
        source_name: impl Into<String>,
        query: impl Into<String>,
        location: impl Into<String>,
        requested_count: usize,
    ) -> Self {
        Self {
            source_name: source_name.into(),
            query: query.into(),
            location: location.into(),
            requested_count,
        }
    }
}

/// Lifecycle of a single source within one orchestrator run.
///
/// ```text
/// PENDING -> CACHE_CHECK -> CACHE_HIT (done)
///                        -> CACHE_MISS -> FETCHING -> SUCCEEDED (cache write)
///                                                 -> FAILED
/// ```
///
/// `Unsupported` and `Skipped` are terminal states for sources that never
/// reached the worker pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceState {
    Pending,
    CacheCheck,
    CacheHit,
    CacheMiss,
    Fetching,
    Succeeded,
    Failed,
    Unsupported,
    Skipped,
}

impl SourceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceState::Pending => "pending",
            SourceState::CacheCheck => "cache_check",
            SourceState::CacheHit => "cache_hit",
            SourceState::CacheMiss => "cache_miss",
            SourceState::Fetching => "fetching",
            SourceState::Succeeded => "succeeded",
            SourceState::Failed => "failed",
            SourceState::Unsupported => "unsupported",
            SourceState::Skipped => "skipped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SourceState::CacheHit
                | SourceState::Succeeded
                | SourceState::Failed
                | SourceState::Unsupported
                | SourceState::Skipped
        )
    }

    /// True for terminal states that produced usable data.
    pub fn is_success(&self) -> bool {
        matches!(self, SourceState::CacheHit | SourceState::Succeeded)
    }
}

impl fmt::Display for SourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of one [`FetchTask`], produced by exactly one worker.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub source_name: String,
    pub records: Vec<PostingRecord>,
    pub state: SourceState,
    pub error: Option<String>,
}

impl FetchResult {
    pub fn cache_hit(source_name: impl Into<String>, records: Vec<PostingRecord>) -> Self {
        Self {
            source_name: source_name.into(),
            records,
            state: SourceState::CacheHit,
            error: None,
        }
    }

    pub fn succeeded(source_name: impl Into<String>, records: Vec<PostingRecord>) -> Self {
        Self {
            source_name: source_name.into(),
            records,
            state: SourceState::Succeeded,
            error: None,
        }
    }

    pub fn failed(source_name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            source_name: source_name.into(),
            records: Vec::new(),
            state: SourceState::Failed,
            error: Some(error.into()),
        }
    }

    pub fn unsupported(source_name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            source_name: source_name.into(),
            records: Vec::new(),
            state: SourceState::Unsupported,
            error: Some(error.into()),
        }
    }

    pub fn skipped(source_name: impl Into<String>) -> Self {
        Self {
            source_name: source_name.into(),
            records: Vec::new(),
            state: SourceState::Skipped,
            error: None,
        }
    }
}

/// Terminal state and error text for one source in a report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceOutcome {
    pub state: SourceState,
    pub count: usize,
    pub error: Option<String>,
}

/// Merged result of an orchestrator run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AggregateReport {
    /// All records, in task completion order.
    pub records: Vec<PostingRecord>,
    pub total_records: usize,
    pub per_source_counts: BTreeMap<String, usize>,
    pub outcomes: BTreeMap<String, SourceOutcome>,
    pub elapsed: Duration,
}

impl AggregateReport {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.total_records == 0
    }

    /// True when sources were requested and none of them produced data.
    ///
    /// This is distinct from "zero postings matched", where at least one
    /// source answered successfully with an empty list.
    pub fn all_failed(&self) -> bool {
        !self.outcomes.is_empty() && !self.outcomes.values().any(|o| o.state.is_success())
    }

    /// Sources that ended in `Failed` or `Unsupported`, with their error text.
    pub fn failed_sources(&self) -> Vec<(&str, Option<&str>)> {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o.state, SourceState::Failed | SourceState::Unsupported))
            .map(|(name, o)| (name.as_str(), o.error.as_deref()))
            .collect()
    }
}

/// Accumulates [`FetchResult`]s in whatever order they complete.
#[derive(Debug, Default)]
pub struct ReportBuilder {
    report: AggregateReport,
}

impl ReportBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, result: FetchResult) {
        let count = result.records.len();
        self.report.total_records += count;
        *self
            .report
            .per_source_counts
            .entry(result.source_name.clone())
            .or_insert(0) += count;
        self.report.outcomes.insert(
            result.source_name,
            SourceOutcome {
                state: result.state,
                count,
                error: result.error,
            },
        );
        self.report.records.extend(result.records);
    }

    pub fn finish(mut self, elapsed: Duration) -> AggregateReport {
        self.report.elapsed = elapsed;
        self.report
    }
}

const NAIVE_TIMESTAMP_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Parse a stored timestamp.
///
/// RFC 3339 is what this crate writes. Timestamps without an offset, as
/// found in older cache files, are read as local time.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    let naive = NAIVE_TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())?;
    Some(match Local.from_local_datetime(&naive).earliest() {
        Some(local) => local.with_timezone(&Utc),
        None => naive.and_utc(),
    })
}

pub(crate) fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {raw:?}")))
}

/// Compute a SHA-256 hash of a string, returned as 64-char hex.
pub fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}
