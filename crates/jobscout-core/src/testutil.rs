//! Test utilities: mock implementations of the core traits.
//!
//! Handwritten mocks for dependency injection in unit and integration tests.
//! All mocks use `Arc<Mutex<_>>` for interior mutability, allowing
//! test assertions on recorded calls.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, TimeZone, Utc};

use crate::cache::{PostingCache, cache_key};
use crate::clock::Clock;
use crate::error::AppError;
use crate::models::PostingRecord;
use crate::orchestrator::{ProgressReporter, RunEvent};
use crate::retry::Sleeper;
use crate::traits::{JobSource, SourceFactory, SourceKind};

/// Build `n` distinct records for `source`.
pub fn make_test_records(source: &str, n: usize) -> Vec<PostingRecord> {
    let fetched_at = Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap();
    (0..n)
        .map(|i| PostingRecord {
            source: source.to_string(),
            id: format!("{source}-{i}"),
            title: format!("Rust Engineer {i}"),
            company: "Acme".to_string(),
            description: format!("Build things in Rust ({i})"),
            url: format!("https://example.com/{source}/{i}"),
            fetched_at,
        })
        .collect()
}

// ---------------------------------------------------------------------------
// ManualClock
// ---------------------------------------------------------------------------

/// Clock that only moves when told to.
#[derive(Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::at(Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap())
    }

    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(now)),
        }
    }

    pub fn advance(&self, by: TimeDelta) {
        let mut now = self.now.lock().unwrap();
        *now += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

// ---------------------------------------------------------------------------
// RecordingSleeper
// ---------------------------------------------------------------------------

/// Sleeper that records requested durations and returns immediately.
#[derive(Clone, Default)]
pub struct RecordingSleeper {
    sleeps: Arc<Mutex<Vec<Duration>>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
        tokio::task::yield_now().await;
    }
}

// ---------------------------------------------------------------------------
// MockSourceFactory / MockSource
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Script {
    /// Errors returned by the first fetches, in order.
    errors: Vec<AppError>,
    /// Records returned once `errors` is exhausted.
    records: Vec<PostingRecord>,
    setup_error: Option<AppError>,
    /// Every fetch panics.
    panic: bool,
}

#[derive(Default)]
struct Counters {
    created: AtomicUsize,
    closed: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

/// Factory whose adapters follow a per-source script.
///
/// Unscripted sources succeed with zero records.
#[derive(Clone, Default)]
pub struct MockSourceFactory {
    scripts: Arc<Mutex<HashMap<SourceKind, Script>>>,
    fetches: Arc<Mutex<HashMap<SourceKind, usize>>>,
    counters: Arc<Counters>,
    delay: Option<Duration>,
}

impl MockSourceFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Successful fetches for `kind` return `n` records.
    pub fn with_records(self, kind: SourceKind, n: usize) -> Self {
        self.scripts.lock().unwrap().entry(kind).or_default().records =
            make_test_records(kind.as_str(), n);
        self
    }

    /// The first fetches for `kind` fail with these errors, in order.
    pub fn with_errors(self, kind: SourceKind, errors: Vec<AppError>) -> Self {
        self.scripts.lock().unwrap().entry(kind).or_default().errors = errors;
        self
    }

    /// `create(kind)` fails with `error` (once).
    pub fn with_setup_error(self, kind: SourceKind, error: AppError) -> Self {
        self.scripts.lock().unwrap().entry(kind).or_default().setup_error = Some(error);
        self
    }

    /// Every fetch for `kind` panics.
    pub fn with_panic(self, kind: SourceKind) -> Self {
        self.scripts.lock().unwrap().entry(kind).or_default().panic = true;
        self
    }

    /// Every fetch takes this long (on the tokio clock).
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn created(&self) -> usize {
        self.counters.created.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.counters.closed.load(Ordering::SeqCst)
    }

    /// Highest number of fetches observed in flight at once.
    pub fn max_active(&self) -> usize {
        self.counters.max_active.load(Ordering::SeqCst)
    }

    pub fn fetches(&self, kind: SourceKind) -> usize {
        self.fetches.lock().unwrap().get(&kind).copied().unwrap_or(0)
    }

    pub fn total_fetches(&self) -> usize {
        self.fetches.lock().unwrap().values().sum()
    }
}

impl SourceFactory for MockSourceFactory {
    type Source = MockSource;

    async fn create(&self, kind: SourceKind) -> Result<MockSource, AppError> {
        let setup_error = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&kind)
            .and_then(|s| s.setup_error.take());
        if let Some(e) = setup_error {
            return Err(e);
        }
        self.counters.created.fetch_add(1, Ordering::SeqCst);
        Ok(MockSource {
            kind,
            factory: self.clone(),
        })
    }
}

/// Adapter created by [`MockSourceFactory`].
pub struct MockSource {
    kind: SourceKind,
    factory: MockSourceFactory,
}

impl MockSource {
    fn next_response(&self) -> Result<Vec<PostingRecord>, AppError> {
        let mut scripts = self.factory.scripts.lock().unwrap();
        let script = scripts.entry(self.kind).or_default();
        if script.errors.is_empty() {
            Ok(script.records.clone())
        } else {
            Err(script.errors.remove(0))
        }
    }
}

impl JobSource for MockSource {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    async fn fetch(
        &self,
        _query: &str,
        _location: &str,
        count: usize,
    ) -> Result<Vec<PostingRecord>, AppError> {
        *self
            .factory
            .fetches
            .lock()
            .unwrap()
            .entry(self.kind)
            .or_insert(0) += 1;

        let panics = self
            .factory
            .scripts
            .lock()
            .unwrap()
            .get(&self.kind)
            .is_some_and(|s| s.panic);
        if panics {
            panic!("scripted panic in {} fetch", self.kind);
        }

        let counters = &self.factory.counters;
        let active = counters.active.fetch_add(1, Ordering::SeqCst) + 1;
        counters.max_active.fetch_max(active, Ordering::SeqCst);
        if let Some(delay) = self.factory.delay {
            tokio::time::sleep(delay).await;
        } else {
            tokio::task::yield_now().await;
        }
        counters.active.fetch_sub(1, Ordering::SeqCst);

        let mut records = self.next_response()?;
        records.truncate(count);
        Ok(records)
    }

    async fn close(self) {
        self.factory.counters.closed.fetch_add(1, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// MemoryCache
// ---------------------------------------------------------------------------

/// In-memory cache keyed the same way as the file cache. Never expires.
#[derive(Clone, Default)]
pub struct MemoryCache {
    entries: Arc<Mutex<HashMap<String, (String, Vec<PostingRecord>)>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `n` test records for the request.
    pub async fn seed(&self, source: &str, query: &str, location: &str, n: usize) {
        self.store(source, query, location, &make_test_records(source, n))
            .await;
    }

    pub fn get(&self, source: &str, query: &str, location: &str) -> Option<Vec<PostingRecord>> {
        self.entries
            .lock()
            .unwrap()
            .get(&cache_key(source, query, location))
            .map(|(_, records)| records.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PostingCache for MemoryCache {
    async fn lookup(
        &self,
        source: &str,
        query: &str,
        location: &str,
    ) -> Option<Vec<PostingRecord>> {
        self.get(source, query, location)
    }

    async fn store(&self, source: &str, query: &str, location: &str, records: &[PostingRecord]) {
        self.entries.lock().unwrap().insert(
            cache_key(source, query, location),
            (source.to_lowercase(), records.to_vec()),
        );
    }

    async fn clear(&self, source: Option<&str>) -> usize {
        let mut entries = self.entries.lock().unwrap();
        let before = entries.len();
        match source {
            Some(source) => {
                let source = source.trim().to_lowercase();
                entries.retain(|_, (stored, _)| *stored != source);
            }
            None => entries.clear(),
        }
        before - entries.len()
    }
}

// ---------------------------------------------------------------------------
// MockReporter
// ---------------------------------------------------------------------------

/// Records the name of every event it receives.
#[derive(Clone, Default)]
pub struct MockReporter {
    pub events: Arc<Mutex<Vec<String>>>,
}

impl MockReporter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProgressReporter for MockReporter {
    fn report(&self, event: RunEvent<'_>) {
        let name = match event {
            RunEvent::RunStarted { .. } => "RunStarted",
            RunEvent::SourceCompleted { .. } => "SourceCompleted",
            RunEvent::RunFinished { .. } => "RunFinished",
        };
        self.events.lock().unwrap().push(name.to_string());
    }
}
