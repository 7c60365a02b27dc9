//! Fan-out/fan-in over sources with a bounded worker pool.
//!
//! Each requested source becomes one task. A task checks the cache without
//! holding a pool slot, and only takes a slot (a semaphore permit) when it
//! has to build an adapter and fetch. The aggregating loop is the only place
//! that sees results and the only caller of the [`ProgressReporter`].

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::cache::PostingCache;
use crate::models::{AggregateReport, FetchResult, FetchTask, ReportBuilder, SourceState};
use crate::retry::{RetryConfig, RetryPolicy, Sleeper, TokioSleeper};
use crate::traits::{JobSource, SourceFactory, SourceKind};

/// Default number of sources fetched at the same time.
pub const DEFAULT_MAX_WORKERS: usize = 3;

/// Default number of postings requested per source.
pub const DEFAULT_NUM_JOBS: usize = 10;

/// Configuration for an [`Orchestrator`].
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub max_workers: usize,
    pub retry: RetryConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_workers: DEFAULT_MAX_WORKERS,
            retry: RetryConfig::for_sources(),
        }
    }
}

impl OrchestratorConfig {
    /// Values below 1 are raised to 1.
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers.max(1);
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

/// Events emitted by the orchestrator for monitoring/progress display.
#[derive(Debug, Clone)]
pub enum RunEvent<'a> {
    RunStarted {
        run_id: Uuid,
        sources: &'a [String],
        query: &'a str,
        location: &'a str,
    },
    SourceCompleted {
        result: &'a FetchResult,
        completed: usize,
        total: usize,
    },
    RunFinished {
        run_id: Uuid,
        report: &'a AggregateReport,
    },
}

/// Trait for receiving run events (decoupled progress reporting).
///
/// Only ever called from the aggregating task, never from workers.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: RunEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl ProgressReporter for TracingReporter {
    fn report(&self, event: RunEvent<'_>) {
        match event {
            RunEvent::RunStarted {
                run_id,
                sources,
                query,
                location,
            } => {
                tracing::info!(%run_id, sources = ?sources, %query, %location, "Starting fetch run");
            }
            RunEvent::SourceCompleted {
                result,
                completed,
                total,
            } => match result.state {
                SourceState::Failed | SourceState::Unsupported => {
                    tracing::warn!(
                        source = %result.source_name,
                        state = %result.state,
                        error = result.error.as_deref().unwrap_or(""),
                        progress = %format!("{completed}/{total}"),
                        "Source finished without results"
                    );
                }
                _ => {
                    tracing::info!(
                        source = %result.source_name,
                        state = %result.state,
                        jobs = result.records.len(),
                        progress = %format!("{completed}/{total}"),
                        "Source completed"
                    );
                }
            },
            RunEvent::RunFinished { run_id, report } => {
                tracing::info!(
                    %run_id,
                    total = report.total_records,
                    elapsed_ms = report.elapsed.as_millis() as u64,
                    "Fetch run complete"
                );
            }
        }
    }
}

/// Reporter that discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentReporter;

impl ProgressReporter for SilentReporter {}

/// Dispatches one fetch task per source, consulting the cache first.
pub struct Orchestrator<F, C, S = TokioSleeper>
where
    F: SourceFactory,
    C: PostingCache,
    S: Sleeper,
{
    factory: F,
    cache: C,
    policy: RetryPolicy<S>,
    max_workers: usize,
}

impl<F, C> Orchestrator<F, C, TokioSleeper>
where
    F: SourceFactory,
    C: PostingCache,
{
    pub fn new(factory: F, cache: C, config: OrchestratorConfig) -> Self {
        Self::with_sleeper(factory, cache, config, TokioSleeper)
    }
}

impl<F, C, S> Orchestrator<F, C, S>
where
    F: SourceFactory,
    C: PostingCache,
    S: Sleeper,
{
    pub fn with_sleeper(factory: F, cache: C, config: OrchestratorConfig, sleeper: S) -> Self {
        Self {
            factory,
            cache,
            policy: RetryPolicy::with_sleeper(config.retry, sleeper),
            max_workers: config.max_workers.max(1),
        }
    }

    /// Fetch from every source and merge the results.
    pub async fn run<R: ProgressReporter>(
        &self,
        sources: &[String],
        query: &str,
        location: &str,
        count: usize,
        reporter: &R,
    ) -> AggregateReport {
        self.run_with_cancel(
            sources,
            query,
            location,
            count,
            CancellationToken::new(),
            reporter,
        )
        .await
    }

    /// Like [`Orchestrator::run`], but stops handing out pool slots once
    /// `cancel_token` fires. Sources that have not started fetching by then
    /// are reported as `Skipped`; fetches already in flight are drained.
    pub async fn run_with_cancel<R: ProgressReporter>(
        &self,
        sources: &[String],
        query: &str,
        location: &str,
        count: usize,
        cancel_token: CancellationToken,
        reporter: &R,
    ) -> AggregateReport {
        let start = Instant::now();
        if sources.is_empty() {
            return ReportBuilder::new().finish(start.elapsed());
        }

        let run_id = Uuid::new_v4();
        let names = dedupe_sources(sources);
        let total = names.len();
        reporter.report(RunEvent::RunStarted {
            run_id,
            sources: &names,
            query,
            location,
        });

        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        let mut tasks = JoinSet::new();
        let mut task_sources = HashMap::new();
        let mut builder = ReportBuilder::new();
        let mut completed = 0;

        let mut finish_one = |result: FetchResult, builder: &mut ReportBuilder| {
            completed += 1;
            reporter.report(RunEvent::SourceCompleted {
                result: &result,
                completed,
                total,
            });
            builder.push(result);
        };

        for name in names.iter() {
            if cancel_token.is_cancelled() {
                finish_one(FetchResult::skipped(name.as_str()), &mut builder);
                continue;
            }

            let kind = match name.parse::<SourceKind>() {
                Ok(kind) => kind,
                Err(e) => {
                    finish_one(
                        FetchResult::unsupported(name.as_str(), e.to_string()),
                        &mut builder,
                    );
                    continue;
                }
            };

            let worker = SourceWorker {
                factory: self.factory.clone(),
                cache: self.cache.clone(),
                policy: self.policy.clone(),
                semaphore: Arc::clone(&semaphore),
                cancel_token: cancel_token.clone(),
            };
            let task = FetchTask::new(name.as_str(), query, location, count);
            tracing::debug!(source = %name, state = %SourceState::Pending, "Queued source");
            let handle = tasks.spawn(worker.process(kind, task));
            task_sources.insert(handle.id(), name.clone());
        }

        while let Some(joined) = tasks.join_next_with_id().await {
            let result = match joined {
                Ok((_, result)) => result,
                Err(e) => {
                    let name = task_sources.get(&e.id()).cloned().unwrap_or_default();
                    tracing::error!(source = %name, error = %e, "Source task panicked");
                    FetchResult::failed(name, format!("worker task failed: {e}"))
                }
            };
            finish_one(result, &mut builder);
        }

        let report = builder.finish(start.elapsed());
        reporter.report(RunEvent::RunFinished {
            run_id,
            report: &report,
        });
        report
    }

    /// Remove all cache entries, or only those stored for `source`.
    pub async fn clear_cache(&self, source: Option<&str>) -> usize {
        self.cache.clear(source).await
    }
}

/// Everything a single task needs, owned so the task can be spawned.
struct SourceWorker<F, C, S> {
    factory: F,
    cache: C,
    policy: RetryPolicy<S>,
    semaphore: Arc<Semaphore>,
    cancel_token: CancellationToken,
}

impl<F, C, S> SourceWorker<F, C, S>
where
    F: SourceFactory,
    C: PostingCache,
    S: Sleeper,
{
    async fn process(self, kind: SourceKind, task: FetchTask) -> FetchResult {
        let name = task.source_name.as_str();
        tracing::debug!(source = %name, state = %SourceState::CacheCheck, "Checking cache");

        match self.cache.lookup(name, &task.query, &task.location).await {
            Some(mut records) if !records.is_empty() => {
                records.truncate(task.requested_count);
                tracing::info!(source = %name, jobs = records.len(), "Using cached results");
                return FetchResult::cache_hit(name, records);
            }
            _ => {
                tracing::debug!(source = %name, state = %SourceState::CacheMiss, "Cache miss");
            }
        }

        let _permit = tokio::select! {
            biased;
            () = self.cancel_token.cancelled() => {
                tracing::info!(source = %name, "Run cancelled before fetch started");
                return FetchResult::skipped(name);
            }
            permit = Arc::clone(&self.semaphore).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(e) => return FetchResult::failed(name, format!("worker pool closed: {e}")),
            },
        };

        tracing::debug!(source = %name, state = %SourceState::Fetching, "Creating source adapter");
        let source = match self.factory.create(kind).await {
            Ok(source) => source,
            Err(e) => {
                tracing::error!(source = %name, error = %e, "Failed to set up source");
                return FetchResult::failed(name, e.to_string());
            }
        };

        let started = Instant::now();
        let fetched = AssertUnwindSafe(
            self.policy
                .run(|| source.fetch(&task.query, &task.location, task.requested_count)),
        )
        .catch_unwind()
        .await;
        source.close().await;

        let fetched = match fetched {
            Ok(fetched) => fetched,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::error!(source = %name, panic = %message, "Source fetch panicked");
                return FetchResult::failed(name, format!("source panicked: {message}"));
            }
        };

        match fetched {
            Ok(records) => {
                self.cache
                    .store(name, &task.query, &task.location, &records)
                    .await;
                tracing::info!(
                    source = %name,
                    jobs = records.len(),
                    elapsed_ms = elapsed_ms(started.elapsed()),
                    "Completed fetching"
                );
                let mut records = records;
                records.truncate(task.requested_count);
                FetchResult::succeeded(name, records)
            }
            Err(e) => {
                tracing::error!(source = %name, error = %e, "Error fetching source");
                FetchResult::failed(name, e.to_string())
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        *message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic"
    }
}

fn elapsed_ms(elapsed: Duration) -> u64 {
    elapsed.as_millis() as u64
}

/// Normalize names (trim + lowercase) and drop repeats, keeping first-seen order.
fn dedupe_sources(sources: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    sources
        .iter()
        .map(|s| s.trim().to_lowercase())
        .filter(|s| seen.insert(s.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::NullCache;
    use crate::error::AppError;
    use crate::testutil::{MemoryCache, MockReporter, MockSourceFactory, RecordingSleeper};

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn orchestrator<C: PostingCache>(
        factory: MockSourceFactory,
        cache: C,
        max_workers: usize,
    ) -> Orchestrator<MockSourceFactory, C, RecordingSleeper> {
        Orchestrator::with_sleeper(
            factory,
            cache,
            OrchestratorConfig::default().with_max_workers(max_workers),
            RecordingSleeper::new(),
        )
    }

    #[test]
    fn dedupe_keeps_first_seen_order() {
        assert_eq!(
            dedupe_sources(&names(&["Indeed", "linkedin", "indeed ", "LINKEDIN"])),
            names(&["indeed", "linkedin"])
        );
    }

    #[test]
    fn max_workers_has_a_floor_of_one() {
        let config = OrchestratorConfig::default().with_max_workers(0);
        assert_eq!(config.max_workers, 1);
    }

    #[tokio::test]
    async fn empty_sources_returns_empty_report() {
        let factory = MockSourceFactory::new();
        let orch = orchestrator(factory.clone(), NullCache, 3);
        let reporter = MockReporter::new();

        let report = orch.run(&[], "rust", "berlin", 10, &reporter).await;

        assert_eq!(report.total_records, 0);
        assert!(report.outcomes.is_empty());
        assert_eq!(factory.created(), 0);
        assert!(reporter.events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unsupported_source_never_reaches_the_pool() {
        let factory = MockSourceFactory::new();
        let orch = orchestrator(factory.clone(), NullCache, 3);

        let report = orch
            .run(&names(&["monster"]), "rust", "berlin", 10, &SilentReporter)
            .await;

        assert_eq!(factory.created(), 0);
        assert_eq!(report.per_source_counts["monster"], 0);
        assert_eq!(report.outcomes["monster"].state, SourceState::Unsupported);
        assert!(report.all_failed());
    }

    #[tokio::test]
    async fn setup_failure_marks_source_failed() {
        let factory = MockSourceFactory::new()
            .with_setup_error(SourceKind::Indeed, AppError::SetupError("no chrome".into()));
        let orch = orchestrator(factory.clone(), NullCache, 3);

        let report = orch
            .run(&names(&["indeed"]), "rust", "berlin", 10, &SilentReporter)
            .await;

        let outcome = &report.outcomes["indeed"];
        assert_eq!(outcome.state, SourceState::Failed);
        assert!(outcome.error.as_deref().unwrap().contains("no chrome"));
        assert_eq!(factory.fetches(SourceKind::Indeed), 0);
    }

    #[tokio::test]
    async fn adapter_is_closed_on_success_and_failure() {
        let factory = MockSourceFactory::new()
            .with_records(SourceKind::Indeed, 2)
            .with_errors(
                SourceKind::LinkedIn,
                vec![AppError::HttpError("HTTP 403".into())],
            );
        let orch = orchestrator(factory.clone(), NullCache, 3);

        let report = orch
            .run(
                &names(&["indeed", "linkedin"]),
                "rust",
                "berlin",
                10,
                &SilentReporter,
            )
            .await;

        assert_eq!(report.outcomes["indeed"].state, SourceState::Succeeded);
        assert_eq!(report.outcomes["linkedin"].state, SourceState::Failed);
        assert_eq!(factory.created(), 2);
        assert_eq!(factory.closed(), 2);
    }

    #[tokio::test]
    async fn panicking_fetch_fails_source_and_still_closes() {
        let factory = MockSourceFactory::new()
            .with_records(SourceKind::Indeed, 2)
            .with_panic(SourceKind::LinkedIn);
        let cache = MemoryCache::new();
        let orch = orchestrator(factory.clone(), cache.clone(), 3);

        let report = orch
            .run(
                &names(&["indeed", "linkedin"]),
                "rust",
                "berlin",
                10,
                &SilentReporter,
            )
            .await;

        assert_eq!(report.outcomes["indeed"].state, SourceState::Succeeded);
        let outcome = &report.outcomes["linkedin"];
        assert_eq!(outcome.state, SourceState::Failed);
        assert!(outcome.error.as_deref().unwrap().contains("scripted panic"));
        assert_eq!(report.total_records, 2);
        assert_eq!(factory.created(), 2);
        assert_eq!(factory.closed(), 2);
        assert!(cache.get("linkedin", "rust", "berlin").is_none());
    }

    #[test]
    fn panic_message_reads_common_payloads() {
        let literal: Box<dyn Any + Send> = Box::new("boom");
        let owned: Box<dyn Any + Send> = Box::new(String::from("bang"));
        let other: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(literal.as_ref()), "boom");
        assert_eq!(panic_message(owned.as_ref()), "bang");
        assert_eq!(panic_message(other.as_ref()), "unknown panic");
    }

    #[tokio::test]
    async fn reporter_sees_one_completion_per_source() {
        let factory = MockSourceFactory::new()
            .with_records(SourceKind::Indeed, 1)
            .with_records(SourceKind::Glassdoor, 1);
        let orch = orchestrator(factory, NullCache, 2);
        let reporter = MockReporter::new();

        orch.run(
            &names(&["indeed", "glassdoor", "monster"]),
            "rust",
            "berlin",
            10,
            &reporter,
        )
        .await;

        let events = reporter.events.lock().unwrap().clone();
        assert_eq!(events.first().map(String::as_str), Some("RunStarted"));
        assert_eq!(events.last().map(String::as_str), Some("RunFinished"));
        assert_eq!(
            events.iter().filter(|e| *e == "SourceCompleted").count(),
            3
        );
    }

    #[tokio::test]
    async fn cache_hit_is_truncated_and_skips_adapter() {
        let cache = MemoryCache::new();
        cache.seed("indeed", "rust", "berlin", 5).await;
        let factory = MockSourceFactory::new().with_records(SourceKind::Indeed, 5);
        let orch = orchestrator(factory.clone(), cache, 3);

        let report = orch
            .run(&names(&["indeed"]), "rust", "berlin", 3, &SilentReporter)
            .await;

        assert_eq!(report.per_source_counts["indeed"], 3);
        assert_eq!(report.outcomes["indeed"].state, SourceState::CacheHit);
        assert_eq!(factory.created(), 0);
    }

    #[tokio::test]
    async fn empty_cached_list_is_refetched() {
        let cache = MemoryCache::new();
        cache.seed("indeed", "rust", "berlin", 0).await;
        let factory = MockSourceFactory::new().with_records(SourceKind::Indeed, 2);
        let orch = orchestrator(factory.clone(), cache, 3);

        let report = orch
            .run(&names(&["indeed"]), "rust", "berlin", 10, &SilentReporter)
            .await;

        assert_eq!(report.outcomes["indeed"].state, SourceState::Succeeded);
        assert_eq!(factory.fetches(SourceKind::Indeed), 1);
    }

    #[tokio::test]
    async fn cancelled_run_skips_unstarted_sources() {
        let factory = MockSourceFactory::new().with_records(SourceKind::Indeed, 2);
        let orch = orchestrator(factory.clone(), NullCache, 3);
        let token = CancellationToken::new();
        token.cancel();

        let report = orch
            .run_with_cancel(
                &names(&["indeed", "linkedin"]),
                "rust",
                "berlin",
                10,
                token,
                &SilentReporter,
            )
            .await;

        assert_eq!(report.outcomes["indeed"].state, SourceState::Skipped);
        assert_eq!(report.outcomes["linkedin"].state, SourceState::Skipped);
        assert_eq!(factory.created(), 0);
    }

    #[tokio::test]
    async fn duplicate_sources_fetch_once() {
        let factory = MockSourceFactory::new().with_records(SourceKind::Indeed, 2);
        let orch = orchestrator(factory.clone(), NullCache, 3);

        let report = orch
            .run(
                &names(&["indeed", "Indeed", "INDEED"]),
                "rust",
                "berlin",
                10,
                &SilentReporter,
            )
            .await;

        assert_eq!(factory.fetches(SourceKind::Indeed), 1);
        assert_eq!(report.total_records, 2);
    }
}
