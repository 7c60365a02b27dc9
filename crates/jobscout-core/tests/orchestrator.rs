use std::time::Duration;

use jobscout_core::cache::{FileCache, PostingCache};
use jobscout_core::error::AppError;
use jobscout_core::models::{AggregateReport, SourceState};
use jobscout_core::orchestrator::{Orchestrator, OrchestratorConfig, SilentReporter};
use jobscout_core::retry::RetryConfig;
use jobscout_core::testutil::{MemoryCache, MockSourceFactory, RecordingSleeper, make_test_records};
use jobscout_core::traits::SourceKind;
use tempfile::TempDir;

fn sources(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

fn build<C: PostingCache>(
    factory: &MockSourceFactory,
    cache: C,
    max_workers: usize,
) -> (
    Orchestrator<MockSourceFactory, C, RecordingSleeper>,
    RecordingSleeper,
) {
    let sleeper = RecordingSleeper::new();
    let orch = Orchestrator::with_sleeper(
        factory.clone(),
        cache,
        OrchestratorConfig::default()
            .with_max_workers(max_workers)
            .with_retry(RetryConfig::for_sources()),
        sleeper.clone(),
    );
    (orch, sleeper)
}

#[tokio::test(start_paused = true)]
async fn empty_cache_fetches_every_source_within_worker_bound() {
    let factory = MockSourceFactory::new()
        .with_records(SourceKind::Indeed, 2)
        .with_records(SourceKind::LinkedIn, 2)
        .with_records(SourceKind::Glassdoor, 2)
        .with_delay(Duration::from_millis(500));
    let (orch, _) = build(&factory, MemoryCache::new(), 2);

    let report = orch
        .run(
            &sources(&["indeed", "linkedin", "glassdoor"]),
            "rust",
            "berlin",
            10,
            &SilentReporter,
        )
        .await;

    assert_eq!(factory.total_fetches(), 3);
    assert_eq!(factory.max_active(), 2);
    assert_eq!(report.total_records, 6);
}

#[tokio::test(start_paused = true)]
async fn single_worker_serializes_fetches() {
    let factory = MockSourceFactory::new()
        .with_records(SourceKind::Indeed, 1)
        .with_records(SourceKind::LinkedIn, 1)
        .with_delay(Duration::from_millis(200));
    let (orch, _) = build(&factory, MemoryCache::new(), 1);

    orch.run(
        &sources(&["indeed", "linkedin"]),
        "rust",
        "berlin",
        10,
        &SilentReporter,
    )
    .await;

    assert_eq!(factory.max_active(), 1);
}

#[tokio::test]
async fn all_cache_hits_perform_zero_fetches() {
    let cache = MemoryCache::new();
    for name in ["indeed", "linkedin", "glassdoor"] {
        cache.seed(name, "rust", "berlin", 4).await;
    }
    let factory = MockSourceFactory::new();
    let (orch, _) = build(&factory, cache, 3);

    let report = orch
        .run(
            &sources(&["indeed", "linkedin", "glassdoor"]),
            "rust",
            "berlin",
            10,
            &SilentReporter,
        )
        .await;

    assert_eq!(factory.created(), 0);
    assert_eq!(factory.total_fetches(), 0);
    assert_eq!(report.total_records, 12);
    assert!(
        report
            .outcomes
            .values()
            .all(|o| o.state == SourceState::CacheHit)
    );
}

#[tokio::test]
async fn mixed_hit_and_flaky_miss() {
    let cache = MemoryCache::new();
    cache.seed("indeed", "rust", "berlin", 5).await;
    let factory = MockSourceFactory::new()
        .with_errors(
            SourceKind::LinkedIn,
            vec![AppError::Timeout(30), AppError::Timeout(30)],
        )
        .with_records(SourceKind::LinkedIn, 2);
    let (orch, sleeper) = build(&factory, cache.clone(), 3);

    let report = orch
        .run(
            &sources(&["indeed", "linkedin"]),
            "rust",
            "berlin",
            3,
            &SilentReporter,
        )
        .await;

    assert_eq!(report.per_source_counts["indeed"], 3);
    assert_eq!(report.per_source_counts["linkedin"], 2);
    assert_eq!(report.total_records, 5);
    assert_eq!(report.outcomes["indeed"].state, SourceState::CacheHit);
    assert_eq!(report.outcomes["linkedin"].state, SourceState::Succeeded);
    assert_eq!(factory.fetches(SourceKind::LinkedIn), 3);
    assert_eq!(
        sleeper.sleeps(),
        vec![Duration::from_secs(2), Duration::from_secs(4)]
    );
    assert_eq!(cache.get("linkedin", "rust", "berlin").unwrap().len(), 2);
}

#[tokio::test]
async fn exhausted_retries_fail_only_that_source() {
    let factory = MockSourceFactory::new()
        .with_records(SourceKind::Indeed, 2)
        .with_errors(
            SourceKind::Glassdoor,
            vec![
                AppError::NetworkError("reset".into()),
                AppError::NetworkError("reset".into()),
                AppError::NetworkError("reset".into()),
            ],
        );
    let cache = MemoryCache::new();
    let (orch, _) = build(&factory, cache.clone(), 3);

    let report = orch
        .run(
            &sources(&["indeed", "glassdoor"]),
            "rust",
            "berlin",
            10,
            &SilentReporter,
        )
        .await;

    let failed = &report.outcomes["glassdoor"];
    assert_eq!(failed.state, SourceState::Failed);
    assert!(failed.error.as_deref().unwrap().contains("Failed after 3 attempts"));
    assert_eq!(report.per_source_counts["glassdoor"], 0);
    assert_eq!(report.total_records, 2);
    assert!(!report.all_failed());
    assert!(cache.get("glassdoor", "rust", "berlin").is_none());
    assert_eq!(factory.closed(), 2);
}

async fn run_in_order(order: &[&str], delay_ms: u64) -> AggregateReport {
    let factory = MockSourceFactory::new()
        .with_records(SourceKind::Indeed, 3)
        .with_records(SourceKind::LinkedIn, 1)
        .with_records(SourceKind::Glassdoor, 2)
        .with_delay(Duration::from_millis(delay_ms));
    let (orch, _) = build(&factory, MemoryCache::new(), 3);
    orch.run(&sources(order), "rust", "berlin", 10, &SilentReporter)
        .await
}

#[tokio::test(start_paused = true)]
async fn aggregate_is_independent_of_completion_order() {
    let a = run_in_order(&["indeed", "linkedin", "glassdoor"], 10).await;
    let b = run_in_order(&["glassdoor", "indeed", "linkedin"], 300).await;

    assert_eq!(a.per_source_counts, b.per_source_counts);
    assert_eq!(a.total_records, b.total_records);
    assert_eq!(a.total_records, 6);
}

#[tokio::test]
async fn unsupported_names_never_reach_the_factory() {
    let factory = MockSourceFactory::new().with_records(SourceKind::Indeed, 1);
    let (orch, _) = build(&factory, MemoryCache::new(), 3);

    let report = orch
        .run(
            &sources(&["monster", "indeed", "ziprecruiter"]),
            "rust",
            "berlin",
            10,
            &SilentReporter,
        )
        .await;

    assert_eq!(factory.created(), 1);
    assert_eq!(report.outcomes["monster"].state, SourceState::Unsupported);
    assert_eq!(report.outcomes["ziprecruiter"].state, SourceState::Unsupported);
    assert_eq!(report.total_records, 1);
    assert_eq!(report.failed_sources().len(), 2);
}

#[tokio::test]
async fn successful_fetch_is_written_through_to_file_cache() {
    let tmp = TempDir::new().unwrap();
    let cache = FileCache::new(tmp.path().join("cache"), Duration::from_secs(3600)).unwrap();
    let factory = MockSourceFactory::new().with_records(SourceKind::Indeed, 4);
    let (orch, _) = build(&factory, cache.clone(), 3);

    let first = orch
        .run(&sources(&["indeed"]), "Rust", "Berlin", 10, &SilentReporter)
        .await;
    let second = orch
        .run(&sources(&["indeed"]), "rust", "berlin", 2, &SilentReporter)
        .await;

    assert_eq!(first.outcomes["indeed"].state, SourceState::Succeeded);
    assert_eq!(second.outcomes["indeed"].state, SourceState::CacheHit);
    assert_eq!(second.total_records, 2);
    assert_eq!(factory.fetches(SourceKind::Indeed), 1);
}

#[tokio::test]
async fn clear_cache_for_one_source() {
    let tmp = TempDir::new().unwrap();
    let cache = FileCache::new(tmp.path().join("cache"), Duration::from_secs(3600)).unwrap();
    let factory = MockSourceFactory::new();
    let (orch, _) = build(&factory, cache.clone(), 3);

    seed(&cache, "indeed", "rust", "berlin").await;
    seed(&cache, "indeed", "go", "paris").await;
    seed(&cache, "linkedin", "rust", "berlin").await;

    assert_eq!(orch.clear_cache(Some("indeed")).await, 2);
    assert!(cache.lookup("indeed", "rust", "berlin").await.is_none());
    assert!(cache.lookup("linkedin", "rust", "berlin").await.is_some());
    assert_eq!(orch.clear_cache(None).await, 1);
}

async fn seed(cache: &FileCache, source: &str, query: &str, location: &str) {
    let records = make_test_records(source, 1);
    cache.store(source, query, location, &records).await;
}
