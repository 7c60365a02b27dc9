use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use jobscout_client::{BoardSourceFactory, SessionConfig};
use jobscout_core::cache::{self, FileCache};
use jobscout_core::export::save_postings;
use jobscout_core::models::AggregateReport;
use jobscout_core::orchestrator::{
    DEFAULT_MAX_WORKERS, DEFAULT_NUM_JOBS, Orchestrator, OrchestratorConfig, TracingReporter,
};

#[derive(Parser, Debug)]
#[command(
    name = "jobscout",
    version,
    about = "Fetch job postings from several boards in parallel, with caching"
)]
struct Cli {
    /// Job search query
    #[arg(short, long, env = "JOBSCOUT_QUERY")]
    query: String,

    /// Location for the job search
    #[arg(short, long, env = "JOBSCOUT_LOCATION")]
    location: String,

    /// Number of postings to fetch per board
    #[arg(short, long, env = "JOBSCOUT_NUM_JOBS", default_value_t = DEFAULT_NUM_JOBS)]
    num_jobs: usize,

    /// Directory the postings are written to
    #[arg(short, long, env = "JOBSCOUT_OUTPUT_DIR", default_value = "job_descriptions")]
    output_dir: PathBuf,

    /// Boards to query (indeed, linkedin, glassdoor). Repeatable or comma-separated.
    #[arg(
        short,
        long = "sites",
        env = "JOBSCOUT_SITES",
        value_delimiter = ',',
        default_value = "indeed"
    )]
    sites: Vec<String>,

    /// Log level, overridden by RUST_LOG
    #[arg(
        long,
        env = "JOBSCOUT_LOG_LEVEL",
        default_value = "info",
        value_parser = ["trace", "debug", "info", "warn", "error"],
        ignore_case = true
    )]
    log_level: String,

    /// Directory for cache files
    #[arg(long, env = "JOBSCOUT_CACHE_DIR", default_value = cache::DEFAULT_CACHE_DIR)]
    cache_dir: PathBuf,

    /// How long cache entries stay valid, in hours
    #[arg(long, env = "JOBSCOUT_CACHE_DURATION", default_value_t = 24)]
    cache_duration: u64,

    /// Maximum number of boards fetched at the same time
    #[arg(long, env = "JOBSCOUT_MAX_WORKERS", default_value_t = DEFAULT_MAX_WORKERS)]
    max_workers: usize,

    /// Clear the whole cache before fetching
    #[arg(long, default_value_t = false)]
    clear_cache: bool,

    /// Clear the cache for one board before fetching
    #[arg(long, conflicts_with = "clear_cache")]
    clear_cache_site: Option<String>,

    /// Render pages in headless Chromium (needs the `browser` feature)
    #[arg(long, env = "JOBSCOUT_BROWSER", default_value_t = false)]
    browser: bool,

    /// Per-page load timeout, in seconds
    #[arg(long, env = "JOBSCOUT_PAGE_TIMEOUT", default_value_t = 30)]
    page_timeout: u64,

    /// Print the merged postings as JSON on stdout
    #[arg(long, default_value_t = false)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Setup tracing
    let level = cli.log_level.to_lowercase();
    let filter = EnvFilter::try_from_default_env().or_else(|_| {
        EnvFilter::try_new(format!(
            "warn,jobscout={level},jobscout_core={level},jobscout_client={level}"
        ))
    })?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    run(cli).await
}

async fn run(cli: Cli) -> Result<()> {
    let cache = FileCache::new(&cli.cache_dir, cache::ttl_from_hours(cli.cache_duration))
        .with_context(|| format!("Failed to open cache at {}", cli.cache_dir.display()))?;

    let sessions = SessionConfig::default()
        .with_browser(cli.browser)
        .with_timeout(Duration::from_secs(cli.page_timeout));
    let orchestrator = Orchestrator::new(
        BoardSourceFactory::new(sessions),
        cache,
        OrchestratorConfig::default().with_max_workers(cli.max_workers),
    );

    if cli.clear_cache {
        let removed = orchestrator.clear_cache(None).await;
        tracing::info!(removed, "Cleared cache");
    } else if let Some(site) = cli.clear_cache_site.as_deref() {
        let removed = orchestrator.clear_cache(Some(site)).await;
        tracing::info!(site, removed, "Cleared cache for site");
    }

    let cancel_token = CancellationToken::new();
    let ctrl_c_token = cancel_token.clone();
    tokio::spawn(async move {
        let ctrl_c = || async { tokio::signal::ctrl_c().await.is_ok() };
        if watch_interrupts(ctrl_c, ctrl_c_token).await {
            tracing::warn!("Interrupted again: exiting");
            std::process::exit(EXIT_INTERRUPTED);
        }
    });

    tracing::info!(
        sites = cli.sites.len(),
        query = %cli.query,
        location = %cli.location,
        "Starting parallel fetch"
    );
    let report = orchestrator
        .run_with_cancel(
            &cli.sites,
            &cli.query,
            &cli.location,
            cli.num_jobs,
            cancel_token,
            &TracingReporter,
        )
        .await;

    for (source, error) in report.failed_sources() {
        tracing::warn!(source, error = error.unwrap_or("unknown error"), "Board failed");
    }

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report.records).context("Failed to encode postings")?
        );
    } else {
        print_summary(&report);
    }

    if report.is_empty() {
        if report.all_failed() {
            tracing::warn!("No postings fetched: every board failed");
        } else {
            tracing::warn!("No postings found matching the criteria");
        }
        return Ok(());
    }

    let written = save_postings(&cli.output_dir, &report.records)
        .await
        .with_context(|| format!("Failed to save postings to {}", cli.output_dir.display()))?;
    tracing::info!(
        files = written.len(),
        dir = %cli.output_dir.display(),
        "Saved postings"
    );

    Ok(())
}

/// Exit status for a second interrupt, as a shell reports SIGINT.
const EXIT_INTERRUPTED: i32 = 130;

/// Cancel `token` on the first interrupt. Returns `true` once a second
/// interrupt arrives, `false` if the signal source goes away first.
async fn watch_interrupts<F, Fut>(mut next_interrupt: F, token: CancellationToken) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    if !next_interrupt().await {
        return false;
    }
    tracing::warn!("Interrupted: finishing in-flight boards (Ctrl-C again to exit)");
    token.cancel();
    next_interrupt().await
}

fn print_summary(report: &AggregateReport) {
    println!("{:<12} {:<12} {:>6}  ERROR", "SOURCE", "STATE", "JOBS");
    for (source, outcome) in &report.outcomes {
        println!(
            "{:<12} {:<12} {:>6}  {}",
            source,
            outcome.state.as_str(),
            outcome.count,
            outcome.error.as_deref().unwrap_or("")
        );
    }
    println!(
        "\nTotal: {} postings in {:.1}s",
        report.total_records,
        report.elapsed.as_secs_f64()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_surface() {
        let cli = Cli::try_parse_from(["jobscout", "-q", "rust", "-l", "berlin"]).unwrap();
        assert_eq!(cli.num_jobs, 10);
        assert_eq!(cli.output_dir, PathBuf::from("job_descriptions"));
        assert_eq!(cli.sites, vec!["indeed"]);
        assert_eq!(cli.cache_dir, PathBuf::from(".cache"));
        assert_eq!(cli.cache_duration, 24);
        assert_eq!(cli.max_workers, 3);
        assert!(!cli.clear_cache);
        assert!(cli.clear_cache_site.is_none());
    }

    #[test]
    fn sites_are_repeatable_and_comma_separated() {
        let cli = Cli::try_parse_from([
            "jobscout",
            "--query",
            "rust",
            "--location",
            "berlin",
            "--sites",
            "indeed,linkedin",
            "--sites",
            "glassdoor",
        ])
        .unwrap();
        assert_eq!(cli.sites, vec!["indeed", "linkedin", "glassdoor"]);
    }

    #[test]
    fn query_and_location_are_required() {
        assert!(Cli::try_parse_from(["jobscout", "--query", "rust"]).is_err());
    }

    #[test]
    fn clear_flags_conflict() {
        let result = Cli::try_parse_from([
            "jobscout",
            "-q",
            "rust",
            "-l",
            "berlin",
            "--clear-cache",
            "--clear-cache-site",
            "indeed",
        ]);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn first_interrupt_cancels_and_second_asks_to_exit() {
        let token = CancellationToken::new();
        let mut seen = 0;
        let exit = watch_interrupts(
            || {
                seen += 1;
                async { true }
            },
            token.clone(),
        )
        .await;
        assert!(exit);
        assert!(token.is_cancelled());
        assert_eq!(seen, 2);
    }

    #[tokio::test]
    async fn lost_signal_source_neither_cancels_nor_exits() {
        let token = CancellationToken::new();
        assert!(!watch_interrupts(|| async { false }, token.clone()).await);
        assert!(!token.is_cancelled());

        let mut remaining = vec![false, true];
        let exit = watch_interrupts(
            || {
                let next = remaining.pop().unwrap_or(false);
                async move { next }
            },
            token.clone(),
        )
        .await;
        assert!(!exit);
        assert!(token.is_cancelled());
    }

    #[test]
    fn log_level_is_case_insensitive() {
        let cli =
            Cli::try_parse_from(["jobscout", "-q", "x", "-l", "y", "--log-level", "DEBUG"]).unwrap();
        assert_eq!(cli.log_level.to_lowercase(), "debug");
        assert!(
            Cli::try_parse_from(["jobscout", "-q", "x", "-l", "y", "--log-level", "loud"]).is_err()
        );
    }
}
