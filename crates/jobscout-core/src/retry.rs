//! Retry with exponential backoff and a separate rate-limit cooldown.
//!
//! ```text
//! call ──ok──────────────────────────────────────────────> Ok
//!   │
//!   ├─rate limited──> sleep(cooldown) ──> call once more ──> (same classification,
//!   │                                                         but a second rate limit
//!   │                                                         is returned as-is)
//!   ├─not retryable──────────────────────────────────────> Err(e)
//!   └─retryable──> attempts left? ──yes──> sleep(delay); delay *= factor; call
//!                                 └─no───> Err(RetriesExhausted { attempts, e })
//! ```
//!
//! The cooldown never consumes one of the `max_retries` attempts.

use std::future::Future;
use std::time::Duration;

use crate::error::{AppError, ErrorKind};

/// Something that can wait. Production code uses [`TokioSleeper`].
pub trait Sleeper: Send + Sync + Clone + 'static {
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Retry configuration with exponential backoff.
///
/// `max_retries` is the total number of attempts. Zero means "call once and
/// return whatever happens, unwrapped".
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub backoff_factor: f64,
    /// Upper bound for any single backoff sleep.
    pub max_delay: Duration,
    /// Fixed wait after a rate-limit signal.
    pub rate_limit_cooldown: Duration,
    /// Error kinds that are retried under backoff.
    pub retryable: Vec<ErrorKind>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(300),
            rate_limit_cooldown: Duration::from_secs(60),
            retryable: vec![
                ErrorKind::Timeout,
                ErrorKind::Network,
                ErrorKind::ElementNotFound,
            ],
        }
    }
}

impl RetryConfig {
    /// Policy applied around every source fetch: 3 attempts, 2s, 4s.
    pub fn for_sources() -> Self {
        Self::default().with_initial_delay(Duration::from_secs(2))
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_rate_limit_cooldown(mut self, cooldown: Duration) -> Self {
        self.rate_limit_cooldown = cooldown;
        self
    }

    pub fn with_retryable(mut self, kinds: impl IntoIterator<Item = ErrorKind>) -> Self {
        self.retryable = kinds.into_iter().collect();
        self
    }

    pub fn is_retryable(&self, error: &AppError) -> bool {
        self.retryable.contains(&error.kind())
    }

    /// Delay before retry number `retry` (0-indexed): `initial * factor^retry`,
    /// capped at `max_delay`.
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let secs = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(retry as i32);
        Duration::try_from_secs_f64(secs)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Runs fallible async operations under a [`RetryConfig`].
#[derive(Debug, Clone)]
pub struct RetryPolicy<S = TokioSleeper> {
    config: RetryConfig,
    sleeper: S,
}

impl RetryPolicy<TokioSleeper> {
    pub fn new(config: RetryConfig) -> Self {
        Self::with_sleeper(config, TokioSleeper)
    }
}

impl Default for RetryPolicy<TokioSleeper> {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

impl<S: Sleeper> RetryPolicy<S> {
    pub fn with_sleeper(config: RetryConfig, sleeper: S) -> Self {
        Self { config, sleeper }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Execute `operation` until it succeeds, fails with a non-retryable
    /// error, or runs out of attempts.
    pub async fn run<T, F, Fut>(&self, mut operation: F) -> Result<T, AppError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        let max = self.config.max_retries;
        if max == 0 {
            return operation().await;
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            let error = match self.call_with_cooldown(&mut operation).await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if error.is_rate_limit() {
                tracing::error!(error = %error, "Still rate limited after cooldown");
                return Err(error);
            }
            if !self.config.is_retryable(&error) {
                return Err(error);
            }
            if attempt >= max {
                tracing::error!(
                    attempts = max,
                    error = %error,
                    "All {max} attempts failed"
                );
                return Err(AppError::RetriesExhausted {
                    attempts: max,
                    source: Box::new(error),
                });
            }

            let delay = self.config.delay_for_retry(attempt - 1);
            tracing::warn!(
                attempt,
                max,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Attempt failed, retrying"
            );
            self.sleeper.sleep(delay).await;
        }
    }

    /// One logical attempt: a call, plus one more after a cooldown if the
    /// first was rate limited.
    async fn call_with_cooldown<T, F, Fut>(&self, operation: &mut F) -> Result<T, AppError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        match operation().await {
            Err(e) if e.is_rate_limit() => {
                let cooldown = self.config.rate_limit_cooldown;
                tracing::warn!(
                    cooldown_secs = cooldown.as_secs(),
                    error = %e,
                    "Rate limit detected, cooling down"
                );
                self.sleeper.sleep(cooldown).await;
                operation().await
            }
            other => other,
        }
    }
}
