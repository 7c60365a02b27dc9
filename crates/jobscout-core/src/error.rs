use std::fmt;

use thiserror::Error;

/// Application-wide error types for jobscout.
#[derive(Error, Debug)]
pub enum AppError {
    /// A source session (HTTP client, browser) could not be created.
    #[error("Session setup failed: {0}")]
    SetupError(String),

    /// Request or page load timed out.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// Network/connection error, or a transient server-side failure.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// The result listing never appeared on the page.
    #[error("Element not found: {0}")]
    ElementNotFound(String),

    /// The provider asked us to slow down (HTTP 429 or an equivalent page).
    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),

    /// Non-success HTTP status that is not worth retrying.
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// A single posting could not be parsed.
    #[error("Extraction error: {0}")]
    ExtractionError(String),

    /// The source name is not in the registry.
    #[error("Unsupported source: {0}")]
    UnsupportedSource(String),

    /// Cache read/write failed.
    #[error("Cache error: {0}")]
    CacheError(String),

    /// The retry policy gave up.
    #[error("Failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        source: Box<AppError>,
    },

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Filesystem error outside the cache (e.g. writing exports).
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Generic error.
    #[error("{0}")]
    Generic(String),
}

/// Coarse classification of [`AppError`] used by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Setup,
    Timeout,
    Network,
    ElementNotFound,
    RateLimited,
    Http,
    Extraction,
    UnsupportedSource,
    Cache,
    RetriesExhausted,
    Serialization,
    Io,
    Generic,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Setup => "setup",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Network => "network",
            ErrorKind::ElementNotFound => "element_not_found",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::Http => "http",
            ErrorKind::Extraction => "extraction",
            ErrorKind::UnsupportedSource => "unsupported_source",
            ErrorKind::Cache => "cache",
            ErrorKind::RetriesExhausted => "retries_exhausted",
            ErrorKind::Serialization => "serialization",
            ErrorKind::Io => "io",
            ErrorKind::Generic => "generic",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::SetupError(_) => ErrorKind::Setup,
            AppError::Timeout(_) => ErrorKind::Timeout,
            AppError::NetworkError(_) => ErrorKind::Network,
            AppError::ElementNotFound(_) => ErrorKind::ElementNotFound,
            AppError::RateLimited(_) => ErrorKind::RateLimited,
            AppError::HttpError(_) => ErrorKind::Http,
            AppError::ExtractionError(_) => ErrorKind::Extraction,
            AppError::UnsupportedSource(_) => ErrorKind::UnsupportedSource,
            AppError::CacheError(_) => ErrorKind::Cache,
            AppError::RetriesExhausted { .. } => ErrorKind::RetriesExhausted,
            AppError::SerializationError(_) => ErrorKind::Serialization,
            AppError::IoError(_) => ErrorKind::Io,
            AppError::Generic(_) => ErrorKind::Generic,
        }
    }

    /// Returns true if this error is transient and worth retrying under backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Timeout | ErrorKind::Network | ErrorKind::ElementNotFound
        )
    }

    /// Returns true if the provider signalled a rate limit.
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, AppError::RateLimited(_))
    }
}
