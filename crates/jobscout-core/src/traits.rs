use std::fmt;
use std::future::Future;
use std::str::FromStr;

use crate::error::AppError;
use crate::models::PostingRecord;

/// The closed set of providers jobscout knows how to query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SourceKind {
    Indeed,
    LinkedIn,
    Glassdoor,
}

impl SourceKind {
    pub const ALL: [SourceKind; 3] = [SourceKind::Indeed, SourceKind::LinkedIn, SourceKind::Glassdoor];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Indeed => "indeed",
            SourceKind::LinkedIn => "linkedin",
            SourceKind::Glassdoor => "glassdoor",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = AppError;

    /// Registry lookup. Unknown names are an [`AppError::UnsupportedSource`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "indeed" => Ok(SourceKind::Indeed),
            "linkedin" => Ok(SourceKind::LinkedIn),
            "glassdoor" => Ok(SourceKind::Glassdoor),
            _ => Err(AppError::UnsupportedSource(s.to_string())),
        }
    }
}

/// A single provider adapter.
///
/// An adapter owns its external session (HTTP client, browser) from
/// construction until [`JobSource::close`], which consumes it. Callers must
/// close every adapter they create, whatever `fetch` returned.
pub trait JobSource: Send + Sync + 'static {
    fn kind(&self) -> SourceKind;

    /// Locate up to `count` postings. Returning fewer is not an error.
    fn fetch(
        &self,
        query: &str,
        location: &str,
        count: usize,
    ) -> impl Future<Output = Result<Vec<PostingRecord>, AppError>> + Send;

    /// Release the external session.
    fn close(self) -> impl Future<Output = ()> + Send;
}

/// Builds adapters on demand, one per fetch task.
///
/// Enables per-task sessions in the orchestrator: no two tasks ever share
/// an adapter.
pub trait SourceFactory: Send + Sync + Clone + 'static {
    type Source: JobSource;

    /// Create an adapter. Fails with [`AppError::SetupError`] if the session
    /// cannot be established.
    fn create(&self, kind: SourceKind) -> impl Future<Output = Result<Self::Source, AppError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_kind_roundtrip() {
        for kind in SourceKind::ALL {
            let parsed: SourceKind = kind.as_str().parse().unwrap();
            assert_eq!(parsed, kind);
        }
    }

    #[test]
    fn test_source_kind_is_case_insensitive() {
        assert_eq!("LinkedIn".parse::<SourceKind>().unwrap(), SourceKind::LinkedIn);
        assert_eq!(" INDEED ".parse::<SourceKind>().unwrap(), SourceKind::Indeed);
    }

    #[test]
    fn test_unknown_source_is_unsupported() {
        let err = "monster".parse::<SourceKind>().unwrap_err();
        assert!(matches!(err, AppError::UnsupportedSource(ref name) if name == "monster"));
    }
}
