pub mod cache;
pub mod clock;
pub mod error;
pub mod export;
pub mod models;
pub mod orchestrator;
pub mod retry;
pub mod traits;

#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

pub use cache::{FileCache, NullCache, PostingCache};
pub use error::{AppError, ErrorKind};
pub use models::{AggregateReport, FetchResult, PostingRecord, SourceState, compute_hash};
pub use orchestrator::{Orchestrator, OrchestratorConfig, ProgressReporter, TracingReporter};
pub use retry::{RetryConfig, RetryPolicy};
pub use traits::{JobSource, SourceFactory, SourceKind};
