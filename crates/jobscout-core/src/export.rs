//! Plain-text export of fetched postings, one file per posting.

use std::path::{Path, PathBuf};

use crate::error::AppError;
use crate::models::PostingRecord;

/// Render the text document written for a posting.
pub fn render_posting(record: &PostingRecord) -> String {
    format!(
        "Site: {}\nTitle: {}\nCompany: {}\nURL: {}\nScraped Date: {}\n\nDescription:\n{}",
        record.source,
        record.title,
        record.company,
        record.url,
        record.fetched_at.to_rfc3339(),
        record.description,
    )
}

/// `<source>_<id>_<YYYYMMDD>.txt`, with anything outside `[A-Za-z0-9._-]`
/// replaced by `_`.
pub fn posting_file_name(record: &PostingRecord) -> String {
    format!(
        "{}_{}_{}.txt",
        sanitize(&record.source),
        sanitize(&record.id),
        record.fetched_at.format("%Y%m%d")
    )
}

fn sanitize(part: &str) -> String {
    let cleaned: String = part
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "unknown".to_string()
    } else {
        cleaned.chars().take(100).collect()
    }
}

/// Write every record into `dir` (created if missing). Returns the written paths.
pub async fn save_postings(dir: &Path, records: &[PostingRecord]) -> Result<Vec<PathBuf>, AppError> {
    tokio::fs::create_dir_all(dir).await?;

    let mut written = Vec::with_capacity(records.len());
    for record in records {
        let path = dir.join(posting_file_name(record));
        tokio::fs::write(&path, render_posting(record)).await?;
        tracing::debug!(path = %path.display(), "Saved posting");
        written.push(path);
    }

    tracing::info!(count = written.len(), dir = %dir.display(), "Saved postings");
    Ok(written)
}
