//! Time-bounded cache of fetched result sets.
//!
//! One JSON document per `(source, query, location)` triple, named by the
//! SHA-256 of the normalized triple:
//!
//! ```text
//! .cache/
//!   3f1c…9a.json   {"timestamp": "...", "source": "indeed", "query": "...", "location": "...", "jobs": [...]}
//! ```
//!
//! Expired entries are treated as absent but stay on disk until they are
//! overwritten or cleared. Caching is an optimization: every I/O or parse
//! failure is logged and degrades to a miss (reads) or a no-op (writes).

use std::future::Future;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::error::AppError;
use crate::models::{PostingRecord, compute_hash, deserialize_timestamp};

/// Default time-to-live for cache entries.
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Default cache directory.
pub const DEFAULT_CACHE_DIR: &str = ".cache";

const ENTRY_EXTENSION: &str = "json";
const TEMP_EXTENSION: &str = "tmp";

/// Read/write access to previously fetched postings.
///
/// None of these operations fail: caching must never break a fetch.
pub trait PostingCache: Send + Sync + Clone + 'static {
    /// Fresh records for the request, or `None` if absent or expired.
    fn lookup(
        &self,
        source: &str,
        query: &str,
        location: &str,
    ) -> impl Future<Output = Option<Vec<PostingRecord>>> + Send;

    /// Upsert the records for the request, stamped with the current time.
    fn store(
        &self,
        source: &str,
        query: &str,
        location: &str,
        records: &[PostingRecord],
    ) -> impl Future<Output = ()> + Send;

    /// Remove every entry, or only entries stored for `source`.
    /// Returns how many entries were removed.
    fn clear(&self, source: Option<&str>) -> impl Future<Output = usize> + Send;
}

/// Derive the cache key for a request.
///
/// Each field is trimmed, has inner whitespace collapsed and is lowercased
/// before hashing, so `("Indeed", " Rust  Dev", "Berlin")` and
/// `("indeed", "rust dev", "berlin")` share a key.
pub fn cache_key(source: &str, query: &str, location: &str) -> String {
    let joined = format!(
        "{}:{}:{}",
        normalize(source),
        normalize(query),
        normalize(location)
    );
    compute_hash(&joined)
}

fn normalize(field: &str) -> String {
    field
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Convert the CLI's hour-based duration into a TTL.
pub fn ttl_from_hours(hours: u64) -> Duration {
    Duration::from_secs(hours.saturating_mul(60 * 60))
}

/// On-disk cache document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(alias = "site")]
    pub source: String,
    pub query: String,
    pub location: String,
    pub jobs: Vec<PostingRecord>,
}

/// Filesystem-backed [`PostingCache`].
#[derive(Debug, Clone)]
pub struct FileCache<C = SystemClock> {
    dir: PathBuf,
    ttl: Duration,
    clock: C,
}

impl FileCache<SystemClock> {
    /// Open (and create if needed) a cache directory with the given TTL.
    pub fn new(dir: impl Into<PathBuf>, ttl: Duration) -> Result<Self, AppError> {
        Self::with_clock(dir, ttl, SystemClock)
    }
}

impl<C: Clock> FileCache<C> {
    /// Like [`FileCache::new`] with an injected time source.
    pub fn with_clock(dir: impl Into<PathBuf>, ttl: Duration, clock: C) -> Result<Self, AppError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| {
            AppError::CacheError(format!(
                "Failed to create cache directory {}: {e}",
                dir.display()
            ))
        })?;
        Ok(Self { dir, ttl, clock })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.{ENTRY_EXTENSION}"))
    }

    fn is_fresh(&self, entry: &CacheEntry) -> bool {
        let ttl = TimeDelta::from_std(self.ttl).unwrap_or(TimeDelta::MAX);
        self.clock.now() - entry.timestamp <= ttl
    }

    async fn read_entry(path: &Path) -> Result<Option<CacheEntry>, AppError> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(AppError::CacheError(format!(
                    "Failed to read {}: {e}",
                    path.display()
                )));
            }
        };
        let entry = serde_json::from_slice(&bytes).map_err(|e| {
            AppError::CacheError(format!("Corrupt cache entry {}: {e}", path.display()))
        })?;
        Ok(Some(entry))
    }

    /// Fallible lookup; [`PostingCache::lookup`] turns errors into misses.
    pub async fn try_lookup(
        &self,
        source: &str,
        query: &str,
        location: &str,
    ) -> Result<Option<Vec<PostingRecord>>, AppError> {
        let path = self.entry_path(&cache_key(source, query, location));
        let Some(entry) = Self::read_entry(&path).await? else {
            return Ok(None);
        };

        if !self.is_fresh(&entry) {
            tracing::info!(%source, %query, %location, "Cache expired");
            return Ok(None);
        }

        tracing::info!(%source, %query, %location, jobs = entry.jobs.len(), "Using cached results");
        Ok(Some(entry.jobs))
    }

    /// Fallible store; [`PostingCache::store`] logs and swallows errors.
    ///
    /// The document is written to a temporary file and renamed into place,
    /// so readers never see a partial entry and concurrent writers to the
    /// same key resolve last-write-wins.
    pub async fn try_store(
        &self,
        source: &str,
        query: &str,
        location: &str,
        records: &[PostingRecord],
    ) -> Result<(), AppError> {
        let key = cache_key(source, query, location);
        let entry = CacheEntry {
            timestamp: self.clock.now(),
            source: source.to_string(),
            query: query.to_string(),
            location: location.to_string(),
            jobs: records.to_vec(),
        };
        let body = serde_json::to_vec_pretty(&entry)
            .map_err(|e| AppError::CacheError(format!("Failed to serialize entry: {e}")))?;

        let tmp = self
            .dir
            .join(format!(".{key}.{}.{TEMP_EXTENSION}", Uuid::new_v4().simple()));
        let target = self.entry_path(&key);

        if let Err(e) = tokio::fs::write(&tmp, &body).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(AppError::CacheError(format!(
                "Failed to write {}: {e}",
                tmp.display()
            )));
        }
        if let Err(e) = tokio::fs::rename(&tmp, &target).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(AppError::CacheError(format!(
                "Failed to move entry into {}: {e}",
                target.display()
            )));
        }

        tracing::info!(%source, %query, %location, jobs = records.len(), "Cached results");
        Ok(())
    }

    /// Fallible clear; [`PostingCache::clear`] logs and swallows errors.
    ///
    /// With a source filter, every entry is opened and matched on its stored
    /// `source` field. Entries that cannot be parsed are left alone.
    /// A full clear also removes leftover temporary files; those are not
    /// counted.
    pub async fn try_clear(&self, source: Option<&str>) -> Result<usize, AppError> {
        let mut dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(0),
            Err(e) => {
                return Err(AppError::CacheError(format!(
                    "Failed to list {}: {e}",
                    self.dir.display()
                )));
            }
        };

        let wanted = source.map(normalize);
        let mut removed = 0;

        while let Some(item) = dir
            .next_entry()
            .await
            .map_err(|e| AppError::CacheError(format!("Failed to list cache: {e}")))?
        {
            let path = item.path();
            match path.extension().and_then(|e| e.to_str()) {
                Some(ENTRY_EXTENSION) => {}
                Some(TEMP_EXTENSION) if wanted.is_none() => {
                    if let Err(e) = tokio::fs::remove_file(&path).await
                        && e.kind() != IoErrorKind::NotFound
                    {
                        tracing::warn!(path = %path.display(), error = %e, "Failed to remove temp file");
                    }
                    continue;
                }
                _ => continue,
            }

            if let Some(wanted) = &wanted {
                match Self::read_entry(&path).await {
                    Ok(Some(entry)) if normalize(&entry.source) == *wanted => {}
                    Ok(_) => continue,
                    Err(e) => {
                        tracing::warn!(error = %e, "Skipping unreadable cache entry");
                        continue;
                    }
                }
            }

            match tokio::fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == IoErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to remove cache entry");
                }
            }
        }

        match source {
            Some(source) => tracing::info!(%source, removed, "Cleared cache for source"),
            None => tracing::info!(removed, "Cleared all cache entries"),
        }
        Ok(removed)
    }
}

impl<C: Clock> PostingCache for FileCache<C> {
    async fn lookup(
        &self,
        source: &str,
        query: &str,
        location: &str,
    ) -> Option<Vec<PostingRecord>> {
        match self.try_lookup(source, query, location).await {
            Ok(records) => records,
            Err(e) => {
                tracing::error!(%source, error = %e, "Error reading cache");
                None
            }
        }
    }

    async fn store(&self, source: &str, query: &str, location: &str, records: &[PostingRecord]) {
        if let Err(e) = self.try_store(source, query, location, records).await {
            tracing::error!(%source, error = %e, "Error writing to cache");
        }
    }

    async fn clear(&self, source: Option<&str>) -> usize {
        self.try_clear(source).await.unwrap_or_else(|e| {
            tracing::error!(error = %e, "Error clearing cache");
            0
        })
    }
}

/// A cache that never hits and never stores.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullCache;

impl PostingCache for NullCache {
    async fn lookup(&self, _: &str, _: &str, _: &str) -> Option<Vec<PostingRecord>> {
        None
    }

    async fn store(&self, _: &str, _: &str, _: &str, _: &[PostingRecord]) {}

    async fn clear(&self, _: Option<&str>) -> usize {
        0
    }
}
