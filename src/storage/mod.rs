//! Storage collaborator for crawled records.
//!
//! The pipeline only needs a handful of operation shapes from storage:
//!
//! - bulk "which of these normalized URLs already exist" lookup
//! - bulk insert (all-or-nothing) and single insert
//! - relevance update for one record
//! - count aggregates by source, status and relevance
//!
//! Two backends implement [`Storage`]:
//!
//! | Backend | Module | Notes |
//! |---------|--------|-------|
//! | SQLite | [`sqlite`] | `UNIQUE(normalized_url)` is the final race guard |
//! | Memory | [`memory`] | Same contract in-process; can simulate bulk failures |

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStorage;
pub use sqlite::SqliteStorage;

use crate::models::{NormalizedRecord, RecordStatus, Relevance};
use std::collections::{BTreeMap, HashSet};
use thiserror::Error;

/// Error type for storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    /// A record with the same normalized URL is already stored.
    #[error("duplicate record for {0}")]
    Conflict(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Backend refused the operation for a reason other than a conflict.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("storage lock poisoned")]
    Poisoned,

    #[error("record not found: {0}")]
    NotFound(String),
}

impl StorageError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StorageError::Conflict(_))
    }
}

/// Relevance counts over stored records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct RelevanceCounts {
    pub related: u64,
    pub unrelated: u64,
    pub undetermined: u64,
}

/// Operations the crawl pipeline and classifier need from storage.
///
/// Implementations must be safe to share between concurrently running
/// sources.
pub trait Storage: Send + Sync {
    /// Subset of `normalized_urls` already stored, optionally restricted to
    /// records of one source.
    fn find_existing_urls(
        &self,
        normalized_urls: &[String],
        source: Option<&str>,
    ) -> Result<HashSet<String>, StorageError>;

    /// Insert every record or none of them.
    fn insert_batch(&self, records: &[NormalizedRecord]) -> Result<usize, StorageError>;

    /// Insert one record; a stored duplicate yields [`StorageError::Conflict`].
    fn insert_one(&self, record: &NormalizedRecord) -> Result<(), StorageError>;

    /// Record the classifier's verdict and move the record to `status`.
    fn update_relevance(
        &self,
        id: &str,
        relevance: &Relevance,
        status: RecordStatus,
    ) -> Result<(), StorageError>;

    /// Records to classify, oldest first. With `include_processed` the
    /// already classified records are returned too (re-scan).
    fn find_for_classification(
        &self,
        source: Option<&str>,
        include_processed: bool,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<NormalizedRecord>, StorageError>;

    fn count_by_source(&self) -> Result<BTreeMap<String, u64>, StorageError>;

    fn count_by_status(&self, source: Option<&str>) -> Result<BTreeMap<RecordStatus, u64>, StorageError>;

    fn count_by_relevance(&self, source: Option<&str>) -> Result<RelevanceCounts, StorageError>;

    /// Number of records stored for one source.
    fn count_for_source(&self, source: &str) -> Result<u64, StorageError> {
        Ok(self.count_by_source()?.get(source).copied().unwrap_or(0))
    }
}
