//! URL-based deduplication against stored records.
//!
//! Identity is the normalized URL (see [`crate::utils::normalize_url`]). One
//! bulk existence lookup is issued per batch; the storage layer's unique
//! index remains the final guard against concurrent inserts.

use crate::config::DedupScope;
use crate::models::NormalizedRecord;
use crate::storage::{Storage, StorageError};
use crate::utils::normalize_url;
use itertools::Itertools;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Result of [`filter_new`].
#[derive(Debug, Clone, Default)]
pub struct DedupOutcome {
    /// Records not yet stored, in input order.
    pub fresh: Vec<NormalizedRecord>,
    /// Records dropped as already stored or repeated within the batch.
    pub duplicates: usize,
}

/// Drop records whose normalized URL is already stored.
///
/// Input order is preserved. A URL repeated inside `records` is kept only
/// at its first occurrence. With [`DedupScope::PerSource`] the lookup is
/// restricted to records of the same source, so two sources publishing the
/// same URL both keep their copy.
///
/// # Arguments
///
/// * `storage` - Backend queried once per distinct source in the batch
/// * `records` - Normalized records from one page batch
/// * `scope` - Global or per-source identity
pub fn filter_new(
    storage: &dyn Storage,
    records: Vec<NormalizedRecord>,
    scope: DedupScope,
) -> Result<DedupOutcome, StorageError> {
    if records.is_empty() {
        return Ok(DedupOutcome::default());
    }

    let existing: HashSet<(Option<String>, String)> = match scope {
        DedupScope::Global => {
            let urls = distinct_urls(records.iter());
            storage
                .find_existing_urls(&urls, None)?
                .into_iter()
                .map(|url| (None, url))
                .collect()
        }
        DedupScope::PerSource => {
            let mut existing = HashSet::new();
            let sources: Vec<&str> = records.iter().map(|r| r.source_name.as_str()).unique().collect();
            for source in sources {
                let urls = distinct_urls(records.iter().filter(|r| r.source_name == source));
                for url in storage.find_existing_urls(&urls, Some(source))? {
                    existing.insert((Some(source.to_string()), url));
                }
            }
            existing
        }
    };

    let identity = |record: &NormalizedRecord| match scope {
        DedupScope::Global => (None, record.normalized_url.clone()),
        DedupScope::PerSource => (Some(record.source_name.clone()), record.normalized_url.clone()),
    };

    let total = records.len();
    let fresh: Vec<NormalizedRecord> = records
        .into_iter()
        .filter(|record| !existing.contains(&identity(record)))
        .unique_by(identity)
        .collect();

    let duplicates = total - fresh.len();
    debug!(total, fresh = fresh.len(), duplicates, ?scope, "Deduplicated batch");
    Ok(DedupOutcome { fresh, duplicates })
}

/// Counts of stored versus unseen records in a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DuplicateReport {
    pub total: usize,
    pub duplicate: usize,
    pub new: usize,
    pub duplicate_urls: Vec<String>,
}

/// Report how many of `records` are already stored, without filtering.
pub fn duplicate_report(
    storage: &dyn Storage,
    records: &[NormalizedRecord],
) -> Result<DuplicateReport, StorageError> {
    let urls = distinct_urls(records.iter());
    let existing = storage.find_existing_urls(&urls, None)?;
    let duplicate_urls: Vec<String> = records
        .iter()
        .filter(|r| existing.contains(&r.normalized_url))
        .map(|r| r.url.clone())
        .collect();
    Ok(DuplicateReport {
        total: records.len(),
        duplicate: duplicate_urls.len(),
        new: records.len() - duplicate_urls.len(),
        duplicate_urls,
    })
}

/// Existence of each given URL (raw form as key), normalized before lookup.
pub fn check_urls_exist(
    storage: &dyn Storage,
    urls: &[String],
) -> Result<HashMap<String, bool>, StorageError> {
    let normalized: Vec<String> = urls.iter().map(|u| normalize_url(u)).unique().collect();
    let existing = storage.find_existing_urls(&normalized, None)?;
    Ok(urls
        .iter()
        .map(|url| (url.clone(), existing.contains(&normalize_url(url))))
        .collect())
}

fn distinct_urls<'a>(records: impl Iterator<Item = &'a NormalizedRecord>) -> Vec<String> {
    records.map(|r| r.normalized_url.clone()).unique().collect()
}
