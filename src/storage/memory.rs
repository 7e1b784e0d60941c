//! In-process [`Storage`] used by dry runs and tests.

use super::{RelevanceCounts, Storage, StorageError};
use crate::models::{NormalizedRecord, RecordStatus, Relevance};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

/// Records kept in insertion order behind a mutex.
///
/// `fail_bulk_inserts` makes every [`Storage::insert_batch`] call fail with
/// [`StorageError::Unavailable`], which is how the persister's per-record
/// fallback is exercised.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    records: Mutex<Vec<NormalizedRecord>>,
    fail_bulk_inserts: AtomicBool,
    bulk_attempts: AtomicUsize,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_bulk_inserts(&self, fail: bool) {
        self.fail_bulk_inserts.store(fail, Ordering::SeqCst);
    }

    /// Number of `insert_batch` calls seen so far, failed or not.
    pub fn bulk_attempts(&self) -> usize {
        self.bulk_attempts.load(Ordering::SeqCst)
    }

    /// Copy of every stored record.
    pub fn snapshot(&self) -> Result<Vec<NormalizedRecord>, StorageError> {
        Ok(self.lock()?.clone())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Vec<NormalizedRecord>>, StorageError> {
        self.records.lock().map_err(|_| StorageError::Poisoned)
    }
}

fn conflicts(stored: &[NormalizedRecord], record: &NormalizedRecord) -> bool {
    stored
        .iter()
        .any(|r| r.normalized_url == record.normalized_url || r.id == record.id)
}

impl Storage for MemoryStorage {
    fn find_existing_urls(
        &self,
        normalized_urls: &[String],
        source: Option<&str>,
    ) -> Result<HashSet<String>, StorageError> {
        let wanted: HashSet<&str> = normalized_urls.iter().map(String::as_str).collect();
        Ok(self
            .lock()?
            .iter()
            .filter(|r| source.is_none_or(|s| r.source_name == s))
            .filter(|r| wanted.contains(r.normalized_url.as_str()))
            .map(|r| r.normalized_url.clone())
            .collect())
    }

    fn insert_batch(&self, records: &[NormalizedRecord]) -> Result<usize, StorageError> {
        self.bulk_attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_bulk_inserts.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("bulk insert disabled".to_string()));
        }

        let mut stored = self.lock()?;
        let mut staged: Vec<NormalizedRecord> = Vec::with_capacity(records.len());
        for record in records {
            if conflicts(&stored, record) || conflicts(&staged, record) {
                return Err(StorageError::Conflict(record.url.clone()));
            }
            staged.push(record.clone());
        }
        stored.extend(staged);
        Ok(records.len())
    }

    fn insert_one(&self, record: &NormalizedRecord) -> Result<(), StorageError> {
        let mut stored = self.lock()?;
        if conflicts(&stored, record) {
            return Err(StorageError::Conflict(record.url.clone()));
        }
        stored.push(record.clone());
        Ok(())
    }

    fn update_relevance(
        &self,
        id: &str,
        relevance: &Relevance,
        status: RecordStatus,
    ) -> Result<(), StorageError> {
        let mut stored = self.lock()?;
        let record = stored
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| StorageError::NotFound(id.to_string()))?;
        record.relevance = relevance.clone();
        record.is_processed = relevance.is_determined();
        record.status = status;
        Ok(())
    }

    fn find_for_classification(
        &self,
        source: Option<&str>,
        include_processed: bool,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<NormalizedRecord>, StorageError> {
        let mut matching: Vec<NormalizedRecord> = self
            .lock()?
            .iter()
            .filter(|r| include_processed || !r.is_processed)
            .filter(|r| source.is_none_or(|s| r.source_name == s))
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.crawl_time.cmp(&b.crawl_time).then_with(|| a.id.cmp(&b.id)));
        Ok(matching.into_iter().skip(offset).take(limit).collect())
    }

    fn count_by_source(&self) -> Result<BTreeMap<String, u64>, StorageError> {
        let mut counts = BTreeMap::new();
        for record in self.lock()?.iter() {
            *counts.entry(record.source_name.clone()).or_insert(0) += 1;
        }
        Ok(counts)
    }

    fn count_by_status(&self, source: Option<&str>) -> Result<BTreeMap<RecordStatus, u64>, StorageError> {
        let mut counts = BTreeMap::new();
        for record in self
            .lock()?
            .iter()
            .filter(|r| source.is_none_or(|s| r.source_name == s))
        {
            *counts.entry(record.status).or_insert(0) += 1;
        }
        Ok(counts)
    }

    fn count_by_relevance(&self, source: Option<&str>) -> Result<RelevanceCounts, StorageError> {
        let mut counts = RelevanceCounts::default();
        for record in self
            .lock()?
            .iter()
            .filter(|r| source.is_none_or(|s| r.source_name == s))
        {
            match record.relevance {
                Relevance::Related(_) => counts.related += 1,
                Relevance::Unrelated => counts.unrelated += 1,
                Relevance::Undetermined => counts.undetermined += 1,
            }
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::fixtures::record;

    #[test]
    fn test_bulk_failure_switch() {
        let storage = MemoryStorage::new();
        storage.set_fail_bulk_inserts(true);
        let a = record("SGS", "A", "https://x.example/a");
        assert!(matches!(
            storage.insert_batch(&[a.clone()]),
            Err(StorageError::Unavailable(_))
        ));
        assert_eq!(storage.bulk_attempts(), 1);

        storage.insert_one(&a).unwrap();
        assert!(storage.insert_one(&a).unwrap_err().is_conflict());
    }

    #[test]
    fn test_batch_rejects_in_batch_duplicates() {
        let storage = MemoryStorage::new();
        let a = record("SGS", "A", "https://x.example/a");
        let mut again = record("SGS", "A", "https://x.example/a/");
        again.id = "second".to_string();
        assert!(storage.insert_batch(&[a, again]).unwrap_err().is_conflict());
        assert!(storage.snapshot().unwrap().is_empty());
    }

    #[test]
    fn test_scoped_lookup_and_counts() {
        let storage = MemoryStorage::new();
        storage
            .insert_batch(&[
                record("SGS", "A", "https://x.example/a"),
                record("UL", "B", "https://x.example/b"),
            ])
            .unwrap();
        let urls = vec!["https://x.example/a".to_string(), "https://x.example/b".to_string()];
        assert_eq!(storage.find_existing_urls(&urls, None).unwrap().len(), 2);
        assert_eq!(storage.find_existing_urls(&urls, Some("UL")).unwrap().len(), 1);
        assert_eq!(storage.count_for_source("SGS").unwrap(), 1);
        assert_eq!(storage.count_by_relevance(None).unwrap().undetermined, 2);
    }
}
