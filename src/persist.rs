//! Chunked persistence with a per-record fallback.
//!
//! Each chunk is first written with one bulk insert. When that fails (most
//! often because a concurrent source stored one of the URLs in between the
//! dedup lookup and the write) the chunk is replayed one record at a time.
//! Conflicts in the replay count as duplicates; anything else is logged and
//! reported, and the remaining chunks still run.

use crate::models::NormalizedRecord;
use crate::storage::{Storage, StorageError};
use tracing::{debug, info, instrument, warn};

/// What happened to one call's records.
#[derive(Debug, Clone, Default)]
pub struct PersistOutcome {
    /// Records that are now stored, in input order.
    pub saved: Vec<NormalizedRecord>,
    /// Records rejected by storage as already present.
    pub conflicts: usize,
    /// Records that failed for any other reason, one message each.
    pub failures: Vec<String>,
}

impl PersistOutcome {
    pub fn saved_count(&self) -> usize {
        self.saved.len()
    }
}

/// Writes records in bounded chunks.
#[derive(Debug, Clone, Copy)]
pub struct BatchPersister {
    batch_size: usize,
}

impl Default for BatchPersister {
    fn default() -> Self {
        Self { batch_size: 20 }
    }
}

impl BatchPersister {
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Store `records`, chunk by chunk.
    ///
    /// The stored set does not depend on the chunk size: a failing chunk is
    /// replayed per record, so every record that does not conflict with an
    /// existing one ends up stored.
    #[instrument(level = "info", skip_all, fields(records = records.len(), batch_size = self.batch_size))]
    pub fn save_batch(&self, storage: &dyn Storage, records: Vec<NormalizedRecord>) -> PersistOutcome {
        let mut outcome = PersistOutcome::default();

        for (index, chunk) in records.chunks(self.batch_size).enumerate() {
            match storage.insert_batch(chunk) {
                Ok(count) => {
                    debug!(chunk = index, count, "Bulk insert succeeded");
                    outcome.saved.extend_from_slice(chunk);
                }
                Err(e) => {
                    warn!(chunk = index, size = chunk.len(), error = %e, "Bulk insert failed; inserting one by one");
                    self.replay(storage, chunk, &mut outcome);
                }
            }
        }

        info!(
            saved = outcome.saved.len(),
            conflicts = outcome.conflicts,
            failures = outcome.failures.len(),
            "Persisted records"
        );
        outcome
    }

    fn replay(&self, storage: &dyn Storage, chunk: &[NormalizedRecord], outcome: &mut PersistOutcome) {
        for record in chunk {
            match storage.insert_one(record) {
                Ok(()) => outcome.saved.push(record.clone()),
                Err(StorageError::Conflict(url)) => {
                    debug!(%url, "Skipping record stored concurrently");
                    outcome.conflicts += 1;
                }
                Err(e) => {
                    warn!(url = %record.url, error = %e, "Failed to store record");
                    outcome.failures.push(format!("{}: {}", record.url, e));
                }
            }
        }
    }
}
