//! Run-scoped record identifiers.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};

/// Mints record identifiers from a shared atomic counter.
///
/// One minter is created per run and shared (behind an `Arc`) by every
/// source task, so identifiers stay unique across concurrent sources while
/// tests get a fresh, predictable sequence.
#[derive(Debug, Default)]
pub struct IdMinter {
    counter: AtomicU64,
}

impl IdMinter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next sequence number, starting at 1.
    pub fn next_seq(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Identifier of the form `{SOURCE}_{unix_millis}_{seq:06}`.
    pub fn mint(&self, source: &str, at: DateTime<Utc>) -> String {
        format!(
            "{}_{}_{:06}",
            source.trim().to_uppercase(),
            at.timestamp_millis(),
            self.next_seq()
        )
    }

    /// How many identifiers have been issued so far.
    pub fn issued(&self) -> u64 {
        self.counter.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_mint_format() {
        let minter = IdMinter::new();
        let at = Utc.with_ymd_and_hms(2025, 8, 14, 0, 0, 0).unwrap();
        assert_eq!(minter.mint("sgs", at), format!("SGS_{}_000001", at.timestamp_millis()));
        assert_eq!(minter.mint("sgs", at), format!("SGS_{}_000002", at.timestamp_millis()));
        assert_eq!(minter.issued(), 2);
    }

    #[test]
    fn test_concurrent_minting_is_unique() {
        let minter = Arc::new(IdMinter::new());
        let at = Utc::now();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let minter = Arc::clone(&minter);
                std::thread::spawn(move || (0..250).map(|_| minter.mint("UL", at)).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id));
            }
        }
        assert_eq!(seen.len(), 1000);
        assert_eq!(minter.issued(), 1000);
    }
}
