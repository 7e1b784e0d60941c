//! Keyword relevance classifier.
//!
//! Keyword groups are compiled once into a flat, ordered list of lowercase
//! terms. A record is related when its search text (see
//! [`NormalizedRecord::search_text`]) contains any term as a literal
//! substring; the first hit wins.
//!
//! # Term compilation
//!
//! | Step | Example |
//! |------|---------|
//! | split on commas, trim | `"RoHS 2.0, RoHS 3"` → `RoHS 2.0`, `RoHS 3` |
//! | strip annotations | `GB 26572-2025(必追新制)` → `GB 26572-2025` |
//! | lowercase | `RoHS 2.0` → `rohs 2.0` |
//!
//! Only parenthesised notes are treated as annotations: groups holding
//! non-ASCII text, whitespace or a hyphen. Short ASCII groups such as `(EU)`
//! or `(3)(d)` are part of the term.

use crate::config::KeywordConfig;
use crate::models::{NormalizedRecord, RecordStatus, Relevance};
use crate::storage::{Storage, StorageError};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

static PAREN_GROUP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[(（]([^()（）]*)[)）]").expect("valid regex"));

/// Remove annotation groups like `(must-track)` or `（必追新制）` from a term.
pub fn strip_annotations(term: &str) -> String {
    let stripped = PAREN_GROUP.replace_all(term, |caps: &Captures<'_>| {
        let inner = &caps[1];
        let is_note = inner
            .chars()
            .any(|c| !c.is_ascii() || c.is_whitespace() || c == '-');
        if is_note {
            String::new()
        } else {
            caps[0].to_string()
        }
    });
    stripped.trim().to_string()
}

#[derive(Debug, Clone)]
struct CompiledTerm {
    group: String,
    /// Term as configured, annotations removed.
    display: String,
    needle: String,
}

/// Matcher compiled from a [`KeywordConfig`].
#[derive(Debug, Clone)]
pub struct KeywordMatcher {
    terms: Vec<CompiledTerm>,
}

impl KeywordMatcher {
    pub fn new(config: &KeywordConfig) -> Self {
        let mut terms = Vec::new();
        for group in &config.groups {
            for list in [&group.primary_terms, &group.local_terms, &group.extended_terms] {
                for raw in list.split(',') {
                    let display = strip_annotations(raw.trim());
                    if display.is_empty() {
                        continue;
                    }
                    terms.push(CompiledTerm {
                        group: group.name.clone(),
                        needle: display.to_lowercase(),
                        display,
                    });
                }
            }
        }
        debug!(groups = config.groups.len(), terms = terms.len(), "Compiled keyword matcher");
        Self { terms }
    }

    pub fn term_count(&self) -> usize {
        self.terms.len()
    }

    /// Related with the first matching term, otherwise unrelated.
    pub fn classify(&self, record: &NormalizedRecord) -> Relevance {
        self.classify_text(&record.search_text())
    }

    /// Classify an already lowercased search blob.
    pub fn classify_text(&self, blob: &str) -> Relevance {
        match self.terms.iter().find(|t| blob.contains(&t.needle)) {
            Some(term) => {
                debug!(group = %term.group, term = %term.display, "Keyword matched");
                Relevance::Related(vec![term.display.clone()])
            }
            None => Relevance::Unrelated,
        }
    }
}

/// Outcome of a classification sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ClassifySummary {
    pub processed: usize,
    pub matched: usize,
    pub unmatched: usize,
    pub failed: usize,
}

impl ClassifySummary {
    fn record(&mut self, relevance: &Relevance) {
        self.processed += 1;
        match relevance {
            Relevance::Related(_) => self.matched += 1,
            _ => self.unmatched += 1,
        }
    }
}

/// Classify one record and store the verdict.
pub fn classify_and_store(
    storage: &dyn Storage,
    matcher: &KeywordMatcher,
    record: &NormalizedRecord,
) -> Result<Relevance, StorageError> {
    let relevance = matcher.classify(record);
    storage.update_relevance(&record.id, &relevance, RecordStatus::Processed)?;
    Ok(relevance)
}

/// Classify stored records page by page.
///
/// # Arguments
///
/// * `storage` - Backend holding the records
/// * `matcher` - Compiled keyword matcher
/// * `source` - Restrict the sweep to one source
/// * `rescan` - Also revisit records that were already classified
/// * `page_size` - Records loaded per storage query
///
/// # Returns
///
/// Counts of processed, matched and unmatched records. Records whose update
/// fails are counted in `failed` and left for the next sweep.
#[instrument(level = "info", skip(storage, matcher), fields(terms = matcher.term_count()))]
pub fn classify_pending(
    storage: &dyn Storage,
    matcher: &KeywordMatcher,
    source: Option<&str>,
    rescan: bool,
    page_size: usize,
) -> Result<ClassifySummary, StorageError> {
    let page_size = page_size.max(1);
    let mut summary = ClassifySummary::default();
    let mut offset = 0;

    loop {
        let page = storage.find_for_classification(source, rescan, page_size, offset)?;
        if page.is_empty() {
            break;
        }
        let fetched = page.len();

        for record in &page {
            match classify_and_store(storage, matcher, record) {
                Ok(relevance) => summary.record(&relevance),
                Err(e) => {
                    warn!(id = %record.id, error = %e, "Failed to store classification");
                    summary.failed += 1;
                }
            }
        }

        // Pending-only pages shrink as records get classified; only the
        // failed ones stay in front.
        offset = if rescan { offset + fetched } else { summary.failed };
        if fetched < page_size {
            break;
        }
    }

    info!(
        processed = summary.processed,
        matched = summary.matched,
        unmatched = summary.unmatched,
        failed = summary.failed,
        "Classification sweep finished"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KeywordGroup;
    use crate::storage::MemoryStorage;
    use crate::storage::fixtures::record;

    fn group(primary: &str, local: &str, extended: &str) -> KeywordConfig {
        KeywordConfig {
            groups: vec![KeywordGroup {
                name: "TEST".to_string(),
                primary_terms: primary.to_string(),
                local_terms: local.to_string(),
                extended_terms: extended.to_string(),
                ..Default::default()
            }],
        }
    }

    #[test]
    fn test_rohs_term_matches() {
        let matcher = KeywordMatcher::new(&group("RoHS 2.0,RoHS 3", "", ""));
        let rec = record("SGS", "EU publishes RoHS 2.0 exemptions", "https://x.com/a");
        assert_eq!(
            matcher.classify(&rec),
            Relevance::Related(vec!["RoHS 2.0".to_string()])
        );
    }

    #[test]
    fn test_no_match_is_unrelated() {
        let matcher = KeywordMatcher::new(&group("RoHS 2.0", "", ""));
        let rec = record("SGS", "Annual company report", "https://x.com/a");
        assert_eq!(matcher.classify(&rec), Relevance::Unrelated);
    }

    #[test]
    fn test_strip_annotations() {
        assert_eq!(strip_annotations("GB 26572-2025(必追新制)"), "GB 26572-2025");
        assert_eq!(strip_annotations("EN 18031 (must-track)"), "EN 18031");
        assert_eq!(strip_annotations("6GHz（必追新制）"), "6GHz");
        assert_eq!(strip_annotations("Article 3(3)(d)(e)(f)"), "Article 3(3)(d)(e)(f)");
        assert_eq!(strip_annotations("Delegated Reg. (EU) 2022/30"), "Delegated Reg. (EU) 2022/30");
    }

    #[test]
    fn test_annotated_term_matches_plain_text() {
        let matcher = KeywordMatcher::new(&group("", "", "GB 26572-2025(必追新制)"));
        let rec = record("BEICE", "GB 26572-2025 发布", "https://x.com/a");
        assert_eq!(
            matcher.classify(&rec),
            Relevance::Related(vec!["GB 26572-2025".to_string()])
        );
    }

    #[test]
    fn test_terms_are_literal_not_regex() {
        let matcher = KeywordMatcher::new(&group("Part 15.C", "", ""));
        assert_eq!(matcher.classify_text("part 15xc"), Relevance::Unrelated);
        assert!(matcher.classify_text("fcc part 15.c update").is_determined());
    }

    #[test]
    fn test_classification_is_deterministic() {
        let matcher = KeywordMatcher::new(&KeywordConfig::builtin());
        let rec = record("UL", "FCC ID rules for Wi-Fi 6E", "https://x.com/a");
        let first = matcher.classify(&rec);
        for _ in 0..10 {
            assert_eq!(matcher.classify(&rec), first);
        }
        assert!(matches!(first, Relevance::Related(_)));
    }

    #[test]
    fn test_sweep_and_rescan() {
        let storage = MemoryStorage::new();
        for i in 0..5 {
            storage
                .insert_one(&record("SGS", &format!("RoHS 2.0 note {i}"), &format!("https://x.com/{i}")))
                .unwrap();
        }
        storage
            .insert_one(&record("UL", "Office move", "https://y.com/1"))
            .unwrap();
        let matcher = KeywordMatcher::new(&group("RoHS 2.0", "", ""));

        let sgs = classify_pending(&storage, &matcher, Some("SGS"), false, 2).unwrap();
        assert_eq!(sgs.processed, 5);
        assert_eq!(sgs.matched, 5);

        let rest = classify_pending(&storage, &matcher, None, false, 2).unwrap();
        assert_eq!(rest.processed, 1);
        assert_eq!(rest.unmatched, 1);

        let again = classify_pending(&storage, &matcher, None, false, 2).unwrap();
        assert_eq!(again.processed, 0);

        let rescan = classify_pending(&storage, &matcher, None, true, 4).unwrap();
        assert_eq!(rescan.processed, 6);
        assert_eq!(storage.count_by_relevance(None).unwrap().undetermined, 0);
    }
}
