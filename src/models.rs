//! Data models for crawled items and their stored representation.
//!
//! - [`RawItem`]: what a source extractor pulls out of a page
//! - [`Detail`]: extra fields found on an item's detail page
//! - [`NormalizedRecord`]: the unit handed to dedup, persistence and classification
//! - [`Relevance`]: the classifier's three-state verdict
//! - [`CrawlSummary`]: the report of one source's crawl run

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// An item as extracted from a list page, before normalization.
///
/// The URL is the item's only identity; nothing else is unique.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawItem {
    pub title: String,
    pub url: String,
    pub raw_date_text: Option<String>,
    pub summary: Option<String>,
    pub body_text: Option<String>,
    pub country: Option<String>,
    pub product_tags: Option<String>,
    pub standard: Option<String>,
    pub item_type: Option<String>,
}

impl RawItem {
    pub fn new(title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
            ..Default::default()
        }
    }

    /// An item is kept only when it has both a title and a URL.
    pub fn is_usable(&self) -> bool {
        !self.title.trim().is_empty() && !self.url.trim().is_empty()
    }

    /// Case-insensitive keyword check against title and summary.
    pub fn mentions(&self, keyword: &str) -> bool {
        let needle = keyword.trim().to_lowercase();
        if needle.is_empty() {
            return true;
        }
        self.title.to_lowercase().contains(&needle)
            || self
                .summary
                .as_deref()
                .is_some_and(|s| s.to_lowercase().contains(&needle))
    }

    /// Merge detail-page fields into this item.
    ///
    /// A field is only written when it is still empty on the item, so a
    /// value already taken from the list page always wins.
    ///
    /// # Returns
    ///
    /// The number of fields that were filled in.
    pub fn enrich(&mut self, detail: Detail) -> usize {
        let mut filled = 0;
        for (slot, value) in [
            (&mut self.raw_date_text, detail.raw_date_text),
            (&mut self.summary, detail.summary),
            (&mut self.body_text, detail.body_text),
            (&mut self.country, detail.country),
            (&mut self.product_tags, detail.product_tags),
            (&mut self.standard, detail.standard),
        ] {
            let missing = slot.as_deref().is_none_or(|s| s.trim().is_empty());
            if let Some(v) = value.filter(|v| !v.trim().is_empty()) {
                if missing {
                    *slot = Some(v);
                    filled += 1;
                }
            }
        }
        filled
    }
}

/// Fields recovered from an item's detail page. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Detail {
    pub raw_date_text: Option<String>,
    pub summary: Option<String>,
    pub body_text: Option<String>,
    pub country: Option<String>,
    pub product_tags: Option<String>,
    pub standard: Option<String>,
}

impl Detail {
    pub fn is_empty(&self) -> bool {
        *self == Detail::default()
    }
}

/// Lifecycle status of a stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordStatus {
    New,
    Duplicate,
    Processing,
    Processed,
    Error,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::New => "NEW",
            RecordStatus::Duplicate => "DUPLICATE",
            RecordStatus::Processing => "PROCESSING",
            RecordStatus::Processed => "PROCESSED",
            RecordStatus::Error => "ERROR",
        }
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NEW" => Ok(RecordStatus::New),
            "DUPLICATE" => Ok(RecordStatus::Duplicate),
            "PROCESSING" => Ok(RecordStatus::Processing),
            "PROCESSED" => Ok(RecordStatus::Processed),
            "ERROR" => Ok(RecordStatus::Error),
            other => Err(format!("unknown record status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Low,
    #[default]
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
        }
    }
}

impl FromStr for RiskLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LOW" => Ok(RiskLevel::Low),
            "MEDIUM" => Ok(RiskLevel::Medium),
            "HIGH" => Ok(RiskLevel::High),
            other => Err(format!("unknown risk level: {other}")),
        }
    }
}

/// Topical relevance of a record.
///
/// `Undetermined` only exists before the classifier has visited a record;
/// the classifier itself always answers `Related` or `Unrelated`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "keywords", rename_all = "snake_case")]
pub enum Relevance {
    #[default]
    Undetermined,
    Related(Vec<String>),
    Unrelated,
}

impl Relevance {
    /// The nullable-boolean view used by storage columns.
    pub fn as_flag(&self) -> Option<bool> {
        match self {
            Relevance::Undetermined => None,
            Relevance::Related(_) => Some(true),
            Relevance::Unrelated => Some(false),
        }
    }

    /// Matched keywords joined with commas, if any.
    pub fn matched_keywords(&self) -> Option<String> {
        match self {
            Relevance::Related(keywords) if !keywords.is_empty() => Some(keywords.join(",")),
            _ => None,
        }
    }

    /// Rebuild from the stored flag and keyword columns.
    pub fn from_columns(related: Option<bool>, keywords: Option<String>) -> Self {
        match related {
            None => Relevance::Undetermined,
            Some(false) => Relevance::Unrelated,
            Some(true) => Relevance::Related(
                keywords
                    .map(|k| {
                        k.split(',')
                            .map(str::trim)
                            .filter(|s| !s.is_empty())
                            .map(String::from)
                            .collect()
                    })
                    .unwrap_or_default(),
            ),
        }
    }

    pub fn is_determined(&self) -> bool {
        !matches!(self, Relevance::Undetermined)
    }
}

/// A normalized item, ready for dedup and persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    /// Run-scoped identifier, see [`crate::ids::IdMinter`].
    pub id: String,
    pub source_name: String,
    pub title: String,
    pub url: String,
    /// Dedup identity, see [`crate::utils::normalize_url`].
    pub normalized_url: String,
    pub raw_date_text: Option<String>,
    /// ISO `yyyy-MM-dd` when the raw date text was recognised.
    pub canonical_date: Option<String>,
    /// `canonical_date`, or the crawl date when it was not recognised.
    pub effective_date: String,
    pub summary: Option<String>,
    pub body_text: Option<String>,
    pub country: Option<String>,
    pub product_tags: Option<String>,
    pub standard: Option<String>,
    pub item_type: Option<String>,
    pub crawl_time: DateTime<Utc>,
    pub status: RecordStatus,
    pub is_processed: bool,
    pub relevance: Relevance,
    pub risk_level: RiskLevel,
}

impl NormalizedRecord {
    /// Title, summary, body, product, type and country joined into one
    /// lowercase blob for keyword matching.
    pub fn search_text(&self) -> String {
        let parts = [
            Some(self.title.as_str()),
            self.summary.as_deref(),
            self.body_text.as_deref(),
            self.product_tags.as_deref(),
            self.item_type.as_deref(),
            self.country.as_deref(),
        ];
        let mut blob = String::new();
        for part in parts.into_iter().flatten() {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            blob.push_str(&part.to_lowercase());
            blob.push(' ');
        }
        blob
    }
}

/// Why a source's page loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The requested number of items was collected.
    TargetReached,
    /// The failure ceiling was reached on empty pages only.
    Exhausted,
    /// The failure ceiling was reached and fetch errors were involved.
    FailureCeiling,
    /// Too many consecutive batches were entirely duplicates.
    DuplicateCeiling,
    /// The source's hard page limit was passed.
    MaxPages,
    /// The deadline passed or the run was cancelled between pages.
    Cancelled,
    /// The task was abandoned by the outer wall-clock budget.
    Aborted,
}

impl StopReason {
    /// Whether a run ending this way should be reported as degraded.
    pub fn is_partial(&self) -> bool {
        matches!(
            self,
            StopReason::FailureCeiling | StopReason::Cancelled | StopReason::Aborted
        )
    }
}

/// Report of one source's crawl run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlSummary {
    pub source: String,
    pub target: usize,
    pub stop_reason: StopReason,
    pub partial: bool,
    pub pages_fetched: usize,
    pub pages_failed: usize,
    pub items_extracted: usize,
    pub detail_failures: usize,
    pub duplicates_skipped: usize,
    pub saved: usize,
    pub persist_conflicts: usize,
    pub persist_failures: usize,
    pub classified_related: usize,
    pub classified_unrelated: usize,
    pub stored_before: Option<u64>,
    pub stored_after: Option<u64>,
    pub status_counts: BTreeMap<String, u64>,
    pub errors: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

impl CrawlSummary {
    pub fn new(source: impl Into<String>, target: usize) -> Self {
        Self {
            source: source.into(),
            target,
            stop_reason: StopReason::Exhausted,
            partial: false,
            pages_fetched: 0,
            pages_failed: 0,
            items_extracted: 0,
            detail_failures: 0,
            duplicates_skipped: 0,
            saved: 0,
            persist_conflicts: 0,
            persist_failures: 0,
            classified_related: 0,
            classified_unrelated: 0,
            stored_before: None,
            stored_after: None,
            status_counts: BTreeMap::new(),
            errors: Vec::new(),
            started_at: Utc::now(),
            elapsed_ms: 0,
        }
    }

    /// Summary for a source whose task never reported back.
    pub fn aborted(source: impl Into<String>, target: usize, reason: impl Into<String>) -> Self {
        let mut summary = Self::new(source, target);
        summary.stop_reason = StopReason::Aborted;
        summary.partial = true;
        summary.errors.push(reason.into());
        summary
    }
}
