//! Date and field normalization.
//!
//! # Dates
//!
//! [`standardize_date`] turns the date text found on list and detail pages
//! into ISO `yyyy-MM-dd`. Recognised shapes, tried in order:
//!
//! | Shape | Example |
//! |-------|---------|
//! | CJK year/month/day markers | `發布日期：2025年8月14日` |
//! | ISO-like, year first | `2025-8-1`, `2025/08/01`, `2025-08-14T09:00:00Z` |
//! | day before year-month | `14 2025-08` |
//! | US slash | `8/14/2025` |
//! | month name first | `August 14, 2025`, `Aug 14 2025` |
//! | day first, month name | `14 August 2025` |
//!
//! Anything else yields `None`; the [`Normalizer`] then falls back to the
//! crawl date so every record has an effective date.
//!
//! # Secondary fields
//!
//! Country and product tags are pulled from free text with a longest-key-first
//! scan over static keyword tables (see [`TermTable`]).

use crate::ids::IdMinter;
use crate::models::{NormalizedRecord, RawItem, RecordStatus, Relevance, RiskLevel};
use crate::utils::{collapse_whitespace, non_empty, normalize_url, summarize};
use chrono::{DateTime, NaiveDate, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use tracing::debug;

/// Characters kept when a summary is synthesized from body text.
pub const SUMMARY_CHARS: usize = 200;

static CJK_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{4})\s*年\s*(\d{1,2})\s*月\s*(\d{1,2})\s*日").expect("valid regex"));
static ISO_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{4})[-/.](\d{1,2})[-/.](\d{1,2})").expect("valid regex"));
static DAY_YEAR_MONTH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|\D)(\d{1,2})\s+(\d{4})-(\d{1,2})(?:\D|$)").expect("valid regex"));
static US_SLASH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|\D)(\d{1,2})/(\d{1,2})/(\d{4})").expect("valid regex"));
static MONTH_FIRST: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b([a-z]{3,9})\.?\s+(\d{1,2})(?:st|nd|rd|th)?,?\s+(\d{4})").expect("valid regex")
});
static DAY_FIRST: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(\d{1,2})(?:st|nd|rd|th)?\s+([a-z]{3,9})\.?,?\s+(\d{4})").expect("valid regex")
});

const MONTHS: [&str; 12] = [
    "january", "february", "march", "april", "may", "june", "july", "august", "september",
    "october", "november", "december",
];

fn month_from_name(name: &str) -> Option<u32> {
    let name = name.to_ascii_lowercase();
    if name.len() < 3 {
        return None;
    }
    MONTHS
        .iter()
        .position(|full| full.starts_with(&name))
        .map(|i| i as u32 + 1)
}

fn iso(year: &str, month: &str, day: &str) -> Option<String> {
    let date = NaiveDate::from_ymd_opt(year.parse().ok()?, month.parse().ok()?, day.parse().ok()?)?;
    Some(date.format("%Y-%m-%d").to_string())
}

/// Convert heterogeneous date text to ISO `yyyy-MM-dd`.
///
/// Never fails: returns `None` when no rule produces a valid calendar date.
pub fn standardize_date(raw: &str) -> Option<String> {
    let text = raw.trim();
    if text.is_empty() {
        return None;
    }

    if let Some(date) = CJK_DATE.captures(text).and_then(|c| iso(&c[1], &c[2], &c[3])) {
        return Some(date);
    }
    if let Some(date) = ISO_DATE.captures(text).and_then(|c| iso(&c[1], &c[2], &c[3])) {
        return Some(date);
    }
    if let Some(date) = DAY_YEAR_MONTH
        .captures(text)
        .and_then(|c| iso(&c[2], &c[3], &c[1]))
    {
        return Some(date);
    }
    if let Some(date) = US_SLASH.captures(text).and_then(|c| iso(&c[3], &c[1], &c[2])) {
        return Some(date);
    }
    if let Some(date) = MONTH_FIRST.captures(text).and_then(|c| {
        let month = month_from_name(&c[1])?;
        iso(&c[3], &month.to_string(), &c[2])
    }) {
        return Some(date);
    }
    if let Some(date) = DAY_FIRST.captures(text).and_then(|c| {
        let month = month_from_name(&c[2])?;
        iso(&c[3], &month.to_string(), &c[1])
    }) {
        return Some(date);
    }

    debug!(raw = %text, "Unrecognised date text");
    None
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MatchMode {
    /// Keys without lowercase letters ("US", "LTE", "U.S."): case-sensitive, whole word.
    Exact,
    /// Other ASCII keys: ASCII case-insensitive, whole word.
    Folded,
    /// Keys containing non-ASCII text: plain substring.
    Plain,
}

#[derive(Debug, Clone)]
struct TermEntry {
    key: String,
    folded: String,
    canonical: String,
    mode: MatchMode,
}

/// Keyword to canonical-name table scanned longest key first.
///
/// Longer keys claim their span of the text before shorter keys are tried,
/// so "Wi-Fi 6E" is not also reported as "Wi-Fi" and "USA" does not match
/// as "US".
#[derive(Debug, Clone)]
pub struct TermTable {
    entries: Vec<TermEntry>,
}

impl TermTable {
    pub fn new(pairs: &[(&str, &str)]) -> Self {
        let mut entries: Vec<TermEntry> = pairs
            .iter()
            .map(|(key, canonical)| {
                let mode = if !key.is_ascii() {
                    MatchMode::Plain
                } else if key.chars().any(|c| c.is_ascii_lowercase()) {
                    MatchMode::Folded
                } else {
                    MatchMode::Exact
                };
                TermEntry {
                    key: key.to_string(),
                    folded: key.to_ascii_lowercase(),
                    canonical: canonical.to_string(),
                    mode,
                }
            })
            .collect();
        entries.sort_by(|a, b| b.key.chars().count().cmp(&a.key.chars().count()));
        Self { entries }
    }

    /// Canonical name of the longest key found in `text`.
    pub fn first_match(&self, text: &str) -> Option<&str> {
        self.scan(text, true).into_iter().next()
    }

    /// Distinct canonical names found in `text`, longest keys first.
    pub fn all_matches(&self, text: &str) -> Vec<&str> {
        self.scan(text, false)
    }

    fn scan(&self, text: &str, stop_at_first: bool) -> Vec<&str> {
        let folded = text.to_ascii_lowercase();
        let mut taken = vec![false; text.len()];
        let mut found: Vec<&str> = Vec::new();

        for entry in &self.entries {
            let (haystack, needle) = match entry.mode {
                MatchMode::Folded => (folded.as_str(), entry.folded.as_str()),
                MatchMode::Exact | MatchMode::Plain => (text, entry.key.as_str()),
            };
            let mut hit = false;
            for (start, _) in haystack.match_indices(needle) {
                let end = start + needle.len();
                if taken[start..end].iter().any(|t| *t) {
                    continue;
                }
                if entry.mode != MatchMode::Plain && !is_word_boundary(text, start, end) {
                    continue;
                }
                taken[start..end].iter_mut().for_each(|t| *t = true);
                hit = true;
            }
            if hit {
                if !found.contains(&entry.canonical.as_str()) {
                    found.push(entry.canonical.as_str());
                }
                if stop_at_first {
                    break;
                }
            }
        }
        found
    }
}

fn is_word_boundary(text: &str, start: usize, end: usize) -> bool {
    let before = text[..start].chars().next_back();
    let after = text[end..].chars().next();
    !before.is_some_and(|c| c.is_ascii_alphanumeric()) && !after.is_some_and(|c| c.is_ascii_alphanumeric())
}

const COUNTRY_TERMS: &[(&str, &str)] = &[
    ("United States", "United States"),
    ("USA", "United States"),
    ("U.S.", "United States"),
    ("US", "United States"),
    ("美国", "United States"),
    ("美國", "United States"),
    ("China", "China"),
    ("CN", "China"),
    ("中国", "China"),
    ("中國", "China"),
    ("European Union", "European Union"),
    ("EU", "European Union"),
    ("欧盟", "European Union"),
    ("歐盟", "European Union"),
    ("Japan", "Japan"),
    ("JP", "Japan"),
    ("日本", "Japan"),
    ("South Korea", "South Korea"),
    ("Korea", "South Korea"),
    ("KR", "South Korea"),
    ("韩国", "South Korea"),
    ("韓國", "South Korea"),
    ("Taiwan", "Taiwan"),
    ("TW", "Taiwan"),
    ("台湾", "Taiwan"),
    ("台灣", "Taiwan"),
    ("Hong Kong", "Hong Kong"),
    ("HK", "Hong Kong"),
    ("香港", "Hong Kong"),
    ("Singapore", "Singapore"),
    ("SG", "Singapore"),
    ("新加坡", "Singapore"),
    ("Australia", "Australia"),
    ("AU", "Australia"),
    ("澳大利亚", "Australia"),
    ("澳洲", "Australia"),
    ("Canada", "Canada"),
    ("加拿大", "Canada"),
    ("United Kingdom", "United Kingdom"),
    ("UK", "United Kingdom"),
    ("英国", "United Kingdom"),
    ("英國", "United Kingdom"),
    ("Germany", "Germany"),
    ("德国", "Germany"),
    ("德國", "Germany"),
    ("France", "France"),
    ("法国", "France"),
    ("法國", "France"),
    ("India", "India"),
    ("印度", "India"),
    ("Indonesia", "Indonesia"),
    ("印尼", "Indonesia"),
    ("印度尼西亚", "Indonesia"),
    ("Thailand", "Thailand"),
    ("泰国", "Thailand"),
    ("泰國", "Thailand"),
    ("Vietnam", "Vietnam"),
    ("越南", "Vietnam"),
    ("Malaysia", "Malaysia"),
    ("马来西亚", "Malaysia"),
    ("馬來西亞", "Malaysia"),
    ("Philippines", "Philippines"),
    ("菲律宾", "Philippines"),
    ("Brazil", "Brazil"),
    ("巴西", "Brazil"),
    ("Mexico", "Mexico"),
    ("墨西哥", "Mexico"),
    ("Saudi Arabia", "Saudi Arabia"),
    ("沙特", "Saudi Arabia"),
    ("UAE", "United Arab Emirates"),
    ("阿联酋", "United Arab Emirates"),
    ("South Africa", "South Africa"),
    ("南非", "South Africa"),
    ("Israel", "Israel"),
    ("以色列", "Israel"),
    ("Russia", "Russia"),
    ("俄罗斯", "Russia"),
];

const PRODUCT_TERMS: &[(&str, &str)] = &[
    ("Wi-Fi 6E", "Wi-Fi 6E"),
    ("Wi-Fi 7", "Wi-Fi 7"),
    ("Wi-Fi", "Wi-Fi"),
    ("WiFi", "Wi-Fi"),
    ("WLAN", "Wi-Fi"),
    ("Bluetooth", "Bluetooth"),
    ("蓝牙", "Bluetooth"),
    ("藍牙", "Bluetooth"),
    ("5G", "5G"),
    ("LTE", "LTE"),
    ("NFC", "NFC"),
    ("RFID", "RFID"),
    ("UWB", "UWB"),
    ("Zigbee", "Zigbee"),
    ("power adapter", "Power Adapter"),
    ("电源适配器", "Power Adapter"),
    ("電源適配器", "Power Adapter"),
    ("power supply", "Power Supply"),
    ("EV charger", "EV Charger"),
    ("charger", "Charger"),
    ("充电器", "Charger"),
    ("battery", "Battery"),
    ("batteries", "Battery"),
    ("电池", "Battery"),
    ("電池", "Battery"),
    ("laptop", "Laptop"),
    ("笔记本电脑", "Laptop"),
    ("smartphone", "Mobile Phone"),
    ("mobile phone", "Mobile Phone"),
    ("手机", "Mobile Phone"),
    ("手機", "Mobile Phone"),
    ("tablet", "Tablet"),
    ("smart watch", "Wearable"),
    ("wearable", "Wearable"),
    ("router", "Router"),
    ("路由器", "Router"),
    ("toys", "Toy"),
    ("toy", "Toy"),
    ("玩具", "Toy"),
    ("medical device", "Medical Device"),
    ("医疗器械", "Medical Device"),
    ("lighting", "Lighting"),
    ("LED", "Lighting"),
    ("照明", "Lighting"),
    ("household appliance", "Household Appliance"),
    ("家电", "Household Appliance"),
    ("electric vehicle", "Electric Vehicle"),
    ("电动汽车", "Electric Vehicle"),
    ("cosmetics", "Cosmetics"),
    ("化妆品", "Cosmetics"),
    ("food contact", "Food Contact Material"),
    ("食品接触", "Food Contact Material"),
    ("textile", "Textile"),
    ("纺织", "Textile"),
];

static COUNTRIES: Lazy<TermTable> = Lazy::new(|| TermTable::new(COUNTRY_TERMS));
static PRODUCTS: Lazy<TermTable> = Lazy::new(|| TermTable::new(PRODUCT_TERMS));

/// Canonical country name mentioned in `text`, longest keyword first.
pub fn extract_country(text: &str) -> Option<String> {
    COUNTRIES.first_match(text).map(str::to_string)
}

/// Comma-joined canonical product tags mentioned in `text`.
pub fn extract_products(text: &str) -> Option<String> {
    let found = PRODUCTS.all_matches(text);
    if found.is_empty() {
        None
    } else {
        Some(found.join(", "))
    }
}

/// Turns [`RawItem`]s into [`NormalizedRecord`]s for one run.
#[derive(Debug, Clone)]
pub struct Normalizer {
    ids: Arc<IdMinter>,
}

impl Normalizer {
    pub fn new(ids: Arc<IdMinter>) -> Self {
        Self { ids }
    }

    pub fn normalize(&self, raw: RawItem, source_name: &str) -> NormalizedRecord {
        self.normalize_at(raw, source_name, Utc::now())
    }

    /// Normalize with an explicit crawl time.
    ///
    /// The crawl time supplies the fallback date when the raw date text is
    /// missing or unrecognised.
    pub fn normalize_at(&self, raw: RawItem, source_name: &str, now: DateTime<Utc>) -> NormalizedRecord {
        let title = collapse_whitespace(&raw.title);
        let url = raw.url.trim().to_string();

        let raw_date_text = raw.raw_date_text.and_then(non_empty);
        let canonical_date = raw_date_text.as_deref().and_then(standardize_date);
        let effective_date = match &canonical_date {
            Some(date) => date.clone(),
            None => {
                debug!(%url, raw_date = ?raw_date_text, "No usable date; using crawl date");
                now.date_naive().format("%Y-%m-%d").to_string()
            }
        };

        let body_text = raw.body_text.map(|b| collapse_whitespace(&b)).and_then(non_empty);
        let summary = raw
            .summary
            .map(|s| collapse_whitespace(&s))
            .and_then(non_empty)
            .or_else(|| body_text.as_deref().and_then(|b| summarize(b, SUMMARY_CHARS)));

        let headline = format!("{} {}", title, summary.as_deref().unwrap_or(""));
        let country = raw
            .country
            .and_then(non_empty)
            .or_else(|| extract_country(&headline));
        let product_tags = raw
            .product_tags
            .and_then(non_empty)
            .or_else(|| extract_products(&headline));

        NormalizedRecord {
            id: self.ids.mint(source_name, now),
            source_name: source_name.to_string(),
            normalized_url: normalize_url(&url),
            title,
            url,
            raw_date_text,
            canonical_date,
            effective_date,
            summary,
            body_text,
            country,
            product_tags,
            standard: raw.standard.and_then(non_empty),
            item_type: raw.item_type.and_then(non_empty),
            crawl_time: now,
            status: RecordStatus::New,
            is_processed: false,
            relevance: Relevance::Undetermined,
            risk_level: RiskLevel::Medium,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_standardize_day_year_month() {
        assert_eq!(standardize_date("14 2025-08").as_deref(), Some("2025-08-14"));
        assert_eq!(standardize_date(" 3 2024-1 ").as_deref(), Some("2024-01-03"));
    }

    #[test]
    fn test_standardize_iso_padding() {
        assert_eq!(standardize_date("2025-8-1").as_deref(), Some("2025-08-01"));
        assert_eq!(standardize_date("2025/08/14").as_deref(), Some("2025-08-14"));
        assert_eq!(
            standardize_date("2025-08-14T09:30:00Z").as_deref(),
            Some("2025-08-14")
        );
    }

    #[test]
    fn test_standardize_cjk_markers() {
        assert_eq!(
            standardize_date("發布日期：2025年8月14日").as_deref(),
            Some("2025-08-14")
        );
        assert_eq!(standardize_date("2024 年 12 月 3 日").as_deref(), Some("2024-12-03"));
    }

    #[test]
    fn test_standardize_month_names() {
        assert_eq!(standardize_date("August 14, 2025").as_deref(), Some("2025-08-14"));
        assert_eq!(standardize_date("Sept. 2 2024").as_deref(), Some("2024-09-02"));
        assert_eq!(standardize_date("14 Aug 2025").as_deref(), Some("2025-08-14"));
        assert_eq!(standardize_date("3rd March, 2025").as_deref(), Some("2025-03-03"));
    }

    #[test]
    fn test_standardize_us_slash() {
        assert_eq!(standardize_date("8/14/2025").as_deref(), Some("2025-08-14"));
    }

    #[test]
    fn test_standardize_unparseable() {
        assert_eq!(standardize_date("yesterday"), None);
        assert_eq!(standardize_date(""), None);
        assert_eq!(standardize_date("2025-13-45"), None);
        assert_eq!(standardize_date("Foo 12, 2025"), None);
    }

    #[test]
    fn test_country_longest_first() {
        assert_eq!(
            extract_country("New FCC rules in the USA").as_deref(),
            Some("United States")
        );
        assert_eq!(
            extract_country("South Korea updates KC mark").as_deref(),
            Some("South Korea")
        );
        assert_eq!(extract_country("a bus timetable").as_deref(), None);
        assert_eq!(extract_country("[欧盟] RED 指令").as_deref(), Some("European Union"));
    }

    #[test]
    fn test_products_mask_shorter_keys() {
        assert_eq!(
            extract_products("Indonesia opens 6GHz for Wi-Fi 6E routers").as_deref(),
            Some("Wi-Fi 6E")
        );
        assert_eq!(
            extract_products("Bluetooth and Wi-Fi modules, power adapter").as_deref(),
            Some("Power Adapter, Bluetooth, Wi-Fi")
        );
        assert_eq!(extract_products("she led the review"), None);
    }

    #[test]
    fn test_normalizer_fills_fallbacks() {
        let normalizer = Normalizer::new(Arc::new(IdMinter::new()));
        let now = Utc.with_ymd_and_hms(2025, 9, 1, 12, 0, 0).unwrap();
        let mut raw = RawItem::new("  Japan  MIC\nupdate ", "HTTP://Example.com/News/1/");
        raw.raw_date_text = Some("sometime soon".to_string());
        raw.body_text = Some("The ministry announced new Wi-Fi 6E limits. ".repeat(10));

        let record = normalizer.normalize_at(raw, "beice", now);

        assert_eq!(record.title, "Japan MIC update");
        assert_eq!(record.normalized_url, "https://example.com/news/1");
        assert_eq!(record.canonical_date, None);
        assert_eq!(record.effective_date, "2025-09-01");
        assert!(record.summary.as_deref().unwrap().ends_with("..."));
        assert_eq!(record.country.as_deref(), Some("Japan"));
        assert_eq!(record.product_tags.as_deref(), Some("Wi-Fi 6E"));
        assert!(record.id.starts_with("BEICE_"));
        assert_eq!(record.status, RecordStatus::New);
        assert_eq!(record.relevance, Relevance::Undetermined);
    }

    #[test]
    fn test_normalizer_keeps_extracted_fields() {
        let normalizer = Normalizer::new(Arc::new(IdMinter::new()));
        let mut raw = RawItem::new("Notice", "https://x.com/a");
        raw.raw_date_text = Some("14 2025-08".to_string());
        raw.country = Some("Taiwan".to_string());
        raw.summary = Some("From the list page".to_string());

        let record = normalizer.normalize(raw, "UL");
        assert_eq!(record.canonical_date.as_deref(), Some("2025-08-14"));
        assert_eq!(record.effective_date, "2025-08-14");
        assert_eq!(record.country.as_deref(), Some("Taiwan"));
        assert_eq!(record.summary.as_deref(), Some("From the list page"));
    }
}
