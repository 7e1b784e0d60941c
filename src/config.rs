//! # Configuration
//!
//! Runtime configuration for crawling and classification, loaded from an
//! optional YAML file and overridden by CLI flags.
//!
//! ## Key Components
//!
//! - [`CrawlerConfig`]: request profile, pacing, ceilings and batch sizes,
//!   with a builder ([`CrawlerConfigBuilder`])
//! - [`KeywordConfig`]: named keyword groups for the relevance classifier
//! - [`AppConfig`]: the YAML document holding both
//!
//! ## Example file
//!
//! ```yaml
//! crawler:
//!   politeness_delay_ms: 3000
//!   dedup_scope: per_source
//! keywords:
//!   groups:
//!     - name: USA
//!       primary_terms: "FCC ID,Equipment Authorization"
//!       local_terms: "SDoC"
//!       extended_terms: "permissive change"
//! ```

use crate::backoff::BackoffPolicy;
use crate::fetcher::DEFAULT_USER_AGENT;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while loading configuration files.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid YAML in {path}: {source}")]
    Yaml {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Which stored records count as "already known" during dedup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupScope {
    /// A URL stored by any source is a duplicate.
    #[default]
    Global,
    /// Only URLs stored by the same source are duplicates.
    PerSource,
}

/// Crawl behaviour shared by every source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlerConfig {
    /// User agent sent with every request
    pub user_agent: String,

    /// Per-request timeout in milliseconds
    pub timeout_ms: u64,

    /// Attempts per page before the page is given up
    pub page_retry_limit: u32,

    /// Delay between successive list pages in milliseconds
    pub politeness_delay_ms: u64,

    /// Delay between detail-page fetches in milliseconds
    pub detail_delay_ms: u64,

    /// Consecutive empty or failed pages tolerated before stopping
    pub failure_ceiling: u32,

    /// Consecutive all-duplicate batches tolerated before stopping
    pub duplicate_batch_ceiling: u32,

    /// Records per bulk insert
    pub batch_size: usize,

    pub dedup_scope: DedupScope,

    /// Overrides the source's own page limit when set
    pub max_pages: Option<usize>,

    /// Only keep items mentioning this keyword in title or summary
    pub keyword: Option<String>,

    /// Classify records right after they are persisted
    pub classify_inline: bool,

    /// Wall-clock budget of a whole multi-source run in seconds
    pub run_budget_secs: u64,

    pub rate_limited_backoff_ms: u64,
    pub blocked_backoff_ms: u64,
    pub transient_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout_ms: 30_000,
            page_retry_limit: 3,
            politeness_delay_ms: 2_000,
            detail_delay_ms: 1_000,
            failure_ceiling: 5,
            duplicate_batch_ceiling: 10,
            batch_size: 20,
            dedup_scope: DedupScope::Global,
            max_pages: None,
            keyword: None,
            classify_inline: false,
            run_budget_secs: 30 * 60,
            rate_limited_backoff_ms: 10_000,
            blocked_backoff_ms: 5_000,
            transient_backoff_ms: 3_000,
            max_backoff_ms: 60_000,
        }
    }
}

impl CrawlerConfig {
    /// Create a new builder
    pub fn builder() -> CrawlerConfigBuilder {
        CrawlerConfigBuilder::new()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn politeness_delay(&self) -> Duration {
        Duration::from_millis(self.politeness_delay_ms)
    }

    pub fn detail_delay(&self) -> Duration {
        Duration::from_millis(self.detail_delay_ms)
    }

    pub fn run_budget(&self) -> Duration {
        Duration::from_secs(self.run_budget_secs)
    }

    /// Backoff policy built from the configured per-class delays.
    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            Duration::from_millis(self.rate_limited_backoff_ms),
            Duration::from_millis(self.blocked_backoff_ms),
            Duration::from_millis(self.transient_backoff_ms),
            Duration::from_millis(self.max_backoff_ms),
        )
    }
}

/// Builder for [`CrawlerConfig`]
#[derive(Debug, Default)]
pub struct CrawlerConfigBuilder {
    config: CrawlerConfig,
}

impl CrawlerConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: CrawlerConfig::default(),
        }
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.config.timeout_ms = timeout_ms;
        self
    }

    pub fn page_retry_limit(mut self, limit: u32) -> Self {
        self.config.page_retry_limit = limit;
        self
    }

    pub fn politeness_delay_ms(mut self, delay_ms: u64) -> Self {
        self.config.politeness_delay_ms = delay_ms;
        self
    }

    pub fn detail_delay_ms(mut self, delay_ms: u64) -> Self {
        self.config.detail_delay_ms = delay_ms;
        self
    }

    pub fn failure_ceiling(mut self, ceiling: u32) -> Self {
        self.config.failure_ceiling = ceiling;
        self
    }

    pub fn duplicate_batch_ceiling(mut self, ceiling: u32) -> Self {
        self.config.duplicate_batch_ceiling = ceiling;
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.config.batch_size = batch_size.max(1);
        self
    }

    pub fn dedup_scope(mut self, scope: DedupScope) -> Self {
        self.config.dedup_scope = scope;
        self
    }

    pub fn max_pages(mut self, max_pages: Option<usize>) -> Self {
        self.config.max_pages = max_pages;
        self
    }

    pub fn keyword(mut self, keyword: Option<String>) -> Self {
        self.config.keyword = keyword.filter(|k| !k.trim().is_empty());
        self
    }

    pub fn classify_inline(mut self, classify_inline: bool) -> Self {
        self.config.classify_inline = classify_inline;
        self
    }

    pub fn run_budget_secs(mut self, secs: u64) -> Self {
        self.config.run_budget_secs = secs;
        self
    }

    /// Set all backoff base delays at once, in milliseconds.
    pub fn backoff_ms(mut self, rate_limited: u64, blocked: u64, transient: u64) -> Self {
        self.config.rate_limited_backoff_ms = rate_limited;
        self.config.blocked_backoff_ms = blocked;
        self.config.transient_backoff_ms = transient;
        self
    }

    pub fn build(self) -> CrawlerConfig {
        self.config
    }
}

/// One market's keyword group.
///
/// The three term lists are comma separated. Terms may carry annotations in
/// parentheses such as `(必追新制)` or `(must-track)`; those are stripped by
/// the classifier before matching.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeywordGroup {
    pub name: String,
    pub region_name: String,
    pub authority: String,
    pub primary_terms: String,
    pub local_terms: String,
    pub extended_terms: String,
}

impl KeywordGroup {
    fn new(
        name: &str,
        region_name: &str,
        authority: &str,
        primary_terms: &str,
        local_terms: &str,
        extended_terms: &str,
    ) -> Self {
        Self {
            name: name.to_string(),
            region_name: region_name.to_string(),
            authority: authority.to_string(),
            primary_terms: primary_terms.to_string(),
            local_terms: local_terms.to_string(),
            extended_terms: extended_terms.to_string(),
        }
    }
}

/// Ordered keyword groups for the relevance classifier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeywordConfig {
    pub groups: Vec<KeywordGroup>,
}

impl KeywordConfig {
    /// Built-in market keyword groups.
    pub fn builtin() -> Self {
        Self {
            groups: vec![
                KeywordGroup::new(
                    "OVERSEAS",
                    "Overseas",
                    "Global",
                    "RoHS 2.0,RoHS 3,Restriction of Hazardous Substances",
                    "有害物質限制,RoHS",
                    "IEC 62321,harmonised",
                ),
                KeywordGroup::new(
                    "CHINA",
                    "China",
                    "MIIT/SAMR",
                    "China RoHS,GB/T 39560,CMIIT ID,SRRC",
                    "中国RoHS,有害物质限制,型号核准",
                    "GB 26572-2025(必追新制),SJ/T 11364",
                ),
                KeywordGroup::new(
                    "USA",
                    "USA",
                    "FCC",
                    "FCC ID,Equipment Authorization,Part 15B,Part 15C,Part 15E",
                    "SDoC,KDB 447498,KDB 996369",
                    "permissive change,grant",
                ),
                KeywordGroup::new(
                    "EU_RED_BASE",
                    "EU",
                    "EC/ETSI",
                    "CE RED 2014/53/EU,EN 300 328,EN 301 893,EN 301 489-1,EN 301 489-17",
                    "協調標準,DoC,NB",
                    "OJEU,EN 62311,EN IEC 62368-1",
                ),
                KeywordGroup::new(
                    "EU_RED_CYBER",
                    "EU",
                    "EC",
                    "EN 18031-1,EN 18031-2,EN 18031-3,RED cybersecurity",
                    "資安,隱私,欺詐",
                    "Delegated Reg. (EU) 2022/30,Article 3(3)(d)(e)(f),2025-08-01(必追新制)",
                ),
                KeywordGroup::new(
                    "TAIWAN",
                    "Taiwan",
                    "NCC",
                    "NCC Type Approval,LP0002,低功率射頻電機",
                    "型式認證,審驗合格標籤",
                    "6GHz 擴頻公告(必追新制),2024-02实施",
                ),
                KeywordGroup::new(
                    "KOREA",
                    "Korea",
                    "RRA/KC",
                    "KC Conformity,적합등록,적합인증",
                    "국립전파연구원,무선설비",
                    "EMC,전기안전",
                ),
                KeywordGroup::new(
                    "INDONESIA",
                    "Indonesia",
                    "SDPPI/Kominfo",
                    "SDPPI Type Approval,Postel,Wi-Fi 6E,KEPDIRJEN 161/2022",
                    "認證,公告",
                    "6GHz 規範(必追新制)",
                ),
                KeywordGroup::new(
                    "INDIA",
                    "India",
                    "WPC",
                    "WPC ETA,Equipment Type Approval",
                    "自我聲明,進口備案",
                    "Wi-Fi,2.4 GHz,5 GHz,6 GHz",
                ),
            ],
        }
    }

    /// Load keyword groups from a YAML file holding a `groups:` list.
    ///
    /// Falls back to [`KeywordConfig::builtin`] when the file has no groups.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config: KeywordConfig = read_yaml(path.as_ref())?;
        Ok(config.or_builtin())
    }

    /// This configuration, or the built-in groups when it is empty.
    pub fn or_builtin(self) -> Self {
        if self.groups.is_empty() {
            Self::builtin()
        } else {
            self
        }
    }
}

/// Top-level YAML configuration document. Every section is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub crawler: CrawlerConfig,
    pub keywords: KeywordConfig,
}

impl AppConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let mut config: AppConfig = read_yaml(path.as_ref())?;
        config.keywords = config.keywords.or_builtin();
        Ok(config)
    }

    /// Load from `path` when given, otherwise use defaults with built-in keywords.
    pub fn load_or_default(path: Option<&str>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self {
                crawler: CrawlerConfig::default(),
                keywords: KeywordConfig::builtin(),
            }),
        }
    }
}

fn read_yaml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let display = path.display().to_string();
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: display.clone(),
        source,
    })?;
    serde_yaml::from_str(&text).map_err(|source| ConfigError::Yaml {
        path: display,
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = CrawlerConfig::default();
        assert_eq!(config.page_retry_limit, 3);
        assert_eq!(config.failure_ceiling, 5);
        assert_eq!(config.batch_size, 20);
        assert_eq!(config.run_budget(), Duration::from_secs(1800));
        assert!(config.user_agent.starts_with("Mozilla/5.0"));
    }

    #[test]
    fn test_builder() {
        let config = CrawlerConfig::builder()
            .politeness_delay_ms(0)
            .batch_size(0)
            .keyword(Some("  ".to_string()))
            .dedup_scope(DedupScope::PerSource)
            .build();
        assert_eq!(config.politeness_delay(), Duration::ZERO);
        assert_eq!(config.batch_size, 1);
        assert_eq!(config.keyword, None);
        assert_eq!(config.dedup_scope, DedupScope::PerSource);
    }

    #[test]
    fn test_builtin_keywords() {
        let keywords = KeywordConfig::builtin();
        assert_eq!(keywords.groups.len(), 9);
        assert_eq!(keywords.groups[0].name, "OVERSEAS");
        assert!(keywords.groups[0].primary_terms.contains("RoHS 2.0"));
    }

    #[test]
    fn test_app_config_partial_yaml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "crawler:\n  politeness_delay_ms: 10\n  dedup_scope: per_source\nkeywords:\n  groups:\n    - name: TEST\n      primary_terms: \"EN 18031-1\"\n"
        )
        .unwrap();

        let config = AppConfig::load(file.path()).unwrap();
        assert_eq!(config.crawler.politeness_delay_ms, 10);
        assert_eq!(config.crawler.dedup_scope, DedupScope::PerSource);
        assert_eq!(config.crawler.page_retry_limit, 3);
        assert_eq!(config.keywords.groups.len(), 1);
        assert_eq!(config.keywords.groups[0].local_terms, "");
    }

    #[test]
    fn test_empty_keyword_file_uses_builtin() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "groups: []").unwrap();
        let keywords = KeywordConfig::load(file.path()).unwrap();
        assert_eq!(keywords, KeywordConfig::builtin());
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = AppConfig::load("/nonexistent/certnews.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
