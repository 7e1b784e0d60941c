//! # certnews_crawler
//!
//! Incremental ingestion of regulatory and certification news. Items are
//! crawled from several sites, normalized into one record shape, deduplicated
//! by URL against what is already stored, persisted in batches and tagged
//! related or unrelated by a keyword classifier.
//!
//! ## Sources
//!
//! - SGS knowledge center (JSON "filtered list" API)
//! - UL GMA news (single HTML page, table-based detail pages)
//! - Beice / NTEK news (numbered HTML list pages)
//!
//! ## Architecture
//!
//! Data flows one way through the pipeline:
//! 1. **Paging**: [`pagination::Paginator`] drives a [`sources::Source`]
//!    page by page with retries, backoff and politeness delays
//! 2. **Normalizing**: [`normalize::Normalizer`] parses dates and fills
//!    country / product fields
//! 3. **Dedup**: [`dedup::filter_new`] drops URLs that are already stored
//! 4. **Persisting**: [`persist::BatchPersister`] writes bounded chunks with a
//!    per-record fallback
//! 5. **Classifying**: [`classifier::KeywordMatcher`] runs inline or as a
//!    later sweep ([`classifier::classify_pending`])
//!
//! [`run_crawl`] ties the steps together for one source and always returns a
//! [`CrawlSummary`]; [`pipeline::run_all`] runs several sources concurrently.

pub mod backoff;
pub mod classifier;
pub mod config;
pub mod dedup;
pub mod error;
pub mod extract;
pub mod fetcher;
pub mod ids;
pub mod models;
pub mod normalize;
pub mod outputs;
pub mod pagination;
pub mod persist;
pub mod pipeline;
pub mod sources;
pub mod storage;
pub mod utils;

pub use config::{AppConfig, CrawlerConfig, DedupScope, KeywordConfig};
pub use error::CrawlError;
pub use models::{CrawlSummary, NormalizedRecord, RawItem, Relevance, StopReason};
pub use pipeline::{CrawlContext, run_all, run_crawl};
pub use sources::{Source, SourceKind};
pub use storage::{Storage, StorageError};
