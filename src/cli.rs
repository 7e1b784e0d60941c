//! Command-line interface definitions for the `certnews` binary.
//!
//! Global options select the database, configuration file and report
//! directory; each can also come from an environment variable. The work
//! itself is done by one of three subcommands.

use certnews_crawler::config::{CrawlerConfig, DedupScope};
use certnews_crawler::sources::SourceKind;
use clap::{Args, Parser, Subcommand};
use itertools::Itertools;

/// Command-line arguments for the `certnews` binary.
///
/// # Examples
///
/// ```sh
/// # Crawl every source, 50 items each, into ./certnews.db
/// certnews crawl --all --target 50
///
/// # Crawl SGS and Beice for one keyword, classifying as records are stored
/// certnews crawl --source sgs,beice --keyword "EN 18031" --classify
///
/// # Classify what is still pending, then look at the counts
/// certnews classify
/// certnews stats
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// SQLite database file
    #[arg(long, env = "CERTNEWS_DB", default_value = "certnews.db")]
    pub db: String,

    /// Optional path to a YAML configuration file
    #[arg(short, long, env = "CERTNEWS_CONFIG")]
    pub config: Option<String>,

    /// Directory for JSON run reports
    #[arg(long, env = "CERTNEWS_REPORT_DIR")]
    pub report_dir: Option<String>,

    /// Keep records in memory instead of the database
    #[arg(long)]
    pub dry_run: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Crawl sources and store new items
    Crawl(CrawlArgs),

    /// Classify stored records by keyword
    Classify(ClassifyArgs),

    /// Show stored record counts
    Stats(StatsArgs),
}

#[derive(Args, Debug)]
pub struct CrawlArgs {
    /// Sources to crawl (comma-separated)
    #[arg(short, long, value_enum, value_delimiter = ',')]
    pub source: Vec<SourceKind>,

    /// Crawl every source
    #[arg(long, conflicts_with = "source")]
    pub all: bool,

    /// Items to collect per source
    #[arg(short, long, default_value = "50")]
    pub target: usize,

    /// Only keep items mentioning this keyword
    #[arg(short, long)]
    pub keyword: Option<String>,

    /// Lower every source's page limit
    #[arg(short = 'p', long)]
    pub max_pages: Option<usize>,

    /// Classify records as soon as they are stored
    #[arg(long)]
    pub classify: bool,

    /// Treat URLs as duplicates only within the same source
    #[arg(long)]
    pub per_source_dedup: bool,
}

impl CrawlArgs {
    /// Sources to crawl; every source when none was named.
    pub fn sources(&self) -> Vec<SourceKind> {
        if self.all || self.source.is_empty() {
            return SourceKind::ALL.to_vec();
        }
        self.source.iter().copied().unique().collect()
    }

    /// Apply the flags that override file configuration.
    pub fn apply(&self, config: &mut CrawlerConfig) {
        if let Some(keyword) = self.keyword.as_deref().map(str::trim).filter(|k| !k.is_empty()) {
            config.keyword = Some(keyword.to_string());
        }
        if self.max_pages.is_some() {
            config.max_pages = self.max_pages;
        }
        if self.classify {
            config.classify_inline = true;
        }
        if self.per_source_dedup {
            config.dedup_scope = DedupScope::PerSource;
        }
    }
}

#[derive(Args, Debug)]
pub struct ClassifyArgs {
    /// Only classify records of this source (e.g. SGS)
    #[arg(short, long)]
    pub source: Option<String>,

    /// Also re-classify records that were already processed
    #[arg(long)]
    pub rescan: bool,

    /// Records loaded per query
    #[arg(long, default_value = "200")]
    pub page_size: usize,
}

#[derive(Args, Debug)]
pub struct StatsArgs {
    /// Restrict status and relevance counts to one source
    #[arg(short, long)]
    pub source: Option<String>,
}
