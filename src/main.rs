//! # certnews
//!
//! Command-line front end of `certnews_crawler`.
//!
//! ## Usage
//!
//! ```sh
//! certnews --db ./certnews.db crawl --all --target 50 --classify
//! certnews classify --source SGS
//! certnews stats
//! ```
//!
//! ## Flow
//!
//! 1. **Setup**: tracing, configuration file, storage backend
//! 2. **Command**: crawl (all selected sources concurrently), classify
//!    sweep, or stats
//! 3. **Output**: JSON on stdout, optionally a run report on disk

use certnews_crawler::classifier::{KeywordMatcher, classify_pending};
use certnews_crawler::config::AppConfig;
use certnews_crawler::fetcher::PageFetcher;
use certnews_crawler::outputs::json::{RunReport, write_run_report};
use certnews_crawler::pipeline::{CrawlContext, run_all};
use certnews_crawler::sources::{Source, build_source};
use certnews_crawler::storage::{MemoryStorage, SqliteStorage, Storage};
use clap::Parser;
use serde_json::json;
use std::collections::BTreeMap;
use std::error::Error;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod cli;

use cli::{ClassifyArgs, Cli, Commands, CrawlArgs, StatsArgs};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!("certnews starting up");

    let args = Cli::parse();
    debug!(db = %args.db, config = ?args.config, dry_run = args.dry_run, "Parsed CLI arguments");

    let app = AppConfig::load_or_default(args.config.as_deref())?;
    info!(
        groups = app.keywords.groups.len(),
        config = args.config.as_deref().unwrap_or("<defaults>"),
        "Loaded configuration"
    );

    let storage: Arc<dyn Storage> = if args.dry_run {
        info!("Dry run; records are kept in memory");
        Arc::new(MemoryStorage::new())
    } else {
        info!(path = %args.db, "Opening database");
        Arc::new(SqliteStorage::open(&args.db)?)
    };

    let result = match &args.command {
        Commands::Crawl(crawl) => run_crawl_command(&args, crawl, app, storage).await,
        Commands::Classify(classify) => run_classify_command(classify, &app, storage.as_ref()),
        Commands::Stats(stats) => run_stats_command(stats, storage.as_ref()),
    };
    if let Err(e) = &result {
        error!(error = %e, "Command failed");
    }

    let elapsed = start_time.elapsed();
    info!(
        ?elapsed,
        secs = elapsed.as_secs(),
        millis = elapsed.subsec_millis(),
        "Execution complete"
    );
    result
}

/// Crawl the selected sources and print the run report.
#[instrument(level = "info", skip_all, fields(target = crawl.target))]
async fn run_crawl_command(
    args: &Cli,
    crawl: &CrawlArgs,
    app: AppConfig,
    storage: Arc<dyn Storage>,
) -> Result<(), Box<dyn Error>> {
    let mut config = app.crawler;
    crawl.apply(&mut config);

    let fetcher = PageFetcher::from_config(&config)?;
    let kinds = crawl.sources();
    info!(sources = ?kinds, keyword = ?config.keyword, "Selected sources");
    let sources: Vec<Arc<dyn Source>> = kinds
        .iter()
        .map(|kind| build_source(*kind, fetcher.clone(), config.keyword.clone()))
        .collect();

    // Ctrl-C stops every source at its next page boundary.
    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = Arc::clone(&cancel);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted; stopping after the current page");
                cancel.store(true, Ordering::SeqCst);
            }
        });
    }

    let ctx = CrawlContext::new(storage, config)
        .with_matcher(KeywordMatcher::new(&app.keywords))
        .with_cancel(cancel);
    let summaries = run_all(sources, Arc::new(ctx), crawl.target).await;

    let report = RunReport::new(&summaries);
    println!("{}", serde_json::to_string_pretty(&report)?);

    if let Some(report_dir) = &args.report_dir {
        if let Err(e) = write_run_report(&summaries, report_dir).await {
            error!(path = %report_dir, error = %e, "Failed to write run report");
        }
    }

    if !report.partial_sources.is_empty() {
        warn!(sources = ?report.partial_sources, "Some sources finished degraded");
    }
    Ok(())
}

/// Classify stored records and print the sweep counts.
fn run_classify_command(
    classify: &ClassifyArgs,
    app: &AppConfig,
    storage: &dyn Storage,
) -> Result<(), Box<dyn Error>> {
    let matcher = KeywordMatcher::new(&app.keywords);
    let summary = classify_pending(
        storage,
        &matcher,
        classify.source.as_deref(),
        classify.rescan,
        classify.page_size,
    )?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

/// Print stored counts by source, status and relevance.
fn run_stats_command(stats: &StatsArgs, storage: &dyn Storage) -> Result<(), Box<dyn Error>> {
    let source = stats.source.as_deref();
    let by_status: BTreeMap<String, u64> = storage
        .count_by_status(source)?
        .into_iter()
        .map(|(status, count)| (status.to_string(), count))
        .collect();

    let output = json!({
        "by_source": storage.count_by_source()?,
        "by_status": by_status,
        "by_relevance": storage.count_by_relevance(source)?,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
