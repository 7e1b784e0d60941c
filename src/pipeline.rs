//! Crawl pipeline: page loop → normalize → dedup → persist → classify.
//!
//! [`run_crawl`] drives one source to completion and reports a
//! [`CrawlSummary`]. It never returns an error: failed pages, failed
//! writes and storage outages are counted and listed in the summary, and a
//! run that ended early is flagged `partial`.
//!
//! [`run_all`] runs several sources concurrently, one task per source, under
//! a shared wall-clock budget. A source still running when the budget is
//! spent is abandoned and reported as aborted; the others are unaffected.

use crate::backoff::{Pacer, TokioPacer};
use crate::classifier::{KeywordMatcher, classify_and_store};
use crate::config::{CrawlerConfig, DedupScope};
use crate::dedup::filter_new;
use crate::ids::IdMinter;
use crate::models::{CrawlSummary, NormalizedRecord, Relevance, StopReason};
use crate::normalize::Normalizer;
use crate::pagination::{PaginationPolicy, Paginator};
use crate::persist::BatchPersister;
use crate::sources::Source;
use crate::storage::Storage;
use chrono::Utc;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, instrument, warn};

/// Extra time a source gets past the budget to stop at a page boundary
/// before its task is abandoned.
const ABANDON_GRACE: Duration = Duration::from_secs(30);

/// Everything a crawl run shares across sources.
#[derive(Clone)]
pub struct CrawlContext {
    pub storage: Arc<dyn Storage>,
    pub pacer: Arc<dyn Pacer>,
    pub normalizer: Normalizer,
    /// Used for inline classification when `config.classify_inline` is set.
    pub matcher: Option<Arc<KeywordMatcher>>,
    pub config: CrawlerConfig,
    pub cancel: Option<Arc<AtomicBool>>,
}

impl CrawlContext {
    /// Context with a tokio pacer and a fresh identifier counter.
    pub fn new(storage: Arc<dyn Storage>, config: CrawlerConfig) -> Self {
        Self {
            storage,
            pacer: Arc::new(TokioPacer),
            normalizer: Normalizer::new(Arc::new(IdMinter::new())),
            matcher: None,
            config,
            cancel: None,
        }
    }

    pub fn with_pacer(mut self, pacer: Arc<dyn Pacer>) -> Self {
        self.pacer = pacer;
        self
    }

    pub fn with_matcher(mut self, matcher: KeywordMatcher) -> Self {
        self.matcher = Some(Arc::new(matcher));
        self
    }

    /// Sources stop at their next page boundary once `cancel` is set.
    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn inline_matcher(&self) -> Option<Arc<KeywordMatcher>> {
        self.matcher
            .clone()
            .filter(|_| self.config.classify_inline)
    }
}

/// Crawl one source until `target` items were collected or the page loop
/// stops for another reason.
///
/// # Arguments
///
/// * `source` - Site to crawl
/// * `ctx` - Storage, pacing, normalization and configuration
/// * `target` - Number of list items to collect
///
/// # Returns
///
/// The run's [`CrawlSummary`]; degraded runs are flagged, never raised.
pub async fn run_crawl(source: &dyn Source, ctx: &CrawlContext, target: usize) -> CrawlSummary {
    run_crawl_until(source, ctx, target, None).await
}

/// [`run_crawl`] that also stops at the first page boundary after `deadline`.
#[instrument(level = "info", skip_all, fields(source = %source.name(), target))]
pub async fn run_crawl_until(
    source: &dyn Source,
    ctx: &CrawlContext,
    target: usize,
    deadline: Option<Instant>,
) -> CrawlSummary {
    let started = std::time::Instant::now();
    let name = source.name().to_string();
    let mut summary = CrawlSummary::new(&name, target);

    summary.stored_before = count_stored(ctx, &name).await;
    info!(stored_before = ?summary.stored_before, "Starting crawl");

    let mut paginator = Paginator::new(
        source,
        ctx.pacer.as_ref(),
        PaginationPolicy::from_config(&ctx.config),
        target,
    );
    if let Some(deadline) = deadline {
        paginator = paginator.with_deadline(deadline);
    }
    if let Some(cancel) = &ctx.cancel {
        paginator = paginator.with_cancel(cancel.clone());
    }

    let persister = BatchPersister::new(ctx.config.batch_size);
    let scope = ctx.config.dedup_scope;
    let duplicate_ceiling = ctx.config.duplicate_batch_ceiling.max(1) as usize;
    let mut duplicate_streak = 0usize;

    while let Some(batch) = paginator.next_batch().await {
        let page = batch.page;
        let batch_len = batch.items.len();
        let records: Vec<NormalizedRecord> = batch
            .items
            .into_iter()
            .map(|item| ctx.normalizer.normalize(item, &name))
            .collect();

        let storage = Arc::clone(&ctx.storage);
        let matcher = ctx.inline_matcher();
        let write = match on_blocking_pool(move || {
            store_batch(storage.as_ref(), matcher.as_deref(), persister, scope, page, records)
        })
        .await
        {
            Ok(write) => write,
            Err(e) => {
                error!(page, error = %e, "Storage task failed");
                summary.errors.push(format!("storing page {page}: {e}"));
                summary.persist_failures += batch_len;
                duplicate_streak = 0;
                continue;
            }
        };

        let nothing_new = write.saved == 0 && write.failures.is_empty();
        write.apply(&mut summary);

        if nothing_new {
            duplicate_streak += 1;
            info!(page, batch = batch_len, streak = duplicate_streak, "Batch was entirely duplicates");
            if duplicate_streak >= duplicate_ceiling {
                paginator.halt(StopReason::DuplicateCeiling);
            }
        } else {
            duplicate_streak = 0;
        }
    }

    let stats = paginator.stats().clone();
    summary.stop_reason = paginator.stop_reason().unwrap_or(StopReason::Exhausted);
    summary.partial = summary.stop_reason.is_partial();
    summary.pages_fetched = stats.pages_fetched;
    summary.pages_failed = stats.pages_failed;
    summary.items_extracted = stats.items_extracted;
    summary.detail_failures = stats.detail_failures;
    let mut errors = stats.errors;
    errors.append(&mut summary.errors);
    summary.errors = errors;

    let storage = Arc::clone(&ctx.storage);
    let source_name = name.clone();
    let counts = on_blocking_pool(move || {
        (
            storage.count_for_source(&source_name),
            storage.count_by_status(Some(&source_name)),
        )
    })
    .await;
    match counts {
        Ok((stored_after, by_status)) => {
            match stored_after {
                Ok(count) => summary.stored_after = Some(count),
                Err(e) => warn!(error = %e, "Could not count stored records"),
            }
            match by_status {
                Ok(counts) => {
                    summary.status_counts = counts
                        .into_iter()
                        .map(|(status, count)| (status.to_string(), count))
                        .collect();
                }
                Err(e) => warn!(error = %e, "Could not count records by status"),
            }
        }
        Err(e) => warn!(error = %e, "Storage task failed"),
    }

    summary.elapsed_ms = started.elapsed().as_millis() as u64;
    info!(
        stop_reason = ?summary.stop_reason,
        partial = summary.partial,
        pages = summary.pages_fetched,
        saved = summary.saved,
        duplicates = summary.duplicates_skipped,
        errors = summary.errors.len(),
        elapsed_ms = summary.elapsed_ms,
        "Crawl finished"
    );
    summary
}

/// Run synchronous storage work off the async worker threads.
async fn on_blocking_pool<T, F>(work: F) -> Result<T, tokio::task::JoinError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let span = tracing::Span::current();
    tokio::task::spawn_blocking(move || span.in_scope(work)).await
}

/// Storage-side result of one page batch.
#[derive(Debug, Default)]
struct BatchWrite {
    duplicates: usize,
    saved: usize,
    conflicts: usize,
    failures: Vec<String>,
    related: usize,
    unrelated: usize,
    errors: Vec<String>,
}

impl BatchWrite {
    fn apply(self, summary: &mut CrawlSummary) {
        summary.duplicates_skipped += self.duplicates + self.conflicts;
        summary.saved += self.saved;
        summary.persist_conflicts += self.conflicts;
        summary.persist_failures += self.failures.len();
        summary.classified_related += self.related;
        summary.classified_unrelated += self.unrelated;
        summary.errors.extend(self.errors);
        summary.errors.extend(self.failures);
    }
}

/// Dedup, persist and optionally classify one batch of records.
fn store_batch(
    storage: &dyn Storage,
    matcher: Option<&KeywordMatcher>,
    persister: BatchPersister,
    scope: DedupScope,
    page: usize,
    records: Vec<NormalizedRecord>,
) -> BatchWrite {
    let mut write = BatchWrite::default();

    // A failed lookup leaves the unique index as the only guard.
    let fresh = match filter_new(storage, records.clone(), scope) {
        Ok(outcome) => {
            write.duplicates = outcome.duplicates;
            outcome.fresh
        }
        Err(e) => {
            warn!(page, error = %e, "Duplicate lookup failed; relying on storage constraint");
            write.errors.push(format!("dedup lookup on page {page}: {e}"));
            records
        }
    };

    let outcome = persister.save_batch(storage, fresh);
    write.saved = outcome.saved_count();
    write.conflicts = outcome.conflicts;
    write.failures = outcome.failures;

    if let Some(matcher) = matcher {
        for record in &outcome.saved {
            match classify_and_store(storage, matcher, record) {
                Ok(Relevance::Related(_)) => write.related += 1,
                Ok(_) => write.unrelated += 1,
                Err(e) => {
                    warn!(id = %record.id, error = %e, "Inline classification failed");
                    write.errors.push(format!("classify {}: {e}", record.id));
                }
            }
        }
    }
    write
}

/// Crawl several sources concurrently under the configured run budget.
///
/// Summaries come back in the order of `sources`. A source that outlives
/// the budget, or whose task panics, gets an aborted summary.
#[instrument(level = "info", skip_all, fields(sources = sources.len(), target))]
pub async fn run_all(sources: Vec<Arc<dyn Source>>, ctx: Arc<CrawlContext>, target: usize) -> Vec<CrawlSummary> {
    let budget = ctx.config.run_budget();
    let deadline = Instant::now() + budget;
    let started_at = Utc::now();

    let mut handles = Vec::with_capacity(sources.len());
    for source in sources {
        let name = source.name().to_string();
        let stored_before = count_stored(&ctx, &name).await;
        let task_ctx = Arc::clone(&ctx);
        let handle = tokio::spawn(async move {
            tokio::time::timeout(
                budget + ABANDON_GRACE,
                run_crawl_until(source.as_ref(), &task_ctx, target, Some(deadline)),
            )
            .await
        });
        handles.push((name, stored_before, handle));
    }

    let mut summaries = Vec::with_capacity(handles.len());
    for (name, stored_before, handle) in handles {
        let reason = match handle.await {
            Ok(Ok(summary)) => {
                summaries.push(summary);
                continue;
            }
            Ok(Err(_)) => {
                error!(source = %name, budget_secs = budget.as_secs(), "Source exceeded run budget; abandoned");
                "wall-clock budget exceeded".to_string()
            }
            Err(e) => {
                error!(source = %name, error = %e, "Source task failed");
                format!("task failed: {e}")
            }
        };
        let mut summary = CrawlSummary::aborted(&name, target, reason);
        summary.started_at = started_at;
        summary.stored_before = stored_before;
        summary.stored_after = count_stored(&ctx, &name).await;
        if let (Some(before), Some(after)) = (stored_before, summary.stored_after) {
            summary.saved = after.saturating_sub(before) as usize;
        }
        summaries.push(summary);
    }

    let saved: usize = summaries.iter().map(|s| s.saved).sum();
    let partial = summaries.iter().filter(|s| s.partial).count();
    info!(saved, partial, "All sources finished");
    summaries
}

/// Records stored for `name`, or `None` when storage could not count them.
async fn count_stored(ctx: &CrawlContext, name: &str) -> Option<u64> {
    let storage = Arc::clone(&ctx.storage);
    let source_name = name.to_string();
    match on_blocking_pool(move || storage.count_for_source(&source_name)).await {
        Ok(Ok(count)) => Some(count),
        Ok(Err(e)) => {
            warn!(source = %name, error = %e, "Could not count stored records");
            None
        }
        Err(e) => {
            warn!(source = %name, error = %e, "Storage task failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::RecordingPacer;
    use crate::config::{KeywordConfig, KeywordGroup};
    use crate::models::RecordStatus;
    use crate::sources::testing::{ScriptedSource, Step};
    use crate::storage::{MemoryStorage, RelevanceCounts};
    use std::sync::atomic::Ordering;

    fn context(storage: Arc<MemoryStorage>, config: CrawlerConfig) -> CrawlContext {
        CrawlContext::new(storage, config).with_pacer(Arc::new(RecordingPacer::default()))
    }

    #[tokio::test]
    async fn test_second_run_saves_nothing() {
        let storage = Arc::new(MemoryStorage::new());
        let ctx = context(storage.clone(), CrawlerConfig::default());

        let first = run_crawl(&ScriptedSource::new(3).pages(1..=3, 2), &ctx, 100).await;
        assert_eq!(first.saved, 6);
        assert_eq!(first.stop_reason, StopReason::MaxPages);
        assert!(!first.partial);
        assert_eq!(first.stored_before, Some(0));
        assert_eq!(first.stored_after, Some(6));
        assert_eq!(first.status_counts.get("NEW"), Some(&6));

        let second = run_crawl(&ScriptedSource::new(3).pages(1..=3, 2), &ctx, 100).await;
        assert_eq!(second.saved, 0);
        assert_eq!(second.duplicates_skipped, 6);
        assert_eq!(second.stored_after, Some(6));
        assert_eq!(storage.snapshot().unwrap().len(), 6);
    }

    #[tokio::test]
    async fn test_duplicate_ceiling_stops_source() {
        let storage = Arc::new(MemoryStorage::new());
        let config = CrawlerConfig::builder().duplicate_batch_ceiling(3).build();
        let ctx = context(storage, config);
        let source = ScriptedSource::new(50).pages(1..=50, 2).repeating_urls();

        let summary = run_crawl(&source, &ctx, 1000).await;
        assert_eq!(summary.stop_reason, StopReason::DuplicateCeiling);
        assert_eq!(summary.saved, 2);
        assert_eq!(summary.duplicates_skipped, 6);
        assert_eq!(source.calls(), vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_bulk_failure_falls_back_per_record() {
        let storage = Arc::new(MemoryStorage::new());
        storage.set_fail_bulk_inserts(true);
        let config = CrawlerConfig::builder().batch_size(4).build();
        let ctx = context(storage.clone(), config);

        let summary = run_crawl(&ScriptedSource::new(1).pages(1..=1, 10), &ctx, 100).await;
        assert_eq!(summary.saved, 10);
        assert_eq!(summary.persist_failures, 0);
        assert_eq!(storage.bulk_attempts(), 3);
        assert_eq!(storage.snapshot().unwrap().len(), 10);
    }

    #[tokio::test]
    async fn test_failing_source_reports_partial() {
        let storage = Arc::new(MemoryStorage::new());
        let config = CrawlerConfig::builder().failure_ceiling(2).build();
        let ctx = context(storage, config);
        let source = ScriptedSource::new(10)
            .page(1, &[Step::Blocked])
            .page(2, &[Step::RateLimited]);

        let summary = run_crawl(&source, &ctx, 10).await;
        assert_eq!(summary.stop_reason, StopReason::FailureCeiling);
        assert!(summary.partial);
        assert_eq!(summary.saved, 0);
        assert_eq!(summary.pages_failed, 2);
        assert_eq!(summary.errors.len(), 2);
        assert!(summary.errors[0].starts_with("page 1:"));
    }

    #[tokio::test]
    async fn test_inline_classification() {
        let storage = Arc::new(MemoryStorage::new());
        let config = CrawlerConfig::builder().classify_inline(true).build();
        let keywords = KeywordConfig {
            groups: vec![KeywordGroup {
                name: "TEST".to_string(),
                primary_terms: "Item 1-0".to_string(),
                ..Default::default()
            }],
        };
        let ctx = context(storage.clone(), config).with_matcher(KeywordMatcher::new(&keywords));

        let summary = run_crawl(&ScriptedSource::new(1).pages(1..=1, 3), &ctx, 10).await;
        assert_eq!(summary.classified_related, 1);
        assert_eq!(summary.classified_unrelated, 2);
        assert_eq!(summary.status_counts.get("PROCESSED"), Some(&3));
        assert_eq!(
            storage.count_by_relevance(Some("FAKE")).unwrap(),
            RelevanceCounts {
                related: 1,
                unrelated: 2,
                undetermined: 0
            }
        );
        let related = storage
            .snapshot()
            .unwrap()
            .into_iter()
            .find(|r| r.title == "Item 1-0")
            .unwrap();
        assert_eq!(related.relevance, Relevance::Related(vec!["Item 1-0".to_string()]));
        assert_eq!(related.status, RecordStatus::Processed);
    }

    #[tokio::test]
    async fn test_matcher_ignored_without_inline_flag() {
        let storage = Arc::new(MemoryStorage::new());
        let ctx = context(storage, CrawlerConfig::default())
            .with_matcher(KeywordMatcher::new(&KeywordConfig::builtin()));

        let summary = run_crawl(&ScriptedSource::new(1).pages(1..=1, 2), &ctx, 10).await;
        assert_eq!(summary.classified_related + summary.classified_unrelated, 0);
        assert_eq!(summary.status_counts.get("NEW"), Some(&2));
    }

    #[tokio::test]
    async fn test_cancelled_context_stops_before_first_page() {
        let storage = Arc::new(MemoryStorage::new());
        let cancel = Arc::new(AtomicBool::new(false));
        let ctx = context(storage, CrawlerConfig::default()).with_cancel(cancel.clone());
        cancel.store(true, Ordering::SeqCst);

        let source = ScriptedSource::new(5).pages(1..=5, 2);
        let summary = run_crawl(&source, &ctx, 10).await;
        assert_eq!(summary.stop_reason, StopReason::Cancelled);
        assert!(summary.partial);
        assert!(source.calls().is_empty());
    }

    #[tokio::test]
    async fn test_run_all_keeps_source_order() {
        let storage = Arc::new(MemoryStorage::new());
        let ctx = Arc::new(context(storage.clone(), CrawlerConfig::default()));
        let sources: Vec<Arc<dyn Source>> = vec![
            Arc::new(ScriptedSource::new(2).pages(1..=2, 3)),
            Arc::new(ScriptedSource::new(1).page(1, &[Step::NotFound])),
        ];

        let summaries = run_all(sources, ctx, 100).await;
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].saved, 6);
        assert_eq!(summaries[1].saved, 0);
        assert_eq!(summaries[1].pages_failed, 1);
        assert_eq!(storage.snapshot().unwrap().len(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_all_abandons_source_past_budget() {
        let storage = Arc::new(MemoryStorage::new());
        let config = CrawlerConfig::builder().run_budget_secs(1).build();
        let ctx = Arc::new(context(storage.clone(), config));
        let sources: Vec<Arc<dyn Source>> = vec![
            Arc::new(
                ScriptedSource::new(3)
                    .named("STUCK")
                    .urls_from_page(9)
                    .page(1, &[Step::Items(2)])
                    .page(2, &[Step::Hang]),
            ),
            Arc::new(ScriptedSource::new(2).named("STEADY").pages(1..=2, 3)),
        ];

        let summaries = run_all(sources, ctx, 100).await;

        let stuck = &summaries[0];
        assert_eq!(stuck.source, "STUCK");
        assert_eq!(stuck.stop_reason, StopReason::Aborted);
        assert!(stuck.partial);
        assert_eq!(stuck.errors, vec!["wall-clock budget exceeded".to_string()]);
        assert_eq!(stuck.stored_before, Some(0));
        assert_eq!(stuck.stored_after, Some(2));
        assert_eq!(stuck.saved, 2);

        let steady = &summaries[1];
        assert_eq!(steady.source, "STEADY");
        assert_eq!(steady.stop_reason, StopReason::MaxPages);
        assert!(!steady.partial);
        assert_eq!(steady.saved, 6);
        assert_eq!(storage.count_for_source("STEADY").unwrap(), 6);
    }
}
