//! Source-agnostic page loop with retries, backoff and politeness delays.
//!
//! A [`Paginator`] walks one [`Source`] page by page and hands out batches of
//! items. Each call to [`Paginator::next_batch`] runs the loop until a page
//! yields items or the loop ends:
//!
//! ```text
//! top of iteration:  cancelled / deadline?        -> Cancelled
//!                    collected >= target?         -> TargetReached
//!                    consecutive failures >= max? -> Exhausted | FailureCeiling
//!                    page > max pages?            -> MaxPages
//! FETCHING(page):    error     -> backoff, retry same page (Fatal: give up at once)
//!                    0 items   -> failure += 1, next page
//!                    >=1 item  -> failures = 0, enrich details, yield batch
//! ```
//!
//! There is one request in flight at a time. Every suspension (politeness
//! delay, detail delay, retry backoff) goes through the injected [`Pacer`].

use crate::backoff::{BackoffClass, BackoffPolicy, Pacer};
use crate::config::CrawlerConfig;
use crate::error::CrawlError;
use crate::fetcher::FetchedPage;
use crate::models::{RawItem, StopReason};
use crate::sources::Source;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Knobs of the page loop, independent of the source being crawled.
#[derive(Debug, Clone)]
pub struct PaginationPolicy {
    pub politeness_delay: Duration,
    pub detail_delay: Duration,
    /// Consecutive empty or failed pages tolerated before giving up.
    pub failure_ceiling: usize,
    /// Attempts per page, the first one included.
    pub page_retry_limit: u32,
    /// Lowers the source's own page limit when set.
    pub max_pages: Option<usize>,
    /// Keep only items whose title or summary mention this keyword.
    pub keyword: Option<String>,
    pub backoff: BackoffPolicy,
}

impl Default for PaginationPolicy {
    fn default() -> Self {
        Self::from_config(&CrawlerConfig::default())
    }
}

impl PaginationPolicy {
    pub fn from_config(config: &CrawlerConfig) -> Self {
        Self {
            politeness_delay: config.politeness_delay(),
            detail_delay: config.detail_delay(),
            failure_ceiling: config.failure_ceiling as usize,
            page_retry_limit: config.page_retry_limit,
            max_pages: config.max_pages,
            keyword: config.keyword.clone(),
            backoff: config.backoff_policy(),
        }
    }
}

/// Items yielded from one list page.
#[derive(Debug, Clone)]
pub struct PageBatch {
    pub page: usize,
    pub items: Vec<RawItem>,
}

/// Counters accumulated by a [`Paginator`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageStats {
    pub pages_fetched: usize,
    pub pages_failed: usize,
    /// Items found on list pages, before keyword filtering and truncation.
    pub items_extracted: usize,
    pub detail_failures: usize,
    pub errors: Vec<String>,
}

/// Drives one source's page loop.
pub struct Paginator<'a> {
    source: &'a dyn Source,
    pacer: &'a dyn Pacer,
    policy: PaginationPolicy,
    target: usize,
    max_pages: usize,
    next_page: usize,
    collected: usize,
    consecutive_failures: usize,
    streak_had_errors: bool,
    requested_once: bool,
    deadline: Option<Instant>,
    cancel: Option<Arc<AtomicBool>>,
    stop: Option<StopReason>,
    stats: PageStats,
}

impl<'a> Paginator<'a> {
    /// # Arguments
    ///
    /// * `source` - Site to crawl
    /// * `pacer` - Suspends the loop between requests and before retries
    /// * `policy` - Delays, ceilings and filters
    /// * `target` - Number of items to collect before stopping
    pub fn new(source: &'a dyn Source, pacer: &'a dyn Pacer, policy: PaginationPolicy, target: usize) -> Self {
        let max_pages = policy
            .max_pages
            .map_or(source.max_pages(), |limit| limit.min(source.max_pages()));
        Self {
            source,
            pacer,
            policy,
            target,
            max_pages,
            next_page: 1,
            collected: 0,
            consecutive_failures: 0,
            streak_had_errors: false,
            requested_once: false,
            deadline: None,
            cancel: None,
            stop: None,
            stats: PageStats::default(),
        }
    }

    /// Stop at the first page boundary after `deadline`.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Stop at the first page boundary after `cancel` is set.
    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn stats(&self) -> &PageStats {
        &self.stats
    }

    /// Why the loop ended, once it has.
    pub fn stop_reason(&self) -> Option<StopReason> {
        self.stop
    }

    pub fn collected(&self) -> usize {
        self.collected
    }

    /// End the loop from outside, e.g. when the caller sees only duplicates.
    pub fn halt(&mut self, reason: StopReason) {
        if self.stop.is_none() {
            info!(source = %self.source.name(), ?reason, "Stopping page loop");
            self.stop = Some(reason);
        }
    }

    fn interrupted(&self) -> bool {
        self.cancel.as_ref().is_some_and(|c| c.load(Ordering::SeqCst))
            || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Terminal condition at the top of an iteration, if any.
    fn check_stop(&self) -> Option<StopReason> {
        if self.interrupted() {
            return Some(StopReason::Cancelled);
        }
        if self.collected >= self.target {
            return Some(StopReason::TargetReached);
        }
        if self.consecutive_failures >= self.policy.failure_ceiling.max(1) {
            return Some(if self.streak_had_errors {
                StopReason::FailureCeiling
            } else {
                StopReason::Exhausted
            });
        }
        if self.next_page > self.max_pages {
            return Some(StopReason::MaxPages);
        }
        None
    }

    fn record_failure(&mut self, page: usize, error: Option<&CrawlError>) {
        self.consecutive_failures += 1;
        if let Some(error) = error {
            self.streak_had_errors = true;
            self.stats.pages_failed += 1;
            self.stats.errors.push(format!("page {page}: {error}"));
        }
    }

    /// Next page's worth of items, or `None` once the loop has ended.
    #[instrument(level = "info", skip_all, fields(source = %self.source.name(), page = self.next_page))]
    pub async fn next_batch(&mut self) -> Option<PageBatch> {
        loop {
            if self.stop.is_some() {
                return None;
            }
            if let Some(reason) = self.check_stop() {
                info!(
                    ?reason,
                    collected = self.collected,
                    pages = self.stats.pages_fetched,
                    "Page loop finished"
                );
                self.stop = Some(reason);
                return None;
            }

            if self.requested_once {
                self.pacer.pause(self.policy.politeness_delay).await;
                if self.interrupted() {
                    self.stop = Some(StopReason::Cancelled);
                    return None;
                }
            }
            self.requested_once = true;

            let page = self.next_page;
            self.next_page += 1;

            let fetched = match self.fetch_with_retries(page).await {
                Ok(fetched) => fetched,
                Err(e) => {
                    warn!(page, error = %e, "Giving up on page");
                    self.record_failure(page, Some(&e));
                    continue;
                }
            };
            self.stats.pages_fetched += 1;

            let mut items = match self.source.extract_items(&fetched) {
                Ok(items) => items,
                Err(e) => {
                    warn!(page, error = %e, "Could not extract items");
                    self.record_failure(page, Some(&e));
                    continue;
                }
            };
            if items.is_empty() {
                debug!(page, "Page has no items");
                self.record_failure(page, None);
                continue;
            }

            self.consecutive_failures = 0;
            self.streak_had_errors = false;
            self.stats.items_extracted += items.len();

            if let Some(keyword) = self.policy.keyword.as_deref() {
                let before = items.len();
                items.retain(|item| item.mentions(keyword));
                debug!(page, keyword, kept = items.len(), dropped = before - items.len(), "Keyword filter");
            }
            items.truncate(self.target.saturating_sub(self.collected));
            if items.is_empty() {
                continue;
            }

            if self.source.has_detail_pages() {
                self.enrich(&mut items).await;
            }

            self.collected += items.len();
            debug!(page, count = items.len(), collected = self.collected, "Yielding batch");
            return Some(PageBatch { page, items });
        }
    }

    /// Fetch `page`, retrying the same page with class-based backoff.
    ///
    /// Delays never shrink between attempts on one page, jitter included.
    async fn fetch_with_retries(&self, page: usize) -> Result<FetchedPage, CrawlError> {
        let mut previous = Duration::ZERO;
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let error = match self.source.fetch_page(page).await {
                Ok(fetched) => return Ok(fetched),
                Err(e) => e,
            };

            let class = error.backoff_class();
            if class == BackoffClass::Fatal || attempt >= self.policy.page_retry_limit.max(1) {
                return Err(error);
            }
            let delay = self
                .policy
                .backoff
                .delay(class, attempt)
                .unwrap_or_default()
                .max(previous);
            previous = delay;
            warn!(page, attempt, ?class, delay_ms = delay.as_millis() as u64, error = %error, "Page fetch failed; backing off");
            self.pacer.pause(delay).await;
        }
    }

    /// Enrich items from their detail pages, one at a time.
    ///
    /// A failed detail fetch keeps the item with its list-page fields.
    async fn enrich(&mut self, items: &mut [RawItem]) {
        for (index, item) in items.iter_mut().enumerate() {
            if index > 0 {
                self.pacer.pause(self.policy.detail_delay).await;
            }
            let result = self.source.fetch_detail(item).await;
            match result {
                Ok(Some(detail)) => {
                    let filled = item.enrich(detail);
                    debug!(url = %item.url, filled, "Enriched item");
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(url = %item.url, error = %e, "Detail fetch failed; keeping list fields");
                    self.stats.detail_failures += 1;
                }
            }
        }
    }
}
