//! Crawlable sources.
//!
//! Every source implements the same capability set, and the pagination
//! controller drives them without knowing which one it holds:
//!
//! 1. **fetch_page**: download list page `n` (1-based)
//! 2. **extract_items**: turn that page into [`RawItem`]s
//! 3. **fetch_detail**: optionally enrich one item from its own page
//!
//! # Supported Sources
//!
//! | Source | Module | Method | Notes |
//! |--------|--------|--------|-------|
//! | SGS | [`sgs`] | JSON POST API | Server-side keyword search, up to 200 pages |
//! | UL GMA | [`ul`] | HTML scraping | Single list page, table-based detail pages |
//! | Beice / NTEK | [`beice`] | HTML scraping | Numbered list pages, noisy detail pages |

pub mod beice;
pub mod sgs;
pub mod ul;

pub use beice::BeiceSource;
pub use sgs::SgsSource;
pub use ul::UlSource;

use crate::error::CrawlError;
use crate::fetcher::{FetchedPage, PageFetcher};
use crate::models::{Detail, RawItem};
use clap::ValueEnum;
use futures::future::{self, BoxFuture};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// A site the pipeline can crawl.
pub trait Source: Send + Sync {
    /// Name stored on every record from this source.
    fn name(&self) -> &str;

    /// Hard page limit; the controller never requests a page above it.
    fn max_pages(&self) -> usize;

    fn fetch_page(&self, page: usize) -> BoxFuture<'_, Result<FetchedPage, CrawlError>>;

    /// Items on a fetched list page. Items without a title or URL are
    /// skipped here; a page that cannot be read at all is an error.
    fn extract_items(&self, page: &FetchedPage) -> Result<Vec<RawItem>, CrawlError>;

    /// Whether [`Source::fetch_detail`] does any work. Sources without
    /// detail pages skip the per-item enrichment step and its delay.
    fn has_detail_pages(&self) -> bool {
        false
    }

    /// Extra fields from the item's detail page, if the source has any.
    fn fetch_detail<'a>(&'a self, item: &'a RawItem) -> BoxFuture<'a, Result<Option<Detail>, CrawlError>> {
        let _ = item;
        Box::pin(future::ready(Ok(None)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Sgs,
    Ul,
    Beice,
}

impl SourceKind {
    pub const ALL: [SourceKind; 3] = [SourceKind::Sgs, SourceKind::Ul, SourceKind::Beice];

    /// The `source_name` written on stored records.
    pub fn record_name(&self) -> &'static str {
        match self {
            SourceKind::Sgs => "SGS",
            SourceKind::Ul => "UL",
            SourceKind::Beice => "BEICE",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.record_name())
    }
}

/// Build the production source for `kind`.
///
/// # Arguments
///
/// * `kind` - Which site to crawl
/// * `fetcher` - Shared HTTP client
/// * `keyword` - Optional keyword; passed to server-side search where the
///   site has one
pub fn build_source(kind: SourceKind, fetcher: PageFetcher, keyword: Option<String>) -> Arc<dyn Source> {
    match kind {
        SourceKind::Sgs => Arc::new(SgsSource::new(fetcher).with_keyword(keyword)),
        SourceKind::Ul => Arc::new(UlSource::new(fetcher)),
        SourceKind::Beice => Arc::new(BeiceSource::new(fetcher)),
    }
}

/// Scripted source for controller and pipeline tests.
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::{HashMap, HashSet, VecDeque};
    use std::sync::Mutex;

    /// One scripted answer to a page request.
    #[derive(Debug, Clone, Copy)]
    pub(crate) enum Step {
        Items(usize),
        RateLimited,
        Blocked,
        ServerError,
        NotFound,
        /// The request never completes.
        Hang,
    }

    /// Pages answer from a per-page script; unscripted pages are empty.
    /// Page `p` item `i` links to `https://fake.example/p{p}/{i}`.
    #[derive(Debug, Default)]
    pub(crate) struct ScriptedSource {
        name: Option<&'static str>,
        max_pages: usize,
        script: Mutex<HashMap<usize, VecDeque<Step>>>,
        calls: Mutex<Vec<usize>>,
        with_details: bool,
        failing_details: HashSet<String>,
        /// Page number of item URLs is reported as this instead, so
        /// several pages can serve the same URLs.
        fixed_url_page: Option<usize>,
    }

    impl ScriptedSource {
        pub(crate) fn new(max_pages: usize) -> Self {
            Self {
                max_pages,
                ..Default::default()
            }
        }

        pub(crate) fn named(mut self, name: &'static str) -> Self {
            self.name = Some(name);
            self
        }

        pub(crate) fn page(self, page: usize, steps: &[Step]) -> Self {
            self.script
                .lock()
                .unwrap()
                .insert(page, steps.iter().copied().collect());
            self
        }

        pub(crate) fn pages(mut self, pages: std::ops::RangeInclusive<usize>, items: usize) -> Self {
            for page in pages {
                self = self.page(page, &[Step::Items(items)]);
            }
            self
        }

        pub(crate) fn with_details(mut self, failing: &[&str]) -> Self {
            self.with_details = true;
            self.failing_details = failing.iter().map(|s| s.to_string()).collect();
            self
        }

        pub(crate) fn repeating_urls(self) -> Self {
            self.urls_from_page(1)
        }

        /// Every page serves the item URLs of page `page`.
        pub(crate) fn urls_from_page(mut self, page: usize) -> Self {
            self.fixed_url_page = Some(page);
            self
        }

        pub(crate) fn calls(&self) -> Vec<usize> {
            self.calls.lock().unwrap().clone()
        }

        pub(crate) fn url(page: usize, index: usize) -> String {
            format!("https://fake.example/p{page}/{index}")
        }
    }

    impl Source for ScriptedSource {
        fn name(&self) -> &str {
            self.name.unwrap_or("FAKE")
        }

        fn max_pages(&self) -> usize {
            self.max_pages
        }

        fn fetch_page(&self, page: usize) -> BoxFuture<'_, Result<FetchedPage, CrawlError>> {
            self.calls.lock().unwrap().push(page);
            let step = self
                .script
                .lock()
                .unwrap()
                .get_mut(&page)
                .and_then(|steps| if steps.len() > 1 { steps.pop_front() } else { steps.front().copied() })
                .unwrap_or(Step::Items(0));
            if let Step::Hang = step {
                return Box::pin(future::pending());
            }
            let url = format!("https://fake.example/list/{page}");
            let result = match step {
                Step::Items(n) => Ok(FetchedPage {
                    url,
                    status: 200,
                    content_encoding: None,
                    body: format!("{}:{}", self.fixed_url_page.unwrap_or(page), n),
                }),
                Step::RateLimited => Err(CrawlError::RateLimited(url)),
                Step::Blocked => Err(CrawlError::Blocked(url)),
                Step::ServerError => Err(CrawlError::Server { status: 503, url }),
                Step::NotFound => Err(CrawlError::NotFound(url)),
                Step::Hang => unreachable!("handled above"),
            };
            Box::pin(future::ready(result))
        }

        fn extract_items(&self, page: &FetchedPage) -> Result<Vec<RawItem>, CrawlError> {
            let (page_no, count) = page
                .body
                .split_once(':')
                .ok_or_else(|| CrawlError::Parse(page.body.clone()))?;
            let page_no: usize = page_no.parse().map_err(|_| CrawlError::Parse(page.body.clone()))?;
            let count: usize = count.parse().map_err(|_| CrawlError::Parse(page.body.clone()))?;
            Ok((0..count)
                .map(|i| {
                    let mut item = RawItem::new(format!("Item {page_no}-{i}"), Self::url(page_no, i));
                    item.raw_date_text = Some("2025-08-14".to_string());
                    item
                })
                .collect())
        }

        fn has_detail_pages(&self) -> bool {
            self.with_details
        }

        fn fetch_detail<'a>(&'a self, item: &'a RawItem) -> BoxFuture<'a, Result<Option<Detail>, CrawlError>> {
            let result = if self.failing_details.contains(&item.url) {
                Err(CrawlError::Server {
                    status: 500,
                    url: item.url.clone(),
                })
            } else {
                Ok(Some(Detail {
                    body_text: Some(format!("Body of {}", item.title)),
                    raw_date_text: Some("2020-01-01".to_string()),
                    ..Default::default()
                }))
            };
            Box::pin(future::ready(result))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_build_sources() {
        let fetcher = PageFetcher::new(crate::fetcher::DEFAULT_USER_AGENT, Duration::from_secs(5)).unwrap();
        let limits: Vec<(String, usize)> = SourceKind::ALL
            .iter()
            .map(|kind| {
                let source = build_source(*kind, fetcher.clone(), None);
                (source.name().to_string(), source.max_pages())
            })
            .collect();
        assert_eq!(
            limits,
            vec![
                ("SGS".to_string(), 200),
                ("UL".to_string(), 1),
                ("BEICE".to_string(), 125),
            ]
        );
    }

    #[test]
    fn test_source_kind_parses_from_cli() {
        assert_eq!(SourceKind::from_str("beice", true).unwrap(), SourceKind::Beice);
        assert_eq!(SourceKind::Ul.to_string(), "UL");
    }
}
