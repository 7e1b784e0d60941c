//! Beice / NTEK (ntek.org.cn) news list.
//!
//! Numbered HTML list pages (`/xinwenzixun.html`, then
//! `/xinwenzixun-4-{n}.html`) with a detail page per item. Both page kinds
//! carry consultation widgets and sidebars, so list items under noise blocks
//! are skipped and detail text goes through a [`NoiseFilter`].

use super::Source;
use crate::error::CrawlError;
use crate::extract::{NoiseFilter, first_attr, first_element, first_text, parse_selectors};
use crate::fetcher::{FetchedPage, PageFetcher};
use crate::models::{Detail, RawItem};
use crate::utils::{non_empty, resolve_link};
use futures::future::BoxFuture;
use reqwest::header::{HeaderMap, HeaderValue, REFERER};
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info, instrument};
use url::Url;

const BASE_URL: &str = "https://www.ntek.org.cn";
const MAX_PAGES: usize = 125;

const ITEM_SELECTORS: &[&str] = &[".list-down li", ".list li", ".news-list li"];
const ITEM_FALLBACK_SELECTORS: &[&str] = &["li.effect-oneBox", ".news-item", ".article-item"];
const TITLE_SELECTORS: &[&str] = &["h4", "h3", ".title", "a"];
const LINK_SELECTORS: &[&str] = &["a[href]"];
const TIME_SELECTORS: &[&str] = &[".time", ".date", ".publish-time"];
const SUMMARY_SELECTORS: &[&str] = &["p.txt", ".summary", ".desc", ".content"];

const LIST_NOISE: &[&str] = &[
    "body > div.rack.fl.wh.NewsListBox > div > div.lefter.fl > div.tab > div",
    ".tab",
    ".navigation",
    ".sidebar",
    ".advertisement",
    ".ads",
];

const CONTENT_SELECTORS: &[&str] = &[
    "body > div.rack.fl.wh.NewsDetailBox > div > div.righter.leftBox.fl > div.border > div.detailCont.wor",
    ".content",
    ".article-content",
    ".news-content",
    ".main-content",
    ".detail-content",
    ".post-content",
    ".article-body",
];
const DETAIL_TIME_SELECTORS: &[&str] = &[
    ".publish-time",
    ".post-time",
    ".article-time",
    ".date",
    ".time",
    ".created-time",
];
const DETAIL_SUMMARY_SELECTORS: &[&str] = &[
    ".summary",
    ".excerpt",
    ".description",
    ".post-excerpt",
    ".article-summary",
];

const CONTENT_NOISE: &[&str] = &[
    ".online",
    ".consult",
    ".offer",
    ".btn-offer",
    ".advertisement",
    ".ads",
    ".sidebar",
    ".navigation",
];
const BOILERPLATE: &[&str] = &["立即咨询", "获取报价", "在线咨询", "get a quote", "contact us"];

#[derive(Debug, Clone)]
struct BeiceSelectors {
    items: Vec<Selector>,
    items_fallback: Vec<Selector>,
    title: Vec<Selector>,
    link: Vec<Selector>,
    time: Vec<Selector>,
    summary: Vec<Selector>,
    content: Vec<Selector>,
    detail_time: Vec<Selector>,
    detail_summary: Vec<Selector>,
}

impl BeiceSelectors {
    fn new() -> Self {
        Self {
            items: parse_selectors(ITEM_SELECTORS),
            items_fallback: parse_selectors(ITEM_FALLBACK_SELECTORS),
            title: parse_selectors(TITLE_SELECTORS),
            link: parse_selectors(LINK_SELECTORS),
            time: parse_selectors(TIME_SELECTORS),
            summary: parse_selectors(SUMMARY_SELECTORS),
            content: parse_selectors(CONTENT_SELECTORS),
            detail_time: parse_selectors(DETAIL_TIME_SELECTORS),
            detail_summary: parse_selectors(DETAIL_SUMMARY_SELECTORS),
        }
    }
}

/// NTEK news list source.
#[derive(Debug, Clone)]
pub struct BeiceSource {
    fetcher: PageFetcher,
    base_url: Url,
    selectors: BeiceSelectors,
    list_noise: NoiseFilter,
    content_noise: NoiseFilter,
}

impl BeiceSource {
    pub fn new(fetcher: PageFetcher) -> Self {
        Self {
            fetcher,
            base_url: Url::parse(BASE_URL).expect("valid base URL"),
            selectors: BeiceSelectors::new(),
            list_noise: NoiseFilter::new(LIST_NOISE, &[]),
            content_noise: NoiseFilter::new(CONTENT_NOISE, BOILERPLATE),
        }
    }

    pub fn with_base_url(mut self, base_url: Url) -> Self {
        self.base_url = base_url;
        self
    }

    /// URL of list page `page` (1-based).
    pub fn page_url(&self, page: usize) -> Result<Url, CrawlError> {
        let path = if page <= 1 {
            "/xinwenzixun.html".to_string()
        } else {
            format!("/xinwenzixun-4-{page}.html")
        };
        Ok(self.base_url.join(&path)?)
    }

    fn under_noise(&self, element: ElementRef<'_>) -> bool {
        element
            .ancestors()
            .filter_map(ElementRef::wrap)
            .any(|ancestor| self.list_noise.is_noise(ancestor))
    }

    /// Parse a list page body.
    pub fn parse_list(&self, body: &str) -> Vec<RawItem> {
        let sel = &self.selectors;
        let document = Html::parse_document(body);
        let root = document.root_element();

        let collect = |selectors: &[Selector]| {
            selectors
                .iter()
                .flat_map(|s| root.select(s))
                .filter(|el| !self.under_noise(*el))
                .collect::<Vec<ElementRef>>()
        };
        let mut elements = collect(&sel.items);
        if elements.is_empty() {
            debug!("Primary Beice list selectors matched nothing; trying fallbacks");
            elements = collect(&sel.items_fallback);
        }

        let mut seen = std::collections::HashSet::new();
        let mut items = Vec::new();
        for element in elements {
            if !seen.insert((*element).id()) {
                continue;
            }
            let Some(url) = first_attr(element, &sel.link, "href")
                .and_then(|href| resolve_link(&self.base_url, &href))
            else {
                continue;
            };
            let Some(title) = first_text(element, &sel.title) else {
                continue;
            };
            let mut item = RawItem::new(title, url);
            item.raw_date_text = first_text(element, &sel.time);
            item.summary = first_text(element, &sel.summary)
                .map(|s| self.content_noise.strip_phrases(&s))
                .and_then(non_empty);
            if item.is_usable() {
                items.push(item);
            }
        }
        items
    }

    /// Parse a detail page body.
    pub fn parse_detail(&self, body: &str) -> Detail {
        let sel = &self.selectors;
        let document = Html::parse_document(body);
        let root = document.root_element();

        let body_text = first_element(root, &sel.content)
            .map(|content| self.content_noise.clean_text(content))
            .and_then(non_empty);
        Detail {
            raw_date_text: first_text(root, &sel.detail_time),
            summary: first_text(root, &sel.detail_summary)
                .map(|s| self.content_noise.strip_phrases(&s))
                .and_then(non_empty),
            body_text,
            ..Default::default()
        }
    }

    fn referer(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Ok(list) = self.page_url(1) {
            if let Ok(value) = HeaderValue::from_str(list.as_str()) {
                headers.insert(REFERER, value);
            }
        }
        headers
    }
}

impl Source for BeiceSource {
    fn name(&self) -> &str {
        "BEICE"
    }

    fn max_pages(&self) -> usize {
        MAX_PAGES
    }

    fn fetch_page(&self, page: usize) -> BoxFuture<'_, Result<FetchedPage, CrawlError>> {
        Box::pin(async move {
            let url = self.page_url(page)?;
            self.fetcher.get(url.as_str(), &HeaderMap::new()).await
        })
    }

    #[instrument(level = "debug", skip_all, fields(url = %page.url))]
    fn extract_items(&self, page: &FetchedPage) -> Result<Vec<RawItem>, CrawlError> {
        let items = self.parse_list(&page.body);
        info!(count = items.len(), "Extracted Beice items");
        Ok(items)
    }

    fn has_detail_pages(&self) -> bool {
        true
    }

    fn fetch_detail<'a>(&'a self, item: &'a RawItem) -> BoxFuture<'a, Result<Option<Detail>, CrawlError>> {
        Box::pin(async move {
            let page = self.fetcher.get(&item.url, &self.referer()).await?;
            let detail = self.parse_detail(&page.body);
            if detail.body_text.is_none() {
                debug!(url = %item.url, "No Beice detail content found");
            }
            Ok(Some(detail))
        })
    }
}
