//! UL Solutions Taiwan GMA (global market access) updates.
//!
//! The list is one page. Items come in three shapes inside the main column,
//! and all three are collected:
//!
//! 1. `li` with a `strong a` headline: `[Country] Title | Type<br>...`
//! 2. plain `ul > li` entries with a link, country in `[...]`
//! 3. `<details>` blocks whose links all share the block's country
//!
//! Detail pages hold the publish date (`發布日期：...`) and usually a table
//! of standard / product / date rows.

use super::Source;
use crate::error::CrawlError;
use crate::extract::{NoiseFilter, element_text, first_element, parse_selector, parse_selectors};
use crate::fetcher::{FetchedPage, PageFetcher};
use crate::models::{Detail, RawItem};
use crate::normalize::{extract_country, standardize_date};
use crate::utils::{non_empty, resolve_link};
use futures::future::BoxFuture;
use itertools::Itertools;
use reqwest::header::HeaderMap;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use tracing::{debug, info, instrument};
use url::Url;

const LIST_URL: &str = "https://taiwan.ul.com/gma/";
const PUBLISH_MARKER: &str = "發布日期";

const CONTAINER_SELECTORS: &[&str] = &[
    "body > div.main.ul-responsive > div > div > div.col-xs-12.col-sm-8",
    "div.col-xs-12.col-sm-8",
    "main",
    "body",
];
const DETAIL_NOISE: &[&str] = &["nav", ".breadcrumb", ".share", ".social", "form"];
const DETAIL_PHRASES: &[&str] = &["contact us", "get a quote"];

/// Selectors compiled once per source.
#[derive(Debug, Clone)]
struct UlSelectors {
    container: Vec<Selector>,
    li: Selector,
    strong: Selector,
    strong_link: Selector,
    list_entry: Selector,
    link: Selector,
    details: Selector,
    summary: Selector,
    paragraph: Selector,
    quote_paragraph: Selector,
    dated: Selector,
    table: Selector,
    row: Selector,
    cell: Selector,
    cell_inner: Vec<Selector>,
}

impl UlSelectors {
    fn new() -> Self {
        let one = |css: &str| parse_selector(css).expect("valid selector");
        Self {
            container: parse_selectors(CONTAINER_SELECTORS),
            li: one("li"),
            strong: one("strong"),
            strong_link: one("strong a[href]"),
            list_entry: one("ul > li"),
            link: one("a[href]"),
            details: one("details"),
            summary: one("summary"),
            paragraph: one("p"),
            quote_paragraph: one("blockquote > p"),
            dated: one("p, span, time, li, td, div"),
            table: one("table"),
            row: one("tr"),
            cell: one("td"),
            cell_inner: parse_selectors(&["div", "p"]),
        }
    }
}

/// Text between the first `[` and the following `]`.
fn bracketed(text: &str) -> Option<String> {
    let start = text.find('[')?;
    let end = start + text[start..].find(']')?;
    non_empty(&text[start + 1..end])
}

/// Item type written between `|` and the first `<br>` of a headline entry.
fn pipe_type(html: &str) -> Option<String> {
    let pipe = html.find('|')?;
    let br = pipe + html[pipe..].find("<br")?;
    let fragment = Html::parse_fragment(&html[pipe + 1..br]);
    non_empty(element_text(fragment.root_element()))
}

fn inside_details(element: ElementRef<'_>) -> bool {
    element
        .ancestors()
        .filter_map(ElementRef::wrap)
        .any(|ancestor| ancestor.value().name() == "details")
}

/// UL GMA list source.
#[derive(Debug, Clone)]
pub struct UlSource {
    fetcher: PageFetcher,
    list_url: Url,
    selectors: UlSelectors,
    noise: NoiseFilter,
}

impl UlSource {
    pub fn new(fetcher: PageFetcher) -> Self {
        Self {
            fetcher,
            list_url: Url::parse(LIST_URL).expect("valid list URL"),
            selectors: UlSelectors::new(),
            noise: NoiseFilter::new(DETAIL_NOISE, DETAIL_PHRASES),
        }
    }

    pub fn with_list_url(mut self, list_url: Url) -> Self {
        self.list_url = list_url;
        self
    }

    /// Parse the list page body into items.
    pub fn parse_list(&self, body: &str, base: &Url) -> Result<Vec<RawItem>, CrawlError> {
        let sel = &self.selectors;
        let document = Html::parse_document(body);
        let Some(container) = first_element(document.root_element(), &sel.container) else {
            return Err(CrawlError::Parse("UL list container not found".to_string()));
        };

        let mut seen = HashSet::new();
        let mut items = Vec::new();
        let mut push = |item: RawItem| {
            if item.is_usable() && seen.insert(item.url.clone()) {
                items.push(item);
            }
        };

        for li in container.select(&sel.li) {
            let Some(anchor) = li.select(&sel.strong_link).next() else {
                continue;
            };
            let Some(url) = anchor.value().attr("href").and_then(|h| resolve_link(base, h)) else {
                continue;
            };
            let mut item = RawItem::new(element_text(anchor), url);
            item.country = li
                .select(&sel.strong)
                .next()
                .and_then(|strong| bracketed(&element_text(strong)));
            item.item_type = pipe_type(&li.inner_html());
            push(item);
        }

        // Entries inside <details> take the block's country below.
        for li in container.select(&sel.list_entry).filter(|li| !inside_details(*li)) {
            let Some(anchor) = li.select(&sel.link).next() else {
                continue;
            };
            let Some(url) = anchor.value().attr("href").and_then(|h| resolve_link(base, h)) else {
                continue;
            };
            let mut item = RawItem::new(element_text(anchor), url);
            item.country = bracketed(&element_text(li));
            item.item_type = Some("announcement".to_string());
            push(item);
        }

        for details in container.select(&sel.details) {
            let country = self.details_country(details, sel);
            for anchor in details.select(&sel.link) {
                let Some(url) = anchor.value().attr("href").and_then(|h| resolve_link(base, h)) else {
                    continue;
                };
                let mut item = RawItem::new(element_text(anchor), url);
                item.country = country.clone();
                item.item_type = Some("announcement".to_string());
                push(item);
            }
        }

        Ok(items)
    }

    fn details_country(&self, details: ElementRef<'_>, sel: &UlSelectors) -> Option<String> {
        if let Some(summary) = details.select(&sel.summary).next() {
            let text = element_text(summary);
            return bracketed(&text).or_else(|| extract_country(&text));
        }
        details
            .parent()
            .and_then(ElementRef::wrap)
            .and_then(|parent| extract_country(&element_text(parent)))
    }

    /// Parse a detail page body.
    pub fn parse_detail(&self, body: &str) -> Result<Detail, CrawlError> {
        let sel = &self.selectors;
        let document = Html::parse_document(body);
        let container = first_element(document.root_element(), &sel.container)
            .unwrap_or_else(|| document.root_element());

        let rows = self.table_rows(container, sel);
        let raw_date_text = self
            .publish_time(container, sel)
            .or_else(|| rows.iter().find_map(|(_, _, date)| non_empty(date.as_str())));

        let standards = rows.iter().filter_map(|(s, _, _)| non_empty(s.as_str())).unique().join(", ");
        let products = rows.iter().filter_map(|(_, p, _)| non_empty(p.as_str())).unique().join(", ");

        Ok(Detail {
            raw_date_text,
            summary: None,
            body_text: non_empty(self.noise.clean_text(container)),
            country: None,
            product_tags: non_empty(products),
            standard: non_empty(standards),
        })
    }

    fn publish_time(&self, container: ElementRef<'_>, sel: &UlSelectors) -> Option<String> {
        if let Some(text) = container
            .select(&sel.paragraph)
            .map(element_text)
            .find(|text| text.contains(PUBLISH_MARKER))
        {
            return Some(text);
        }
        if let Some(text) = container
            .select(&sel.quote_paragraph)
            .map(element_text)
            .find(|text| !text.is_empty())
        {
            return Some(text);
        }
        container
            .select(&sel.dated)
            .map(element_text)
            .filter(|text| text.chars().count() <= 80)
            .find(|text| standardize_date(text).is_some())
    }

    /// `(standard, product, date)` per body row; the header row is skipped.
    fn table_rows(&self, container: ElementRef<'_>, sel: &UlSelectors) -> Vec<(String, String, String)> {
        let Some(table) = container.select(&sel.table).next() else {
            return Vec::new();
        };
        table
            .select(&sel.row)
            .skip(1)
            .filter_map(|row| {
                let cells: Vec<String> = row.select(&sel.cell).map(|c| self.cell_text(c, sel)).collect();
                if cells.len() < 3 {
                    return None;
                }
                Some((cells[0].clone(), cells[1].clone(), cells[2].clone()))
            })
            .collect()
    }

    fn cell_text(&self, cell: ElementRef<'_>, sel: &UlSelectors) -> String {
        first_element(cell, &sel.cell_inner)
            .map(element_text)
            .unwrap_or_else(|| element_text(cell))
    }
}

impl Source for UlSource {
    fn name(&self) -> &str {
        "UL"
    }

    fn max_pages(&self) -> usize {
        1
    }

    fn fetch_page(&self, _page: usize) -> BoxFuture<'_, Result<FetchedPage, CrawlError>> {
        Box::pin(async move { self.fetcher.get(self.list_url.as_str(), &HeaderMap::new()).await })
    }

    #[instrument(level = "debug", skip_all, fields(url = %page.url))]
    fn extract_items(&self, page: &FetchedPage) -> Result<Vec<RawItem>, CrawlError> {
        let base = Url::parse(&page.url).unwrap_or_else(|_| self.list_url.clone());
        let items = self.parse_list(&page.body, &base)?;
        info!(count = items.len(), "Extracted UL items");
        Ok(items)
    }

    fn has_detail_pages(&self) -> bool {
        true
    }

    fn fetch_detail<'a>(&'a self, item: &'a RawItem) -> BoxFuture<'a, Result<Option<Detail>, CrawlError>> {
        Box::pin(async move {
            let page = self.fetcher.get(&item.url, &HeaderMap::new()).await?;
            let detail = self.parse_detail(&page.body)?;
            debug!(url = %item.url, empty = detail.is_empty(), "Parsed UL detail page");
            Ok(Some(detail))
        })
    }
}
