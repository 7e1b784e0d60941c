//! SGS knowledge-center news via the site's filtered-list JSON API.
//!
//! The API takes a POST body with paging, an optional search key and three
//! named filter blocks (news type, publication date, topic). Its response is
//! `{"items": [...]}` where every field is wrapped as `{"value": ...}`:
//!
//! ```text
//! headline.value      -> title
//! cta.value.href      -> url (site-relative)
//! date.value          -> raw date text
//! description.value   -> body text
//! type.value          -> item type
//! ```
//!
//! There is no detail page to fetch; the list response carries everything.

use super::Source;
use crate::error::CrawlError;
use crate::fetcher::{FetchedPage, PageFetcher};
use crate::models::RawItem;
use crate::utils::{collapse_whitespace, non_empty, resolve_link};
use futures::future::BoxFuture;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderValue, ORIGIN, REFERER};
use scraper::Html;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info, instrument};
use url::Url;

const BASE_URL: &str = "https://www.sgs.com";
const MAX_PAGES: usize = 200;

const DATASOURCE_ID: &str = "{DF7BF6A2-7652-4D3C-9AAE-424DEEA6A2A5}";
const NEWS_TYPE_FILTER: &str = "{9DA17697-2D6F-4580-B783-CFEC8E7D86D3}";
const DATE_FILTER: &str = "{15424C7E-6D54-4D8B-887E-EAC939AE2394}";
const TOPIC_FILTER: &str = "{0793416D-101F-483B-9C40-B96C13FE2655}";

/// The topic crawled unless another one is selected.
pub const CERTIFICATION_TOPIC: &str = "496a050c1be74309b381b138507f4147";

const NEWS_TYPES: &[(&str, &str)] = &[
    ("Business News", "60f24f8e42314d42860ee99a5cd5a652"),
    ("Customer Stories", "67f6406845254365b73433cefbadfe84"),
    ("Features", "087a1a51d9e944298765f8327b1f9f60"),
    ("Global Corporate News", "fb520c62e9c343dd92c4cad6ad7247e8"),
    ("Local Corporate News", "c5dc1966fe514abaabe8ef9dc75d172a"),
];

const DATE_RANGES: &[(&str, &str)] = &[
    ("Past Week", "{A6809EE3-323F-4B0E-8346-1A3CF26B714B}"),
    ("Past Month", "{57C35CF1-7C22-4590-9C4C-B056ED4B5D46}"),
    ("Past Year", "{1E820BE0-5B7F-4435-882E-DED686057DAB}"),
    ("2025", "{6B0C4C80-851D-4ADD-8575-52978AD58599}"),
    ("2024", "{9EECBEAE-A412-4167-999F-DCCFEB7405D5}"),
    ("2023", "{13F30E19-B3CE-48ED-BFA4-6704A61BEBFA}"),
    ("2022", "{A1596BCB-7AA6-4B6D-971E-73416E8B3B06}"),
    ("Older", "{2782DF07-157B-436E-8C9E-A96C51B050FF}"),
];

const TOPICS: &[(&str, &str)] = &[
    ("About SGS", "9209eadfaff74fe48a63401202f818af"),
    ("Agriculture & Forestry", "bbd469989ef344dfa91acd997ef78087"),
    ("Building and Infrastructure", "10e34a46667b4e6d8e3b3d528412bbd6"),
    ("Certification", CERTIFICATION_TOPIC),
    ("Connectivity", "5b2355c4277843d995ab44ce3a402eed"),
    ("Consumer Products & Retail", "c23eda3e557b4beb9de876b84bb1d11f"),
    ("Corporate Sustainability", "5b98b824eabc4bed896cef0ada33a5f3"),
    ("Cosmetics & Personal Care", "b1ef2516d5814fb08ba52cbd560effff"),
    ("Cybersecurity & Technology", "da16b3c7f2904554a389636adf39f2d3"),
    ("Digital Trust Assurance", "da588fd0284e4d17b63f20fe5b26e7eb"),
    ("Environmental, Health & Safety", "e075e13116e943dc868cbe70be0ae5b6"),
    ("Food", "c7ee57cc8d6544429e172eb25d7ab8f9"),
    ("Government & Trade Facilitation", "e634aa5321f3490eb32bb0fcd883d1e0"),
    ("Hardgoods, Toys & Juvenile Products", "f45027743c454c2389264d0eb1c6f4ed"),
    ("Industrial Manufacturing & Processing", "c5250a583732466ba803f2f5688d24dc"),
    ("Investor Relations", "18ba053f103f46be853e112c38995919"),
    ("MedTech", "1dc58b0c6f0541be86a08153ab2f7114"),
    ("Mining", "b81102ac1d0e47dcb1e3fe26f625782a"),
    ("Oil, Gas & Chemicals", "a8fecf02948348b18ee8e6bce8df1f76"),
    ("Pharma", "e14e7e1e14b94fcbad81ae9914bf7e3b"),
    ("Power & Utilities", "06f9571bcfeb4869ba0603e4049e1d86"),
    ("Softlines", "848934348e93444e8532d987586e8639"),
    ("Supply Chain", "179d85eac9f549939c86e227b9410b7e"),
    ("Sustainability", "f0960a9e139b4dcea7f04efc85026b00"),
    ("Training", "a56d996ae15549898949086d148ba9fa"),
    ("Transportation", "016482e54206417aa7ded6b2b2c72bc4"),
];

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    items: Vec<ApiItem>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ApiItem {
    headline: Option<Wrapped<String>>,
    cta: Option<Wrapped<Cta>>,
    date: Option<Wrapped<String>>,
    description: Option<Wrapped<String>>,
    #[serde(rename = "type")]
    kind: Option<Wrapped<String>>,
}

#[derive(Debug, Deserialize)]
struct Wrapped<T> {
    value: Option<T>,
}

#[derive(Debug, Deserialize)]
struct Cta {
    href: Option<String>,
}

fn unwrap_text(field: Option<Wrapped<String>>) -> Option<String> {
    field.and_then(|f| f.value).and_then(non_empty)
}

/// Text content of a value that may hold inline markup.
fn plain_text(value: &str) -> String {
    if value.contains('<') {
        let fragment = Html::parse_fragment(value);
        collapse_whitespace(&fragment.root_element().text().collect::<Vec<_>>().join(" "))
    } else {
        collapse_whitespace(value)
    }
}

fn options(pairs: &[(&str, &str)]) -> Value {
    Value::Array(
        pairs
            .iter()
            .map(|(label, value)| json!({ "label": label, "value": value }))
            .collect(),
    )
}

/// SGS filtered-list API source.
#[derive(Debug, Clone)]
pub struct SgsSource {
    fetcher: PageFetcher,
    base_url: Url,
    keyword: Option<String>,
    topics: Vec<String>,
}

impl SgsSource {
    pub fn new(fetcher: PageFetcher) -> Self {
        Self {
            fetcher,
            base_url: Url::parse(BASE_URL).expect("valid base URL"),
            keyword: None,
            topics: vec![CERTIFICATION_TOPIC.to_string()],
        }
    }

    /// Point the source at another host (used by tests against a mock server).
    pub fn with_base_url(mut self, base_url: Url) -> Self {
        self.base_url = base_url;
        self
    }

    /// Server-side search key; blank keywords are ignored.
    pub fn with_keyword(mut self, keyword: Option<String>) -> Self {
        self.keyword = keyword.and_then(non_empty);
        self
    }

    /// Topic ids to select; an empty list means every topic.
    pub fn with_topics(mut self, topics: Vec<String>) -> Self {
        self.topics = topics;
        self
    }

    /// POST body for one page of results.
    pub fn request_body(&self, page: usize) -> Value {
        json!({
            "language": "en",
            "pageNumber": page,
            "searchKey": self.keyword.clone().unwrap_or_default(),
            "remotesOnly": null,
            "datasourceId": DATASOURCE_ID,
            "type": "knowledge-center",
            "filters": [
                {
                    "label": "News Type",
                    "value": NEWS_TYPE_FILTER,
                    "isEnabled": true,
                    "isMultiple": false,
                    "isHidden": false,
                    "selectedValue": "",
                    "options": options(NEWS_TYPES),
                },
                {
                    "label": "Publication Date",
                    "value": DATE_FILTER,
                    "isEnabled": true,
                    "isMultiple": false,
                    "isHidden": false,
                    "selectedValue": "",
                    "options": options(DATE_RANGES),
                },
                {
                    "label": "Topic",
                    "value": TOPIC_FILTER,
                    "isEnabled": true,
                    "isMultiple": true,
                    "isHidden": false,
                    "selectedValue": self.topics.join(","),
                    "options": options(TOPICS),
                },
            ],
        })
    }

    fn headers(&self) -> Result<HeaderMap, CrawlError> {
        let origin = self.base_url.origin().ascii_serialization();
        let referer = self.base_url.join("en/news")?;
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json, text/plain, */*"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            ORIGIN,
            HeaderValue::from_str(&origin).map_err(|e| CrawlError::Parse(e.to_string()))?,
        );
        headers.insert(
            REFERER,
            HeaderValue::from_str(referer.as_str()).map_err(|e| CrawlError::Parse(e.to_string()))?,
        );
        Ok(headers)
    }

    fn to_raw_item(&self, item: ApiItem) -> Option<RawItem> {
        let title = unwrap_text(item.headline)?;
        let href = item.cta.and_then(|c| c.value).and_then(|c| c.href)?;
        let url = resolve_link(&self.base_url, &href)?;

        let mut raw = RawItem::new(title, url);
        raw.raw_date_text = unwrap_text(item.date);
        raw.body_text = unwrap_text(item.description).map(|d| plain_text(&d)).and_then(non_empty);
        raw.item_type = unwrap_text(item.kind);
        Some(raw)
    }
}

impl Source for SgsSource {
    fn name(&self) -> &str {
        "SGS"
    }

    fn max_pages(&self) -> usize {
        MAX_PAGES
    }

    fn fetch_page(&self, page: usize) -> BoxFuture<'_, Result<FetchedPage, CrawlError>> {
        Box::pin(async move {
            let endpoint = self.base_url.join("api/filtered-list/post")?;
            let headers = self.headers()?;
            let body = self.request_body(page);
            self.fetcher.post_json(endpoint.as_str(), &body, &headers).await
        })
    }

    #[instrument(level = "debug", skip_all, fields(url = %page.url))]
    fn extract_items(&self, page: &FetchedPage) -> Result<Vec<RawItem>, CrawlError> {
        let response: ListResponse = serde_json::from_str(&page.body)?;
        let total = response.items.len();
        let items: Vec<RawItem> = response
            .items
            .into_iter()
            .filter_map(|item| self.to_raw_item(item))
            .filter(RawItem::is_usable)
            .collect();
        if items.len() < total {
            debug!(skipped = total - items.len(), "Skipped SGS items without title or link");
        }
        info!(count = items.len(), "Extracted SGS items");
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::DEFAULT_USER_AGENT;
    use mockito::{Matcher, Server};
    use std::time::Duration;

    const RESPONSE: &str = r#"{
        "items": [
            {
                "headline": {"value": "EU adopts EN 18031 for radio equipment"},
                "cta": {"value": {"href": "/en/news/2025/08/en-18031"}},
                "date": {"value": "14 August 2025"},
                "description": {"value": "<p>The harmonised standards are <b>now</b> cited.</p>"},
                "type": {"value": "Safeguards"}
            },
            {
                "headline": {"value": ""},
                "cta": {"value": {"href": "/en/news/empty-title"}}
            },
            {
                "headline": {"value": "No link at all"},
                "cta": {"value": null}
            },
            {
                "headline": {"value": "Minimal item"},
                "cta": {"value": {"href": "https://www.sgs.com/en/news/minimal"}}
            }
        ]
    }"#;

    fn source() -> SgsSource {
        let fetcher = PageFetcher::new(DEFAULT_USER_AGENT, Duration::from_secs(5)).unwrap();
        SgsSource::new(fetcher)
    }

    fn page(body: &str) -> FetchedPage {
        FetchedPage {
            url: "https://www.sgs.com/api/filtered-list/post".to_string(),
            status: 200,
            content_encoding: None,
            body: body.to_string(),
        }
    }

    #[test]
    fn test_extract_items_maps_wrapped_fields() {
        let items = source().extract_items(&page(RESPONSE)).unwrap();
        assert_eq!(items.len(), 2);

        let first = &items[0];
        assert_eq!(first.title, "EU adopts EN 18031 for radio equipment");
        assert_eq!(first.url, "https://www.sgs.com/en/news/2025/08/en-18031");
        assert_eq!(first.raw_date_text.as_deref(), Some("14 August 2025"));
        assert_eq!(first.body_text.as_deref(), Some("The harmonised standards are now cited."));
        assert_eq!(first.item_type.as_deref(), Some("Safeguards"));

        assert_eq!(items[1].title, "Minimal item");
        assert_eq!(items[1].raw_date_text, None);
    }

    #[test]
    fn test_missing_items_is_empty_page() {
        assert!(source().extract_items(&page(r#"{"total": 0}"#)).unwrap().is_empty());
        assert!(matches!(
            source().extract_items(&page("<html>")),
            Err(CrawlError::Json(_))
        ));
    }

    #[test]
    fn test_request_body() {
        let body = source()
            .with_keyword(Some("RoHS".to_string()))
            .request_body(3);
        assert_eq!(body["pageNumber"], 3);
        assert_eq!(body["searchKey"], "RoHS");
        assert_eq!(body["type"], "knowledge-center");
        assert_eq!(body["filters"][2]["label"], "Topic");
        assert_eq!(body["filters"][2]["selectedValue"], CERTIFICATION_TOPIC);

        let blank = source()
            .with_keyword(Some("  ".to_string()))
            .with_topics(Vec::new())
            .request_body(1);
        assert_eq!(blank["searchKey"], "");
        assert_eq!(blank["filters"][2]["selectedValue"], "");
    }

    #[tokio::test]
    async fn test_fetch_page_posts_to_api() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/api/filtered-list/post")
            .match_header("content-type", "application/json")
            .match_header("origin", Matcher::Regex("127.0.0.1".to_string()))
            .match_body(Matcher::PartialJson(json!({"pageNumber": 2, "language": "en"})))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(RESPONSE)
            .expect(1)
            .create_async()
            .await;

        let sgs = source().with_base_url(Url::parse(&server.url()).unwrap());
        let fetched = sgs.fetch_page(2).await.unwrap();
        let items = sgs.extract_items(&fetched).unwrap();
        assert_eq!(items.len(), 2);
        assert!(items[0].url.starts_with(&server.url()));
        mock.assert_async().await;
    }
}
