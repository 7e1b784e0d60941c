//! HTTP page fetching.
//!
//! [`PageFetcher`] wraps a `reqwest` client configured like a desktop
//! browser: realistic user agent, standard navigation headers and transparent
//! gzip/deflate decoding. Redirects are followed manually and only once: a
//! 3xx response with a `Location` header is re-requested a single time, and a
//! second redirect is reported as [`CrawlError::Redirect`].
//!
//! Non-2xx statuses are surfaced as typed errors (see
//! [`CrawlError::from_status`]) so callers can pick a backoff class.

use crate::config::CrawlerConfig;
use crate::error::CrawlError;
use crate::utils::truncate_for_log;
use reqwest::header::{
    ACCEPT, ACCEPT_LANGUAGE, CONNECTION, CONTENT_ENCODING, HeaderMap, HeaderValue, LOCATION,
    UPGRADE_INSECURE_REQUESTS,
};
use reqwest::redirect::Policy;
use reqwest::{Client, Method, Response, StatusCode};
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};
use url::Url;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

const ACCEPT_HTML: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8";
const ACCEPT_LANGUAGES: &str = "en-US,en;q=0.9,zh-CN;q=0.8,zh;q=0.7";

/// A successfully fetched response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPage {
    /// Final URL after at most one redirect.
    pub url: String,
    pub status: u16,
    /// `Content-Encoding` left on the response. Encodings the client decodes
    /// itself (gzip, deflate) are removed by the time the body is read.
    pub content_encoding: Option<String>,
    pub body: String,
}

/// Browser-like HTTP client shared by all sources.
#[derive(Debug, Clone)]
pub struct PageFetcher {
    client: Client,
}

impl PageFetcher {
    /// Build a fetcher with the given user agent and per-request timeout.
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self, CrawlError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_HTML));
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static(ACCEPT_LANGUAGES));
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
        headers.insert(UPGRADE_INSECURE_REQUESTS, HeaderValue::from_static("1"));

        let client = Client::builder()
            .user_agent(user_agent)
            .default_headers(headers)
            .timeout(timeout)
            .gzip(true)
            .deflate(true)
            .redirect(Policy::none())
            .build()?;
        Ok(Self { client })
    }

    pub fn from_config(config: &CrawlerConfig) -> Result<Self, CrawlError> {
        Self::new(&config.user_agent, config.timeout())
    }

    /// GET `url` with extra per-request headers.
    pub async fn get(&self, url: &str, headers: &HeaderMap) -> Result<FetchedPage, CrawlError> {
        self.execute(Method::GET, url, None, headers).await
    }

    /// POST a JSON body to `url` with extra per-request headers.
    pub async fn post_json(
        &self,
        url: &str,
        body: &Value,
        headers: &HeaderMap,
    ) -> Result<FetchedPage, CrawlError> {
        self.execute(Method::POST, url, Some(body), headers).await
    }

    #[instrument(level = "debug", skip_all, fields(%method, %url))]
    async fn execute(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
        headers: &HeaderMap,
    ) -> Result<FetchedPage, CrawlError> {
        let t0 = Instant::now();
        let target = Url::parse(url)?;
        let response = self.send(method.clone(), target.clone(), body, headers).await?;
        let status = response.status();

        let response = if status.is_redirection() {
            let location = response
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| CrawlError::Redirect {
                    url: url.to_string(),
                    reason: format!("{status} without a Location header"),
                })?;
            let next = target.join(location)?;
            let (method, body) = match status {
                StatusCode::TEMPORARY_REDIRECT | StatusCode::PERMANENT_REDIRECT => (method, body),
                _ => (Method::GET, None),
            };
            debug!(%status, location = %next, "Following redirect");

            let followed = self.send(method, next.clone(), body, headers).await?;
            if followed.status().is_redirection() {
                warn!(first = %status, second = %followed.status(), "Redirect chain too long");
                return Err(CrawlError::Redirect {
                    url: next.to_string(),
                    reason: format!("second redirect ({})", followed.status()),
                });
            }
            followed
        } else {
            response
        };

        let page = Self::read(response).await?;
        debug!(
            status = page.status,
            bytes = page.body.len(),
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "Fetched page"
        );
        Ok(page)
    }

    async fn send(
        &self,
        method: Method,
        url: Url,
        body: Option<&Value>,
        headers: &HeaderMap,
    ) -> Result<Response, CrawlError> {
        let mut request = self.client.request(method, url).headers(headers.clone());
        if let Some(body) = body {
            request = request.json(body);
        }
        Ok(request.send().await?)
    }

    async fn read(response: Response) -> Result<FetchedPage, CrawlError> {
        let status = response.status();
        let url = response.url().to_string();
        if !status.is_success() {
            return Err(CrawlError::from_status(status, &url));
        }

        let content_encoding = response
            .headers()
            .get(CONTENT_ENCODING)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.text().await?;
        if body.trim().is_empty() {
            return Err(CrawlError::Parse(format!("empty body from {url}")));
        }
        debug!(preview = %truncate_for_log(&body, 200), "Response body");

        Ok(FetchedPage {
            url,
            status: status.as_u16(),
            content_encoding,
            body,
        })
    }
}
