//! Error taxonomy for fetching and extracting pages.
//!
//! Every [`CrawlError`] carries enough information for the pagination
//! controller to pick a delay class without looking at HTTP codes itself:
//! see [`CrawlError::backoff_class`].

use crate::backoff::BackoffClass;
use reqwest::StatusCode;
use thiserror::Error;

/// Error type for fetch and extraction operations.
#[derive(Debug, Error)]
pub enum CrawlError {
    /// Transport failure (timeout, refused connection, TLS, body read).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// HTTP 429 or a site-specific throttle signal.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// HTTP 403.
    #[error("access forbidden: {0}")]
    Blocked(String),

    /// HTTP 404.
    #[error("not found: {0}")]
    NotFound(String),

    /// HTTP 500-504.
    #[error("server error {status} for {url}")]
    Server { status: u16, url: String },

    /// Any other non-2xx status.
    #[error("unexpected status {status} for {url}")]
    Status { status: u16, url: String },

    /// A redirect that could not be followed in a single hop.
    #[error("redirect from {url} not followed: {reason}")]
    Redirect { url: String, reason: String },

    /// Nothing usable could be pulled out of a response.
    #[error("parse error: {0}")]
    Parse(String),

    #[error("URL parsing error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CrawlError {
    /// Map a non-success HTTP status to the matching error variant.
    pub fn from_status(status: StatusCode, url: &str) -> Self {
        let url = url.to_string();
        match status.as_u16() {
            403 => CrawlError::Blocked(url),
            404 => CrawlError::NotFound(url),
            429 => CrawlError::RateLimited(url),
            code @ 500..=504 => CrawlError::Server { status: code, url },
            code => CrawlError::Status { status: code, url },
        }
    }

    /// Which delay class a retry of the failed request belongs to.
    pub fn backoff_class(&self) -> BackoffClass {
        match self {
            CrawlError::RateLimited(_) => BackoffClass::RateLimited,
            CrawlError::Blocked(_) => BackoffClass::Blocked,
            CrawlError::Http(_)
            | CrawlError::Server { .. }
            | CrawlError::Status { .. }
            | CrawlError::Redirect { .. } => BackoffClass::Transient,
            CrawlError::NotFound(_)
            | CrawlError::Parse(_)
            | CrawlError::UrlParse(_)
            | CrawlError::Json(_) => BackoffClass::Fatal,
        }
    }

    /// Whether retrying the same request could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        self.backoff_class() != BackoffClass::Fatal
    }
}
