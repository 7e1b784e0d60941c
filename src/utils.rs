//! Small text, URL and filesystem helpers used across the crate.
//!
//! - Truncation of long bodies for log output
//! - URL normalization (the dedup identity)
//! - Whitespace collapsing and summary synthesis for extracted text
//! - Output directory validation for run reports

use std::error::Error;
use std::fs as stdfs;
use tokio::fs;
use tracing::{info, instrument};
use url::Url;

/// Truncate a string for logging purposes.
///
/// Long strings are cut at a character boundary after `max` bytes at most,
/// and a byte count indicator is appended.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(truncate_for_log("short", 100), "short");
/// assert_eq!(truncate_for_log(&"a".repeat(500), 10), "aaaaaaaaaa…(+490 bytes)");
/// ```
pub fn truncate_for_log(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut cut = max;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…(+{} bytes)", &s[..cut], s.len() - cut)
}

/// Canonical form of a URL used as the deduplication identity.
///
/// Trims, lowercases, unifies `http://` to `https://` and strips trailing
/// slashes, so `http://X.com/a/` and `HTTPS://x.com/A` compare equal.
pub fn normalize_url(url: &str) -> String {
    let mut normalized = url.trim().to_lowercase();
    if let Some(rest) = normalized.strip_prefix("http://") {
        normalized = format!("https://{rest}");
    }
    while normalized.ends_with('/') {
        normalized.pop();
    }
    normalized
}

/// Resolve a possibly relative link against a base URL.
///
/// Returns `None` for empty links and `javascript:`/`mailto:` pseudo links.
pub fn resolve_link(base: &Url, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }
    let lower = href.to_ascii_lowercase();
    if lower.starts_with("javascript:") || lower.starts_with("mailto:") {
        return None;
    }
    base.join(href).ok().map(|u| u.to_string())
}

/// Collapse runs of whitespace (including newlines and NBSP) into single spaces.
pub fn collapse_whitespace(s: &str) -> String {
    s.split(|c: char| c.is_whitespace() || c == '\u{a0}')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Build a short summary from body text.
///
/// Takes the first `max_chars` characters, trims trailing punctuation and
/// whitespace, and appends `...` when the body was cut.
pub fn summarize(body: &str, max_chars: usize) -> Option<String> {
    let body = collapse_whitespace(body);
    if body.is_empty() {
        return None;
    }
    if body.chars().count() <= max_chars {
        return Some(body);
    }
    let head: String = body.chars().take(max_chars).collect();
    let head = head.trim_end_matches(|c: char| !c.is_alphanumeric());
    Some(format!("{head}..."))
}

/// Turn an empty or whitespace-only string into `None`.
pub fn non_empty(s: impl Into<String>) -> Option<String> {
    let s = s.into();
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else if trimmed.len() == s.len() {
        Some(s)
    } else {
        Some(trimmed.to_string())
    }
}

/// Ensure a directory exists and is writable.
///
/// Creates the directory if needed, then creates and removes a probe file.
#[instrument(level = "info", skip_all, fields(path = %path))]
pub async fn ensure_writable_dir(path: &str) -> Result<(), Box<dyn Error>> {
    fs::create_dir_all(path).await?;
    let probe_path = format!("{}/..__probe_write__", path.trim_end_matches('/'));
    match stdfs::File::create(&probe_path) {
        Ok(_) => {
            let _ = stdfs::remove_file(&probe_path);
            info!("Output directory is writable");
            Ok(())
        }
        Err(e) => Err(Box::new(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_for_log_short_string() {
        assert_eq!(truncate_for_log("Hello, world!", 100), "Hello, world!");
    }

    #[test]
    fn test_truncate_for_log_long_string() {
        let s = "a".repeat(500);
        let result = truncate_for_log(&s, 100);
        assert!(result.starts_with(&"a".repeat(100)));
        assert!(result.contains("…(+400 bytes)"));
    }

    #[test]
    fn test_truncate_for_log_multibyte() {
        let s = "發布日期：2025年8月14日";
        let result = truncate_for_log(s, 4);
        assert!(result.starts_with("發"));
        assert!(result.contains("bytes)"));
    }

    #[test]
    fn test_normalize_url_equivalence() {
        let a = normalize_url("http://X.com/a/");
        let b = normalize_url("https://x.com/a");
        let c = normalize_url("HTTPS://X.COM/A");
        assert_eq!(a, "https://x.com/a");
        assert_eq!(a, b);
        assert_eq!(b, c);
    }

    #[test]
    fn test_normalize_url_trims() {
        assert_eq!(normalize_url("  https://x.com//  "), "https://x.com");
    }

    #[test]
    fn test_resolve_link() {
        let base = Url::parse("https://www.ntek.org.cn/xinwenzixun.html").unwrap();
        assert_eq!(
            resolve_link(&base, "/news/1.html").as_deref(),
            Some("https://www.ntek.org.cn/news/1.html")
        );
        assert_eq!(
            resolve_link(&base, "https://other.org/x").as_deref(),
            Some("https://other.org/x")
        );
        assert_eq!(resolve_link(&base, "javascript:void(0)"), None);
        assert_eq!(resolve_link(&base, ""), None);
    }

    #[test]
    fn test_collapse_whitespace() {
        assert_eq!(collapse_whitespace("  a\n\t b\u{a0}c  "), "a b c");
    }

    #[test]
    fn test_summarize() {
        assert_eq!(summarize("short body", 200).as_deref(), Some("short body"));
        assert_eq!(summarize("   ", 200), None);
        let long = format!("{}, and more text", "word ".repeat(60));
        let summary = summarize(&long, 200).unwrap();
        assert!(summary.ends_with("..."));
        assert!(!summary.ends_with(" ..."));
        assert!(summary.chars().count() <= 203);
    }

    #[test]
    fn test_non_empty() {
        assert_eq!(non_empty("  "), None);
        assert_eq!(non_empty(" x ").as_deref(), Some("x"));
        assert_eq!(non_empty("x").as_deref(), Some("x"));
    }
}
