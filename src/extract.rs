//! Shared helpers for pulling items out of HTML.
//!
//! Source extractors describe each field as an ordered list of CSS selectors
//! (primary first, then fallbacks); these helpers walk that list and return
//! the first non-empty hit. [`NoiseFilter`] drops navigation chrome and
//! call-to-action blocks before text is taken.

use crate::error::CrawlError;
use crate::utils::collapse_whitespace;
use scraper::{ElementRef, Selector};
use std::collections::HashSet;
use tracing::warn;

/// Parse a CSS selector, mapping failures to [`CrawlError::Parse`].
pub fn parse_selector(css: &str) -> Result<Selector, CrawlError> {
    Selector::parse(css).map_err(|e| CrawlError::Parse(format!("invalid selector '{css}': {e}")))
}

/// Parse a list of selectors, skipping (and logging) invalid ones.
pub fn parse_selectors(list: &[&str]) -> Vec<Selector> {
    list.iter()
        .filter_map(|css| match Selector::parse(css) {
            Ok(selector) => Some(selector),
            Err(e) => {
                warn!(selector = %css, error = %e, "Skipping invalid selector");
                None
            }
        })
        .collect()
}

/// Whitespace-collapsed text of an element.
pub fn element_text(element: ElementRef<'_>) -> String {
    collapse_whitespace(&element.text().collect::<Vec<_>>().join(" "))
}

/// First element matched by any selector, trying selectors in order.
pub fn first_element<'a>(scope: ElementRef<'a>, selectors: &[Selector]) -> Option<ElementRef<'a>> {
    selectors
        .iter()
        .find_map(|selector| scope.select(selector).next())
}

/// First non-empty text matched by any selector, trying selectors in order.
pub fn first_text(scope: ElementRef<'_>, selectors: &[Selector]) -> Option<String> {
    selectors.iter().find_map(|selector| {
        scope
            .select(selector)
            .map(element_text)
            .find(|text| !text.is_empty())
    })
}

/// First non-empty attribute value matched by any selector.
pub fn first_attr(scope: ElementRef<'_>, selectors: &[Selector], attr: &str) -> Option<String> {
    selectors.iter().find_map(|selector| {
        scope
            .select(selector)
            .filter_map(|el| el.value().attr(attr))
            .map(str::trim)
            .find(|v| !v.is_empty())
            .map(str::to_string)
    })
}

/// Removes noise elements and boilerplate phrases from extracted text.
#[derive(Debug, Clone)]
pub struct NoiseFilter {
    selectors: Vec<Selector>,
    phrases: Vec<String>,
}

impl NoiseFilter {
    /// Build a filter from CSS selectors for noise elements and literal
    /// boilerplate phrases. `script` and `style` are always dropped.
    pub fn new(selectors: &[&str], phrases: &[&str]) -> Self {
        let mut all = vec!["script", "style", "noscript"];
        all.extend_from_slice(selectors);
        Self {
            selectors: parse_selectors(&all),
            phrases: phrases.iter().map(|p| p.to_string()).collect(),
        }
    }

    /// Text of `element` without noise descendants and boilerplate phrases.
    pub fn clean_text(&self, element: ElementRef<'_>) -> String {
        let noisy: HashSet<_> = self
            .selectors
            .iter()
            .flat_map(|selector| element.select(selector))
            .map(|el| (*el).id())
            .collect();

        let mut parts: Vec<&str> = Vec::new();
        for node in (*element).descendants() {
            let Some(text) = node.value().as_text() else {
                continue;
            };
            if node.ancestors().any(|a| noisy.contains(&a.id())) {
                continue;
            }
            let text: &str = text;
            parts.push(text);
        }

        self.strip_phrases(&collapse_whitespace(&parts.join(" ")))
    }

    /// Remove boilerplate phrases (case-insensitive for ASCII) from `text`.
    pub fn strip_phrases(&self, text: &str) -> String {
        let mut cleaned = text.to_string();
        for phrase in &self.phrases {
            let needle = phrase.to_ascii_lowercase();
            while let Some(pos) = cleaned.to_ascii_lowercase().find(&needle) {
                cleaned.replace_range(pos..pos + needle.len(), " ");
            }
        }
        collapse_whitespace(&cleaned)
    }

    /// Whether `element` itself matches one of the noise selectors.
    pub fn is_noise(&self, element: ElementRef<'_>) -> bool {
        self.selectors.iter().any(|s| s.matches(&element))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::Html;

    #[test]
    fn test_first_text_uses_fallbacks() {
        let doc = Html::parse_fragment(r#"<div><span class="date"></span><p class="time">2025-08-14</p></div>"#);
        let selectors = parse_selectors(&[".publish-time", ".date", ".time"]);
        assert_eq!(
            first_text(doc.root_element(), &selectors).as_deref(),
            Some("2025-08-14")
        );
    }

    #[test]
    fn test_first_attr() {
        let doc = Html::parse_fragment(r#"<li><a>no link</a><h4><a href=" /news/1.html ">T</a></h4></li>"#);
        let selectors = parse_selectors(&["a[href]"]);
        assert_eq!(
            first_attr(doc.root_element(), &selectors, "href").as_deref(),
            Some("/news/1.html")
        );
    }

    #[test]
    fn test_invalid_selectors_are_skipped() {
        let selectors = parse_selectors(&["div[", ".ok"]);
        assert_eq!(selectors.len(), 1);
        assert!(matches!(parse_selector("div["), Err(CrawlError::Parse(_))));
    }

    #[test]
    fn test_noise_filter_drops_elements_and_phrases() {
        let html = r#"
            <div class="detail">
              <div class="navigation">Home &gt; News</div>
              <p>EN 18031 becomes mandatory.</p>
              <script>var x = 1;</script>
              <div class="consult"><a>立即咨询</a></div>
              <p>Get a Quote today for testing.</p>
            </div>"#;
        let doc = Html::parse_fragment(html);
        let filter = NoiseFilter::new(&[".navigation", ".consult"], &["get a quote", "立即咨询"]);
        let root = doc.root_element();

        let text = filter.clean_text(root);
        assert_eq!(text, "EN 18031 becomes mandatory. today for testing.");
    }

    #[test]
    fn test_is_noise() {
        let doc = Html::parse_fragment(r#"<div class="ads">buy</div>"#);
        let filter = NoiseFilter::new(&[".ads"], &[]);
        let sel = parse_selector(".ads").unwrap();
        let el = doc.select(&sel).next().unwrap();
        assert!(filter.is_noise(el));
    }
}
