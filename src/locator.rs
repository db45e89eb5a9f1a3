//! Markup locator.
//!
//! Finds sub-resource references (document links, chart images) in a
//! rendered page by matching an attribute against a pattern, then resolves
//! them against the page URL.

use regex::Regex;
use scraper::{Html, Selector};
use url::Url;

use crate::error::{PipelineError, Result};

/// Which element/attribute pairs a locator inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    /// `<a href="...">`
    Anchor,
    /// `<img src="...">`
    Image,
}

impl LinkKind {
    fn selector(self) -> &'static str {
        match self {
            LinkKind::Anchor => "a[href]",
            LinkKind::Image => "img[src]",
        }
    }

    fn attribute(self) -> &'static str {
        match self {
            LinkKind::Anchor => "href",
            LinkKind::Image => "src",
        }
    }
}

/// A predicate over markup nodes: element kind plus attribute pattern.
#[derive(Debug, Clone)]
pub struct Locator {
    kind: LinkKind,
    pattern: Regex,
}

impl Locator {
    pub fn new(kind: LinkKind, pattern: &str) -> Result<Self> {
        let pattern = Regex::new(pattern)
            .map_err(|e| PipelineError::Catalog(format!("bad pattern {:?}: {}", pattern, e)))?;
        Ok(Self { kind, pattern })
    }

    /// First anchor whose `href` matches.
    pub fn anchor(pattern: &str) -> Result<Self> {
        Self::new(LinkKind::Anchor, pattern)
    }

    /// Images whose `src` matches.
    pub fn image(pattern: &str) -> Result<Self> {
        Self::new(LinkKind::Image, pattern)
    }

    /// All matching attribute values, in document order, unresolved.
    pub fn matches(&self, html: &str) -> Vec<String> {
        let document = Html::parse_document(html);
        // Both selectors are static and valid
        let selector = match Selector::parse(self.kind.selector()) {
            Ok(s) => s,
            Err(_) => return Vec::new(),
        };

        document
            .select(&selector)
            .filter_map(|el| el.value().attr(self.kind.attribute()))
            .filter(|value| self.pattern.is_match(value))
            .map(|value| value.to_string())
            .collect()
    }

    /// Resolve every match against `base`.
    pub fn find_all(&self, html: &str, base: &Url) -> Result<Vec<Url>> {
        self.matches(html)
            .iter()
            .map(|reference| resolve(base, reference))
            .collect()
    }

    /// Resolve the first match against `base`, or fail with `NotFound`.
    pub fn find_first(&self, html: &str, base: &Url) -> Result<Url> {
        let reference = self.matches(html).into_iter().next().ok_or_else(|| {
            PipelineError::not_found(
                format!("{} on {}", self.kind.selector(), base),
                self.pattern.as_str(),
            )
        })?;
        resolve(base, &reference)
    }
}

/// Resolve a possibly-relative reference against the page URL.
pub fn resolve(base: &Url, reference: &str) -> Result<Url> {
    base.join(reference)
        .map_err(|e| PipelineError::network(reference, format!("invalid URL: {}", e)))
}
