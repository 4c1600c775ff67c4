//! Hyperlink filtering and resolution

use crate::config::ExtractionConfig;
use std::collections::HashSet;
use url::Url;

/// Keeps absolute http(s) links, resolving relative ones against an optional base
#[derive(Clone, Debug)]
pub struct LinkFilter {
    internal_schemes: Vec<String>,
    base: Option<Url>,
}

impl LinkFilter {
    /// Build a filter from extraction settings
    ///
    /// An unparsable `base_url` is treated as absent; [`Config::validate`](crate::Config::validate)
    /// rejects it before a pipeline is built.
    pub fn new(config: &ExtractionConfig) -> Self {
        Self {
            internal_schemes: config
                .internal_schemes
                .iter()
                .map(|s| s.trim_end_matches(':').to_ascii_lowercase())
                .collect(),
            base: config.base_url.as_deref().and_then(|b| Url::parse(b).ok()),
        }
    }

    /// The archived form of `href`, or `None` if it is not kept
    pub fn resolve(&self, href: &str) -> Option<String> {
        let href = href.trim();
        if href.is_empty() || is_hashtag_link(href) {
            return None;
        }
        if href
            .get(..11)
            .is_some_and(|p| p.eq_ignore_ascii_case("javascript:"))
        {
            return None;
        }

        let url = match Url::parse(href) {
            Ok(url) => url,
            Err(url::ParseError::RelativeUrlWithoutBase) => self.base.as_ref()?.join(href).ok()?,
            Err(_) => return None,
        };

        if self.internal_schemes.iter().any(|s| s == url.scheme()) {
            return None;
        }
        matches!(url.scheme(), "http" | "https").then(|| url.to_string())
    }

    /// Resolve every href, keeping first-seen order without duplicates
    pub fn collect<'a>(&self, hrefs: impl IntoIterator<Item = &'a str>) -> Vec<String> {
        let mut seen = HashSet::new();
        hrefs
            .into_iter()
            .filter_map(|h| self.resolve(h))
            .filter(|url| seen.insert(url.clone()))
            .collect()
    }
}

/// In-page anchors and hashtag search links
fn is_hashtag_link(href: &str) -> bool {
    href.starts_with('#') || href.contains("?q=%23") || href.contains("?q=#")
}
