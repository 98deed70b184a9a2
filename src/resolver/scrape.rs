use std::sync::LazyLock;

use anyhow::Result;
use regex::Regex;
use reqwest::Url;
use scraper::{Html, Selector};
use tracing::{debug, instrument};

use super::{FALLBACK_URL, LinkResolver};
use crate::util::{FetchConfig, fetch_page, init_http_client};

/// Upper bound of external scripts fetched for a single page
pub const MAX_SCRIPT_FETCHES: usize = 5;

/// How far back from a `.m3u8` marker an `http` scheme is searched for
const MARKER_WINDOW: usize = 400;

const M3U8: &str = ".m3u8";

static M3U8_URL_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)https?://[^\s"'<>#]+?\.m3u8"#).unwrap());
static ANY_URL_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)https?://[^\s"'<>]+"#).unwrap());
static SCHEME_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)https?://").unwrap());
static M3U8_ATTR_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(?:href|src)=["']([^"']+\.m3u8)["']"#).unwrap()
});

/// Finds `.m3u8` links by scanning the page text, its markup and finally its
/// external scripts
pub struct ScrapeResolver {
    client: reqwest::Client,
    config: FetchConfig,
}

impl ScrapeResolver {
    /// # Errors
    /// Errors when the HTTP client cannot be built
    pub fn new(config: FetchConfig) -> Result<Self> {
        Ok(Self {
            client: init_http_client(&config)?,
            config,
        })
    }

    /// Returns `Ok(None)` when the page was fetched but carries no link
    ///
    /// # Errors
    /// Errors when the page itself cannot be fetched
    #[instrument(skip(self))]
    pub async fn find_stream(&self, url: &str) -> Result<Option<String>> {
        let page = fetch_page(&self.client, url, &self.config).await?;

        let scripts = {
            let document = Html::parse_document(&page.body);
            if let Some(link) = find_m3u8_in_page(&page.body, &document, &page.url) {
                return Ok(Some(link));
            }
            script_sources(&document, &page.url)
        };

        for script in scripts {
            debug!("Looking into script {script}");
            match fetch_page(&self.client, script.as_str(), &self.config).await {
                Ok(script_page) => {
                    if let Some(link) = find_direct_link(&script_page.body) {
                        return Ok(Some(link));
                    }
                }
                Err(e) => debug!("Skipping script {script}: {e:#}"),
            }
        }

        Ok(None)
    }
}

impl LinkResolver for ScrapeResolver {
    async fn resolve(&self, url: &str) -> String {
        let url = url.trim();
        if url.is_empty() {
            return FALLBACK_URL.to_string();
        }

        match self.find_stream(url).await {
            Ok(Some(link)) => link,
            Ok(None) => {
                debug!("No .m3u8 link found on {url}");
                FALLBACK_URL.to_string()
            }
            Err(e) => {
                debug!("Unable to fetch {url}: {e:#}");
                FALLBACK_URL.to_string()
            }
        }
    }
}

/// Runs every in-page heuristic in order, first hit wins
///
/// `document` is the parsed form of `text`. Relative references are joined
/// against `base`, which should be the URL the page was actually served from.
#[must_use]
pub fn find_m3u8_in_page(text: &str, document: &Html, base: &Url) -> Option<String> {
    find_direct_link(text)
        .or_else(|| find_link_near_marker(text))
        .or_else(|| find_link_in_markup(text, document, base))
        .or_else(|| find_link_in_any_url(text))
}

/// First absolute URL ending in `.m3u8`
#[must_use]
pub fn find_direct_link(text: &str) -> Option<String> {
    M3U8_URL_REGEX.find(text).map(|m| m.as_str().to_string())
}

/// Walks back from the first `.m3u8` to the closest preceding scheme
#[must_use]
pub fn find_link_near_marker(text: &str) -> Option<String> {
    // ASCII lowercasing keeps byte offsets intact
    let idx = text.to_ascii_lowercase().find(M3U8)?;
    let end = idx + M3U8.len();

    let mut start = idx.saturating_sub(MARKER_WINDOW);
    while !text.is_char_boundary(start) {
        start += 1;
    }
    let window = &text[start..end];

    let scheme = SCHEME_REGEX.find_iter(window).last()?;
    let candidate = window[scheme.start()..]
        .split_whitespace()
        .next()?
        .trim_matches(|c| matches!(c, '\'' | '"' | '<' | '>' | ')' | ',' | ';'));

    ends_with_m3u8(candidate).then(|| candidate.to_string())
}

/// Looks at `src`/`href`/`data-src` attributes of media and link elements
#[must_use]
pub fn find_link_in_markup(html: &str, document: &Html, base: &Url) -> Option<String> {
    if let Ok(selector) = Selector::parse("source") {
        for element in document.select(&selector) {
            let element = element.value();
            let src = non_empty(element.attr("src"))
                .or_else(|| non_empty(element.attr("data-src")))
                .filter(|s| ends_with_m3u8(s));
            if let Some(link) = src.and_then(|src| join(base, src)) {
                return Some(link);
            }
        }
    }

    if let Ok(selector) = Selector::parse("iframe, link, a") {
        for element in document.select(&selector) {
            let element = element.value();
            let src = non_empty(element.attr("src"))
                .or_else(|| non_empty(element.attr("href")))
                .or_else(|| non_empty(element.attr("data-src")))
                .filter(|s| contains_m3u8(s));
            if let Some(link) = src.and_then(|src| join(base, src)) {
                return Some(link);
            }
        }
    }

    // Attributes the parser could not attribute to an element, e.g. inside
    // inline scripts or templates
    M3U8_ATTR_REGEX
        .captures_iter(html)
        .find_map(|caps| join(base, caps.get(1)?.as_str()))
}

/// First absolute URL mentioning `.m3u8`, cut right after the extension
#[must_use]
pub fn find_link_in_any_url(text: &str) -> Option<String> {
    ANY_URL_REGEX.find_iter(text).find_map(|m| {
        let url = m.as_str();
        let end = url.to_ascii_lowercase().find(M3U8)? + M3U8.len();
        Some(url[..end].to_string())
    })
}

/// External script URLs referenced by the page, at most [`MAX_SCRIPT_FETCHES`]
#[must_use]
pub fn script_sources(document: &Html, base: &Url) -> Vec<Url> {
    let Ok(selector) = Selector::parse("script[src]") else {
        return Vec::new();
    };

    document
        .select(&selector)
        .filter_map(|element| element.value().attr("src"))
        .filter_map(|src| base.join(src.trim()).ok())
        .filter(|url| matches!(url.scheme(), "http" | "https"))
        .take(MAX_SCRIPT_FETCHES)
        .collect()
}

fn join(base: &Url, reference: &str) -> Option<String> {
    base.join(reference.trim()).ok().map(String::from)
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

fn ends_with_m3u8(s: &str) -> bool {
    s.to_ascii_lowercase().ends_with(M3U8)
}

fn contains_m3u8(s: &str) -> bool {
    s.to_ascii_lowercase().contains(M3U8)
}
