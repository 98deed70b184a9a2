use std::time::Duration;

use anyhow::{Context, Result, bail};
use reqwest::{
    StatusCode, Url,
    header::{ACCEPT, HeaderMap, HeaderValue, USER_AGENT},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

/// Pages tend to hide stream links from non-browser user agents
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/115.0 Safari/537.36";

const RETRY_STATUSES: [StatusCode; 5] = [
    StatusCode::TOO_MANY_REQUESTS,
    StatusCode::INTERNAL_SERVER_ERROR,
    StatusCode::BAD_GATEWAY,
    StatusCode::SERVICE_UNAVAILABLE,
    StatusCode::GATEWAY_TIMEOUT,
];

#[derive(Debug, Clone, Copy)]
pub struct FetchConfig {
    /// Per-request timeout
    pub timeout: Duration,
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry, doubled for every following one
    pub backoff: Duration,
}

impl FetchConfig {
    #[must_use]
    pub const fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            max_retries: 2,
            backoff: Duration::from_millis(500),
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self::with_timeout(Duration::from_secs(12))
    }
}

/// A fetched page body along with the URL it was served from after redirects
#[derive(Debug, Clone)]
pub struct Page {
    pub url: Url,
    pub body: String,
}

/// Shortens `s` to at most `max_chars` characters, marking the cut with `...`
#[must_use]
pub fn truncate_string(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }

    let keep = max_chars.saturating_sub(3);
    let end = s.char_indices().nth(keep).map_or(s.len(), |(i, _)| i);
    format!("{}...", &s[..end])
}

/// # Errors
/// Errors when the TLS backend cannot be initialized
pub fn init_http_client(config: &FetchConfig) -> Result<reqwest::Client> {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_USER_AGENT));
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
    );

    reqwest::Client::builder()
        .default_headers(headers)
        .cookie_store(true)
        .timeout(config.timeout)
        .build()
        .context("Building HTTP client")
}

/// Spawn a task that watches for CTRL + C signal and cancels a [`CancellationToken`] when caught
pub fn spawn_ct_watcher(ct: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Caught CTRL+C signal!");
            ct.cancel();
        }
    });
}

/// Fetches a page as text, retrying on rate limiting, server errors and
/// connection failures.
///
/// Bodies of other non-success responses are still returned, pages behind a
/// 404 occasionally carry the link anyway.
///
/// # Errors
/// Errors on timeouts, invalid URLs and once retries are exhausted
#[instrument(skip(client, config))]
pub async fn fetch_page(client: &reqwest::Client, url: &str, config: &FetchConfig) -> Result<Page> {
    let url = Url::parse(url).with_context(|| format!("Parsing URL {url}"))?;

    let mut attempt = 0;
    loop {
        let retryable = match client.get(url.clone()).send().await {
            Ok(res) if RETRY_STATUSES.contains(&res.status()) => {
                format!("status {}", res.status())
            }
            Ok(res) => {
                let final_url = res.url().clone();
                let bytes = res.bytes().await.context("Reading response body")?;
                return Ok(Page {
                    url: final_url,
                    body: String::from_utf8_lossy(&bytes).into_owned(),
                });
            }
            Err(e) if e.is_connect() => e.to_string(),
            Err(e) => return Err(e).context("Sending request"),
        };

        if attempt >= config.max_retries {
            bail!("Giving up after {} attempts: {retryable}", attempt + 1);
        }

        let delay = config.backoff * 2u32.pow(attempt);
        debug!("Retrying in {delay:?} ({retryable})");
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_cli_defaults() {
        let config = FetchConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(12));
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.backoff, Duration::from_millis(500));
    }

    #[test]
    fn truncates_on_char_boundaries() {
        assert_eq!(truncate_string("short", 10), "short");
        assert_eq!(truncate_string("https://example.com/live", 12), "https://e...");
        assert_eq!(truncate_string("çççççç", 5), "çç...");
    }

    #[tokio::test]
    async fn invalid_url_is_an_error() {
        let config = FetchConfig::default();
        let client = init_http_client(&config).unwrap();
        assert!(fetch_page(&client, "not a url", &config).await.is_err());
    }
}
