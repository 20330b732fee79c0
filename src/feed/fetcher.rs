use futures::stream::{self, StreamExt};
use reqwest::redirect::Policy;
use std::time::Duration;
use thiserror::Error;

use crate::config::Config;
use crate::feed::parser::{parse_feed, ParsedFeed};
use crate::storage::{Database, Feed, StoreError};

/// Errors that can occur while refreshing a feed.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    #[error("Request timed out")]
    Timeout,
    /// Feed XML could not be parsed as RSS or Atom
    #[error("Parse error: {0}")]
    Parse(String),
    /// Parsed articles could not be stored
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    /// Server kept answering 429 Too Many Requests
    #[error("Rate limited after {0} retries")]
    RateLimited(u32),
    #[error("Response too large")]
    ResponseTooLarge,
    /// Fewer bytes arrived than Content-Length announced
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
}

/// Knobs for feed fetching.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Per-request timeout
    pub timeout: Duration,
    /// Retries after a 429, 5xx or truncated body
    pub max_retries: u32,
    /// First retry delay; doubles on each retry
    pub backoff_base: Duration,
    /// Feeds fetched at the same time by [`refresh_all`]
    pub max_concurrency: usize,
    /// Largest accepted response body, in bytes
    pub max_feed_size: usize,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retries: 3,
            backoff_base: Duration::from_secs(2),
            max_concurrency: 10,
            max_feed_size: 10 * 1024 * 1024,
        }
    }
}

impl FetchOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            timeout: Duration::from_secs(config.fetch_timeout_secs),
            max_concurrency: config.max_concurrent_fetches.max(1),
            ..Self::default()
        }
    }
}

/// HTTP client for feed fetching: at most 3 redirects, loops rejected.
pub fn build_client(options: &FetchOptions) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .redirect(redirect_policy())
        .user_agent(concat!("greeder/", env!("CARGO_PKG_VERSION")))
        .pool_max_idle_per_host(4)
        .pool_idle_timeout(Duration::from_secs(30))
        .timeout(options.timeout)
        .build()
}

fn redirect_policy() -> Policy {
    Policy::custom(|attempt| {
        if attempt.previous().len() >= 3 {
            return attempt.error("Too many redirects (max 3)");
        }

        let url = attempt.url();
        if attempt.previous().iter().any(|prev| prev.as_str() == url.as_str()) {
            return attempt.error("Redirect loop detected");
        }

        tracing::debug!(
            to = %url,
            hop = attempt.previous().len() + 1,
            "Following redirect"
        );
        attempt.follow()
    })
}

/// Result of refreshing one feed.
#[derive(Debug)]
pub struct FetchResult {
    pub feed_id: i64,
    /// Number of new canonical articles, or why the refresh failed
    pub result: Result<usize, FetchError>,
}

/// Refresh every feed with bounded concurrency.
///
/// Results arrive in completion order. A failing feed never affects the
/// others: each one ingests in its own transaction.
pub async fn refresh_all(
    db: &Database,
    client: &reqwest::Client,
    feeds: Vec<Feed>,
    options: &FetchOptions,
) -> Vec<FetchResult> {
    if feeds.is_empty() {
        return Vec::new();
    }
    let total = feeds.len();

    let results: Vec<FetchResult> = stream::iter(feeds)
        .map(|feed| async move { refresh_one(db, client, &feed, options).await })
        .buffer_unordered(options.max_concurrency.max(1))
        .collect()
        .await;

    let failed = results.iter().filter(|r| r.result.is_err()).count();
    tracing::info!(total, failed, "Feed refresh finished");
    results
}

/// Fetch one feed and ingest its articles.
pub async fn refresh_one(
    db: &Database,
    client: &reqwest::Client,
    feed: &Feed,
    options: &FetchOptions,
) -> FetchResult {
    let result = async {
        let parsed = fetch_feed(client, &feed.url, options).await?;
        let inserted = db.ingest(feed.id, &parsed.articles).await?;
        Ok::<_, FetchError>(inserted.len())
    }
    .await;

    match &result {
        Ok(count) => tracing::debug!(feed_id = feed.id, new = *count, "Feed refreshed"),
        Err(e) => tracing::warn!(feed_id = feed.id, url = %feed.url, error = %e, "Feed refresh failed"),
    }

    FetchResult {
        feed_id: feed.id,
        result,
    }
}

/// Download and parse a feed, retrying transient failures with exponential
/// backoff.
pub async fn fetch_feed(
    client: &reqwest::Client,
    url: &str,
    options: &FetchOptions,
) -> Result<ParsedFeed, FetchError> {
    let mut retry = 0;

    let bytes = loop {
        let response = tokio::time::timeout(options.timeout, client.get(url).send())
            .await
            .map_err(|_| FetchError::Timeout)?
            .map_err(FetchError::Network)?;
        let status = response.status();

        let error = if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            FetchError::RateLimited(options.max_retries)
        } else if status.is_server_error() {
            FetchError::HttpStatus(status.as_u16())
        } else if !status.is_success() {
            return Err(FetchError::HttpStatus(status.as_u16()));
        } else {
            match read_limited_bytes(response, options.max_feed_size).await {
                Ok(bytes) => break bytes,
                Err(e @ FetchError::IncompleteResponse { .. }) => e,
                Err(e) => return Err(e),
            }
        };

        if retry >= options.max_retries {
            return Err(error);
        }
        let delay = options.backoff_base * 2u32.pow(retry);
        tracing::warn!(
            url = %url,
            error = %error,
            retry,
            delay_ms = delay.as_millis() as u64,
            "Transient fetch failure, backing off"
        );
        tokio::time::sleep(delay).await;
        retry += 1;
    };

    parse_feed(&bytes).map_err(|e| FetchError::Parse(e.to_string()))
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    let expected_length = response.content_length();

    if let Some(len) = expected_length {
        if len as usize > limit {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(FetchError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(FetchError::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}
