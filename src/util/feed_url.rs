use thiserror::Error;
use url::Url;

/// Errors returned when a string cannot be used as a feed subscription URL.
#[derive(Error, Debug)]
pub enum FeedUrlError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
    #[error("URL has no host")]
    MissingHost,
}

/// Validates a feed subscription URL.
///
/// Feeds are fetched over HTTP, so only `http`/`https` URLs with a host are
/// accepted. Article links are never validated here; they go through
/// [`base_identity`](super::base_identity), which accepts anything.
///
/// ```
/// use greeder::util::validate_feed_url;
///
/// assert!(validate_feed_url("https://example.com/feed.xml").is_ok());
/// assert!(validate_feed_url("file:///etc/passwd").is_err());
/// ```
pub fn validate_feed_url(raw: &str) -> Result<Url, FeedUrlError> {
    let url = Url::parse(raw.trim())?;
    match url.scheme() {
        "http" | "https" => {}
        scheme => return Err(FeedUrlError::UnsupportedScheme(scheme.to_owned())),
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(FeedUrlError::MissingHost);
    }
    Ok(url)
}
