use url::{ParseError, Url};

/// Derives the canonical identity of an article from its URL.
///
/// The identity is the URL with its query string and fragment removed, so
/// `https://x.test/post?utm_source=a` and `https://x.test/post#comments`
/// both map to `https://x.test/post`. It is the key ingestion and
/// reconciliation use to decide that two rows describe the same article.
///
/// Whitespace-only input yields an empty identity. Relative references such
/// as `/post?utm=1` lose their query and fragment too. Input that cannot be
/// parsed at all is returned trimmed but otherwise unchanged, so a malformed
/// link never blocks ingestion; it simply becomes its own identity.
///
/// # Examples
///
/// ```
/// use greeder::util::base_identity;
///
/// assert_eq!(base_identity("https://x.test/post?a=1#top"), "https://x.test/post");
/// assert_eq!(base_identity("/post?a=1"), "/post");
/// assert_eq!(base_identity("   "), "");
/// assert_eq!(base_identity("http://[::1"), "http://[::1");
/// ```
pub fn base_identity(raw: &str) -> String {
    let raw = raw.trim();
    if raw.is_empty() {
        return String::new();
    }
    match Url::parse(raw) {
        Ok(mut url) => {
            url.set_query(None);
            url.set_fragment(None);
            url.into()
        }
        Err(ParseError::RelativeUrlWithoutBase) => {
            let end = raw.find(['?', '#']).unwrap_or(raw.len());
            raw[..end].trim_end().to_string()
        }
        Err(_) => raw.to_string(),
    }
}

/// Resolves the identity to store for a row.
///
/// Falls back from the identity derived from `url`, to the previously stored
/// identity, to the raw URL itself.
pub fn resolve_identity(url: &str, stored: Option<&str>) -> String {
    let derived = base_identity(url);
    if !derived.is_empty() {
        return derived;
    }
    match stored.map(str::trim) {
        Some(stored) if !stored.is_empty() => stored.to_string(),
        _ => url.to_string(),
    }
}
