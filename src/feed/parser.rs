use feed_rs::model::{Entry, Link};
use feed_rs::parser::{self, ParseFeedError};
use sha2::{Digest, Sha256};

use crate::storage::IncomingArticle;

/// Channel metadata plus the entries of one parsed RSS/Atom document.
#[derive(Debug, Clone, Default)]
pub struct ParsedFeed {
    pub title: String,
    pub site_url: String,
    pub description: String,
    pub articles: Vec<IncomingArticle>,
}

/// Parse RSS or Atom bytes into articles ready for ingestion.
pub fn parse_feed(bytes: &[u8]) -> Result<ParsedFeed, ParseFeedError> {
    let feed = parser::parse(bytes)?;

    let articles = feed.entries.into_iter().map(into_incoming).collect();

    Ok(ParsedFeed {
        title: feed.title.map(|t| t.content.trim().to_string()).unwrap_or_default(),
        site_url: preferred_link(&feed.links).unwrap_or_default(),
        description: feed
            .description
            .map(|d| d.content.trim().to_string())
            .unwrap_or_default(),
        articles,
    })
}

fn into_incoming(entry: Entry) -> IncomingArticle {
    let url = preferred_link(&entry.links).unwrap_or_default();
    let published = entry.published.or(entry.updated).map(|dt| dt.timestamp());
    let title = entry
        .title
        .map(|t| t.content.trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| "Untitled".to_string());
    let author = entry
        .authors
        .iter()
        .map(|p| p.name.trim())
        .find(|name| !name.is_empty())
        .unwrap_or_default()
        .to_string();
    let content = entry
        .content
        .and_then(|c| c.body)
        .or_else(|| entry.summary.map(|s| s.content))
        .unwrap_or_default();
    let content_text = plain_text(&content);
    let guid = entry_guid(&entry.id, &url, &title, published);

    IncomingArticle {
        guid,
        title,
        url,
        author,
        content,
        content_text,
        published,
    }
}

/// The `alternate` link if there is one, else the first link.
fn preferred_link(links: &[Link]) -> Option<String> {
    links
        .iter()
        .find(|l| l.rel.as_deref() == Some("alternate"))
        .or_else(|| links.first())
        .map(|l| l.href.trim().to_string())
}

/// Entry GUID. Left empty when the entry has a link, since ingestion then
/// keys the article by URL. Entries with neither get a content hash.
fn entry_guid(id: &str, url: &str, title: &str, published: Option<i64>) -> String {
    let id = id.trim();
    if !id.is_empty() {
        return id.to_string();
    }
    if !url.is_empty() {
        return String::new();
    }

    let input = format!(
        "{}|{}",
        title,
        published.map(|p| p.to_string()).unwrap_or_default()
    );
    format!("{:x}", Sha256::digest(input.as_bytes()))
}

/// Strip markup, collapsing whitespace to single spaces.
pub fn plain_text(html: &str) -> String {
    if html.trim().is_empty() {
        return String::new();
    }
    let text = html2text::from_read(html.as_bytes(), 80).unwrap_or_else(|e| {
        tracing::debug!(error = %e, "HTML conversion failed, using raw content");
        html.to_string()
    });
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
