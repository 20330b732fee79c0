use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::io::Cursor;
use std::path::Path;
use thiserror::Error;

use crate::storage::{Feed, NewFeed};
use crate::util::{validate_feed_url, write_atomic};

/// Maximum nesting depth for outline elements.
const MAX_OPML_DEPTH: usize = 50;

#[derive(Debug, Error)]
pub enum OpmlError {
    #[error("OPML nesting depth exceeds maximum of {0} levels")]
    MaxDepthExceeded(usize),

    #[error("XML parse error: {0}")]
    XmlParse(String),

    #[error("XML write error: {0}")]
    XmlWrite(String),

    #[error("no feeds found in OPML")]
    NoFeeds,

    #[error("OPML file error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<quick_xml::Error> for OpmlError {
    fn from(err: quick_xml::Error) -> Self {
        OpmlError::XmlParse(err.to_string())
    }
}

/// Read subscriptions from an OPML file.
pub async fn read_opml(path: &Path) -> Result<Vec<NewFeed>, OpmlError> {
    let content = tokio::fs::read_to_string(path).await?;
    parse_opml(&content)
}

/// Extract every `<outline>` with an `xmlUrl`, at any depth.
///
/// Folder outlines are walked but not returned. Outlines whose feed URL is
/// not http(s) are skipped with a warning. A document with no feeds at all
/// is an error.
///
/// Entity declarations in a DOCTYPE are never expanded: quick-xml only
/// resolves the five predefined XML entities, so `&xxe;`-style references
/// fail to decode instead of pulling in external content.
pub fn parse_opml(content: &str) -> Result<Vec<NewFeed>, OpmlError> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    let mut feeds = Vec::new();
    let mut depth: usize = 0;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) if e.name().as_ref() == b"outline" => {
                depth += 1;
                if depth > MAX_OPML_DEPTH {
                    return Err(OpmlError::MaxDepthExceeded(MAX_OPML_DEPTH));
                }
                if let Some(feed) = outline_feed(&e, &reader)? {
                    feeds.push(feed);
                }
            }
            Ok(Event::Empty(e)) if e.name().as_ref() == b"outline" => {
                if let Some(feed) = outline_feed(&e, &reader)? {
                    feeds.push(feed);
                }
            }
            Ok(Event::End(e)) if e.name().as_ref() == b"outline" => {
                depth = depth.saturating_sub(1);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(OpmlError::XmlParse(e.to_string())),
            _ => {}
        }
    }

    if feeds.is_empty() {
        return Err(OpmlError::NoFeeds);
    }
    Ok(feeds)
}

fn outline_feed(e: &BytesStart<'_>, reader: &Reader<&[u8]>) -> Result<Option<NewFeed>, OpmlError> {
    let mut xml_url = None;
    let mut html_url = String::new();
    let mut title = None;
    let mut text = None;

    for attr in e.attributes() {
        let attr = match attr {
            Ok(attr) => attr,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping malformed OPML attribute");
                continue;
            }
        };
        let value = attr.decode_and_unescape_value(reader.decoder())?;
        let value = value.trim();
        match attr.key.as_ref() {
            b"xmlUrl" => xml_url = Some(value.to_string()),
            b"htmlUrl" => html_url = value.to_string(),
            b"title" if !value.is_empty() => title = Some(value.to_string()),
            b"text" if !value.is_empty() => text = Some(value.to_string()),
            _ => {}
        }
    }

    let Some(url) = xml_url.filter(|u| !u.is_empty()) else {
        return Ok(None);
    };
    if let Err(e) = validate_feed_url(&url) {
        tracing::warn!(url = %url, error = %e, "Skipping invalid feed URL");
        return Ok(None);
    }

    Ok(Some(NewFeed {
        title: title.or(text).unwrap_or_else(|| "Untitled".to_string()),
        url,
        site_url: html_url,
        description: String::new(),
    }))
}

/// Render feeds as an OPML 2.0 document.
pub fn export_opml(feeds: &[Feed]) -> Result<String, OpmlError> {
    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);

    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .map_err(write_err)?;

    let mut opml = BytesStart::new("opml");
    opml.push_attribute(("version", "2.0"));
    writer.write_event(Event::Start(opml)).map_err(write_err)?;

    writer
        .write_event(Event::Start(BytesStart::new("head")))
        .map_err(write_err)?;
    writer
        .write_event(Event::Start(BytesStart::new("title")))
        .map_err(write_err)?;
    writer
        .write_event(Event::Text(BytesText::new("greeder subscriptions")))
        .map_err(write_err)?;
    writer
        .write_event(Event::End(BytesEnd::new("title")))
        .map_err(write_err)?;
    writer
        .write_event(Event::End(BytesEnd::new("head")))
        .map_err(write_err)?;

    writer
        .write_event(Event::Start(BytesStart::new("body")))
        .map_err(write_err)?;
    for feed in feeds {
        let mut outline = BytesStart::new("outline");
        outline.push_attribute(("type", "rss"));
        outline.push_attribute(("text", feed.title.as_str()));
        outline.push_attribute(("title", feed.title.as_str()));
        outline.push_attribute(("xmlUrl", feed.url.as_str()));
        if !feed.site_url.is_empty() {
            outline.push_attribute(("htmlUrl", feed.site_url.as_str()));
        }
        writer.write_event(Event::Empty(outline)).map_err(write_err)?;
    }
    writer
        .write_event(Event::End(BytesEnd::new("body")))
        .map_err(write_err)?;
    writer
        .write_event(Event::End(BytesEnd::new("opml")))
        .map_err(write_err)?;

    String::from_utf8(writer.into_inner().into_inner()).map_err(write_err)
}

fn write_err<E: std::fmt::Display>(err: E) -> OpmlError {
    OpmlError::XmlWrite(err.to_string())
}

/// Write feeds to an OPML file atomically.
pub fn export_opml_file(feeds: &[Feed], path: &Path) -> Result<(), OpmlError> {
    let content = export_opml(feeds)?;
    write_atomic(path, content.as_bytes())?;
    Ok(())
}
