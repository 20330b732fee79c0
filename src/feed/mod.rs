//! Feed I/O: everything that turns the outside world into store records.
//!
//! - [`parse_feed`] converts RSS/Atom bytes into [`IncomingArticle`](crate::storage::IncomingArticle)s
//! - [`refresh_all`] / [`refresh_one`] fetch over HTTP with retry and bounded
//!   concurrency, then hand each batch to [`Database::ingest`](crate::storage::Database::ingest)
//! - [`read_opml`] / [`export_opml_file`] move subscriptions in and out as OPML
//!
//! # Example
//!
//! ```ignore
//! use greeder::feed::{read_opml, refresh_all, FetchOptions};
//!
//! let subscriptions = read_opml(Path::new("subs.opml")).await?;
//! db.import_feeds(&subscriptions).await?;
//!
//! let results = refresh_all(&db, &client, db.feeds().await, &FetchOptions::default()).await;
//! ```

mod fetcher;
mod opml;
mod parser;

pub use fetcher::{
    build_client, fetch_feed, refresh_all, refresh_one, FetchError, FetchOptions, FetchResult,
};
pub use opml::{export_opml, export_opml_file, parse_opml, read_opml, OpmlError};
pub use parser::{parse_feed, plain_text, ParsedFeed};
