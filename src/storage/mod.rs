//! Relational store for feeds, canonical articles and everything attached
//! to them.
//!
//! Every mutating operation runs in exactly one SQLite transaction and
//! either applies completely or not at all. Listing operations degrade to
//! an empty result on storage failure so display refreshes never fail.
//!
//! - [`Database::ingest`] folds parsed articles into canonical records
//! - [`Database::reconcile`] repairs identities and merges duplicates
//! - [`Database::delete_article`] / [`Database::undo_last_delete`] /
//!   [`Database::restore_within_days`] manage tombstones
//! - [`Database::export_state`] / [`Database::import_state`] move the whole
//!   store through a JSON snapshot

mod articles;
mod clock;
mod feeds;
mod ingest;
mod reconcile;
mod schema;
mod state;
mod tombstones;
mod types;

pub use clock::{Clock, FixedClock, SystemClock};
pub use schema::Database;
pub use state::{StateSnapshot, STATE_VERSION};
pub use types::{
    Article, ArticleSource, Feed, IncomingArticle, NewFeed, ReconcileReport, SavedBookmark,
    StoreError, Summary, TableCounts, Tombstone,
};
