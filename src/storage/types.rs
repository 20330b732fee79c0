use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Errors returned by store operations.
///
/// Write paths always surface one of these; nothing is applied when an
/// operation returns `Err`. Storage failures carry the underlying `sqlx`
/// error unchanged.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Another process holds the database lock
    #[error("Another instance of greeder appears to be running. Please close it and try again.")]
    InstanceLocked,

    /// Rejected before touching storage (empty path, non-positive window, ...)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The referenced row does not exist
    #[error("{0} not found")]
    NotFound(&'static str),

    /// A feed with this URL is already subscribed
    #[error("Feed already exists: {0}")]
    AlreadyExists(String),

    /// Snapshot written by an unknown format version
    #[error("Unsupported export format version {0}")]
    UnsupportedVersion(u32),

    /// Schema creation failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    /// Map a connection-time sqlx error, detecting lock contention.
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        if is_lock_error(&err.to_string()) {
            return StoreError::InstanceLocked;
        }
        StoreError::Database(err)
    }
}

// SQLITE_BUSY (5), SQLITE_LOCKED (6), SQLITE_CANTOPEN (14)
pub(crate) fn is_lock_error(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("database is locked")
        || message.contains("database table is locked")
        || message.contains("sqlite_busy")
        || message.contains("sqlite_locked")
        || message.contains("unable to open database file")
}

// ============================================================================
// Timestamp Helpers
// ============================================================================

/// Timestamps are stored as epoch seconds with 0 meaning "none".
pub(crate) fn to_epoch(ts: Option<i64>) -> i64 {
    ts.unwrap_or(0)
}

pub(crate) fn from_epoch(value: Option<i64>) -> Option<i64> {
    value.filter(|ts| *ts != 0)
}

/// Read paths degrade to an empty result instead of failing the caller.
pub(crate) fn or_default<T: Default>(what: &str, result: Result<T, sqlx::Error>) -> T {
    result.unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Failed to load {what}");
        T::default()
    })
}

// ============================================================================
// Data Structures
// ============================================================================

/// A subscribed feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feed {
    pub id: i64,
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub site_url: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub last_fetched: Option<i64>,
    #[serde(default)]
    pub created_at: Option<i64>,
    #[serde(default)]
    pub updated_at: Option<i64>,
}

/// Fields supplied when subscribing to a feed.
#[derive(Debug, Clone, Default)]
pub struct NewFeed {
    pub title: String,
    pub url: String,
    pub site_url: String,
    pub description: String,
}

/// A canonical article record.
///
/// `feed_id` is the feed the article was first seen through; every feed it
/// was observed via is listed in `article_sources`. `base_url` is the
/// derived identity (see [`crate::util::base_identity`]).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Article {
    pub id: i64,
    pub feed_id: i64,
    pub guid: String,
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub content_text: String,
    #[serde(default)]
    pub published_at: Option<i64>,
    #[serde(default)]
    pub fetched_at: Option<i64>,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default)]
    pub is_starred: bool,
    #[serde(default)]
    pub feed_title: String,
}

/// An article as produced by the feed parser, before identity resolution.
#[derive(Debug, Clone, Default)]
pub struct IncomingArticle {
    pub guid: String,
    pub title: String,
    pub url: String,
    pub author: String,
    pub content: String,
    pub content_text: String,
    pub published: Option<i64>,
}

/// A feed an article was observed through, for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArticleSource {
    pub feed_id: i64,
    pub feed_title: String,
    pub published_at: Option<i64>,
}

/// AI summary attached to an article.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub id: i64,
    pub article_id: i64,
    pub content: String,
    pub model: String,
    #[serde(default)]
    pub generated_at: Option<i64>,
}

/// Bookmark state for an article saved to the external bookmark service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedBookmark {
    pub article_id: i64,
    pub bookmark_id: i64,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub saved_at: Option<i64>,
}

/// Snapshot of a deleted article, kept so the deletion can be undone.
///
/// `article.id` is always 0; a restore assigns a fresh id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tombstone {
    #[serde(default)]
    pub id: i64,
    pub feed_id: i64,
    pub guid: String,
    #[serde(default)]
    pub deleted_at: Option<i64>,
    pub article: Article,
}

/// Outcome of a reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Articles examined
    pub scanned: usize,
    /// Stored identities that were rewritten
    pub corrected: usize,
    /// Duplicate rows folded into an earlier representative
    pub merged: usize,
}

/// Row counts across the store, used by `--stats` and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableCounts {
    pub feeds: i64,
    pub articles: i64,
    pub sources: i64,
    pub summaries: i64,
    pub saved: i64,
    pub deleted: i64,
}

// ============================================================================
// Row Types
// ============================================================================

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct FeedDbRow {
    pub id: i64,
    pub title: Option<String>,
    pub url: String,
    pub site_url: Option<String>,
    pub description: Option<String>,
    pub last_fetched: Option<i64>,
    pub created_at: Option<i64>,
    pub updated_at: Option<i64>,
}

impl FeedDbRow {
    pub(crate) fn into_feed(self) -> Feed {
        Feed {
            id: self.id,
            title: self.title.unwrap_or_default(),
            url: self.url,
            site_url: self.site_url.unwrap_or_default(),
            description: self.description.unwrap_or_default(),
            last_fetched: from_epoch(self.last_fetched),
            created_at: from_epoch(self.created_at),
            updated_at: from_epoch(self.updated_at),
        }
    }
}

/// Column layout shared by `articles` and `deleted` reads.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ArticleDbRow {
    pub id: i64,
    pub feed_id: i64,
    pub guid: Option<String>,
    pub title: Option<String>,
    pub url: Option<String>,
    pub base_url: Option<String>,
    pub author: Option<String>,
    pub content: Option<String>,
    pub content_text: Option<String>,
    pub published_at: Option<i64>,
    pub fetched_at: Option<i64>,
    pub is_read: bool,
    pub is_starred: bool,
    pub feed_title: Option<String>,
}

impl ArticleDbRow {
    pub(crate) fn into_article(self) -> Article {
        Article {
            id: self.id,
            feed_id: self.feed_id,
            guid: self.guid.unwrap_or_default(),
            title: self.title.unwrap_or_default(),
            url: self.url.unwrap_or_default(),
            base_url: self.base_url.unwrap_or_default(),
            author: self.author.unwrap_or_default(),
            content: self.content.unwrap_or_default(),
            content_text: self.content_text.unwrap_or_default(),
            published_at: from_epoch(self.published_at),
            fetched_at: from_epoch(self.fetched_at),
            is_read: self.is_read,
            is_starred: self.is_starred,
            feed_title: self.feed_title.unwrap_or_default(),
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct TombstoneDbRow {
    #[sqlx(flatten)]
    pub article: ArticleDbRow,
    pub deleted_at: Option<i64>,
}

impl TombstoneDbRow {
    pub(crate) fn into_tombstone(self) -> Tombstone {
        let id = self.article.id;
        let mut article = self.article.into_article();
        article.id = 0;
        Tombstone {
            id,
            feed_id: article.feed_id,
            guid: article.guid.clone(),
            deleted_at: from_epoch(self.deleted_at),
            article,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct SummaryDbRow {
    pub id: i64,
    pub article_id: i64,
    pub content: Option<String>,
    pub model: Option<String>,
    pub generated_at: Option<i64>,
}

impl SummaryDbRow {
    pub(crate) fn into_summary(self) -> Summary {
        Summary {
            id: self.id,
            article_id: self.article_id,
            content: self.content.unwrap_or_default(),
            model: self.model.unwrap_or_default(),
            generated_at: from_epoch(self.generated_at),
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct SavedDbRow {
    pub article_id: i64,
    pub bookmark_id: i64,
    pub tags: Option<String>,
    pub saved_at: Option<i64>,
}

impl SavedDbRow {
    /// Malformed tag JSON degrades to an empty tag set.
    pub(crate) fn into_saved(self) -> SavedBookmark {
        let tags = match self.tags.as_deref().map(str::trim) {
            Some(raw) if !raw.is_empty() => serde_json::from_str(raw).unwrap_or_else(|e| {
                tracing::warn!(article_id = self.article_id, error = %e, "Ignoring malformed bookmark tags");
                Vec::new()
            }),
            _ => Vec::new(),
        };
        SavedBookmark {
            article_id: self.article_id,
            bookmark_id: self.bookmark_id,
            tags,
            saved_at: from_epoch(self.saved_at),
        }
    }
}
