use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::articles::insert_article;
use super::reconcile::reconcile_in;
use super::schema::Database;
use super::tombstones::insert_tombstone;
use super::types::{to_epoch, Article, Feed, SavedBookmark, StoreError, Summary, Tombstone};
use crate::util::{resolve_identity, write_atomic};

/// Snapshot format written by [`Database::export_state`].
pub const STATE_VERSION: u32 = 1;

/// Just enough of a snapshot file to know which format it is in.
#[derive(Deserialize)]
struct SnapshotHeader {
    version: u32,
}

/// Full contents of the store, as written to and read from disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub version: u32,
    pub exported_at: DateTime<Utc>,
    #[serde(default)]
    pub feeds: Vec<Feed>,
    #[serde(default)]
    pub articles: Vec<Article>,
    #[serde(default)]
    pub summaries: Vec<Summary>,
    #[serde(default)]
    pub saved: Vec<SavedBookmark>,
    #[serde(default)]
    pub deleted: Vec<Tombstone>,
}

impl Database {
    // ========================================================================
    // State Export / Import
    // ========================================================================

    /// Capture every table into a snapshot.
    pub async fn snapshot(&self) -> Result<StateSnapshot, StoreError> {
        Ok(StateSnapshot {
            version: STATE_VERSION,
            exported_at: DateTime::from_timestamp(self.now(), 0).unwrap_or_default(),
            feeds: self.fetch_feeds().await?,
            articles: self.fetch_articles().await?,
            summaries: self.fetch_summaries().await?,
            saved: self.fetch_saved().await?,
            deleted: self.fetch_tombstones().await?,
        })
    }

    /// Write the whole store to `path` as pretty-printed JSON.
    pub async fn export_state(&self, path: &Path) -> Result<StateSnapshot, StoreError> {
        if path.as_os_str().is_empty() {
            return Err(StoreError::InvalidInput("missing export path".to_string()));
        }
        let snapshot = self.snapshot().await?;
        let payload = serde_json::to_vec_pretty(&snapshot)?;

        let target = path.to_path_buf();
        tokio::task::spawn_blocking(move || write_atomic(&target, &payload))
            .await
            .map_err(std::io::Error::other)??;

        tracing::info!(
            path = %path.display(),
            feeds = snapshot.feeds.len(),
            articles = snapshot.articles.len(),
            "State exported"
        );
        Ok(snapshot)
    }

    /// Replace the whole store with the snapshot at `path`.
    ///
    /// The file is read and validated before anything is touched. Existing
    /// rows are then replaced and the result reconciled, all in one
    /// transaction, so a failed import leaves the store as it was.
    pub async fn import_state(&self, path: &Path) -> Result<StateSnapshot, StoreError> {
        if path.as_os_str().is_empty() {
            return Err(StoreError::InvalidInput("missing import path".to_string()));
        }
        let raw = tokio::fs::read(path).await?;
        let header: SnapshotHeader = serde_json::from_slice(&raw)?;
        if header.version != STATE_VERSION {
            return Err(StoreError::UnsupportedVersion(header.version));
        }
        let snapshot: StateSnapshot = serde_json::from_slice(&raw)?;
        self.restore_snapshot(&snapshot).await?;

        tracing::info!(
            path = %path.display(),
            feeds = snapshot.feeds.len(),
            articles = snapshot.articles.len(),
            "State imported"
        );
        Ok(snapshot)
    }

    /// Replace the whole store with `snapshot`.
    pub async fn restore_snapshot(&self, snapshot: &StateSnapshot) -> Result<(), StoreError> {
        if snapshot.version != STATE_VERSION {
            return Err(StoreError::UnsupportedVersion(snapshot.version));
        }

        let mut tx = self.pool.begin().await?;

        for table in ["summaries", "saved", "article_sources", "deleted", "articles", "feeds"] {
            sqlx::query(&format!("DELETE FROM {table}"))
                .execute(&mut *tx)
                .await?;
        }

        for feed in &snapshot.feeds {
            sqlx::query(
                r#"
                INSERT INTO feeds (id, title, url, site_url, description, last_fetched, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(feed.id)
            .bind(&feed.title)
            .bind(&feed.url)
            .bind(&feed.site_url)
            .bind(&feed.description)
            .bind(to_epoch(feed.last_fetched))
            .bind(to_epoch(feed.created_at))
            .bind(to_epoch(feed.updated_at))
            .execute(&mut *tx)
            .await?;
        }

        // Article ids are kept so summaries and bookmarks still line up
        for article in &snapshot.articles {
            let mut article = article.clone();
            article.base_url = resolve_identity(&article.url, Some(&article.base_url));
            insert_article(&mut tx, &article).await?;
        }

        for summary in &snapshot.summaries {
            sqlx::query(
                "INSERT INTO summaries (id, article_id, content, model, generated_at) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(summary.id)
            .bind(summary.article_id)
            .bind(&summary.content)
            .bind(&summary.model)
            .bind(to_epoch(summary.generated_at))
            .execute(&mut *tx)
            .await?;
        }

        for saved in &snapshot.saved {
            sqlx::query(
                "INSERT INTO saved (article_id, bookmark_id, tags, saved_at) VALUES (?, ?, ?, ?)",
            )
            .bind(saved.article_id)
            .bind(saved.bookmark_id)
            .bind(serde_json::to_string(&saved.tags)?)
            .bind(to_epoch(saved.saved_at))
            .execute(&mut *tx)
            .await?;
        }

        for tombstone in &snapshot.deleted {
            let mut article = tombstone.article.clone();
            article.feed_id = tombstone.feed_id;
            article.guid = tombstone.guid.clone();
            article.base_url = resolve_identity(&article.url, Some(&article.base_url));
            insert_tombstone(&mut tx, &article, tombstone.deleted_at).await?;
        }

        let report = reconcile_in(&mut tx).await?;
        tx.commit().await?;

        tracing::debug!(
            corrected = report.corrected,
            merged = report.merged,
            "Imported state reconciled"
        );
        Ok(())
    }
}
