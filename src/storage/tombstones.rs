use sqlx::SqliteConnection;

use super::articles::{
    ensure_article_source, find_by_identity, insert_article, ARTICLE_COLUMNS, SECONDS_PER_DAY,
};
use super::schema::Database;
use super::types::{
    or_default, to_epoch, Article, ArticleDbRow, StoreError, Tombstone, TombstoneDbRow,
};
use crate::util::resolve_identity;

const TOMBSTONE_COLUMNS: &str = "id, feed_id, guid, title, url, base_url, author, content, \
     content_text, published_at, fetched_at, is_read, is_starred, feed_title, deleted_at";

/// Store `tombstone` as a brand-new article, returning it with its new id.
async fn revive(conn: &mut SqliteConnection, tombstone: &Tombstone) -> Result<Article, sqlx::Error> {
    let mut article = tombstone.article.clone();
    article.base_url = resolve_identity(&article.url, Some(&article.base_url));
    article.id = insert_article(conn, &article).await?;
    ensure_article_source(conn, article.id, article.feed_id, article.published_at).await?;
    Ok(article)
}

pub(crate) async fn insert_tombstone(
    conn: &mut SqliteConnection,
    article: &Article,
    deleted_at: Option<i64>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO deleted (feed_id, guid, title, url, base_url, author, content, content_text,
                             published_at, fetched_at, is_read, is_starred, feed_title, deleted_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(article.feed_id)
    .bind(&article.guid)
    .bind(&article.title)
    .bind(&article.url)
    .bind(&article.base_url)
    .bind(&article.author)
    .bind(&article.content)
    .bind(&article.content_text)
    .bind(to_epoch(article.published_at))
    .bind(to_epoch(article.fetched_at))
    .bind(article.is_read)
    .bind(article.is_starred)
    .bind(&article.feed_title)
    .bind(to_epoch(deleted_at))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

impl Database {
    // ========================================================================
    // Delete and Restore
    // ========================================================================

    /// Delete an article, keeping a tombstone so it can be restored.
    ///
    /// Its summary, bookmark and source links are removed with it. Returns
    /// the article as it was.
    pub async fn delete_article(&self, article_id: i64) -> Result<Article, StoreError> {
        let now = self.now();
        let mut tx = self.pool.begin().await?;

        let row: Option<ArticleDbRow> =
            sqlx::query_as(&format!("SELECT {ARTICLE_COLUMNS} FROM articles WHERE id = ?"))
                .bind(article_id)
                .fetch_optional(&mut *tx)
                .await?;
        let Some(article) = row.map(ArticleDbRow::into_article) else {
            return Err(StoreError::NotFound("article"));
        };

        for statement in [
            "DELETE FROM summaries WHERE article_id = ?",
            "DELETE FROM saved WHERE article_id = ?",
            "DELETE FROM article_sources WHERE article_id = ?",
            "DELETE FROM articles WHERE id = ?",
        ] {
            sqlx::query(statement)
                .bind(article_id)
                .execute(&mut *tx)
                .await?;
        }
        insert_tombstone(&mut tx, &article, Some(now)).await?;

        tx.commit().await?;
        tracing::info!(article_id, feed_id = article.feed_id, "Article deleted");
        Ok(article)
    }

    /// Restore the most recently deleted article as a new row.
    ///
    /// # Errors
    ///
    /// `StoreError::NotFound` when there is nothing to undo.
    pub async fn undo_last_delete(&self) -> Result<Article, StoreError> {
        let mut tx = self.pool.begin().await?;

        let row: Option<TombstoneDbRow> = sqlx::query_as(&format!(
            "SELECT {TOMBSTONE_COLUMNS} FROM deleted ORDER BY id DESC LIMIT 1"
        ))
        .fetch_optional(&mut *tx)
        .await?;
        let Some(tombstone) = row.map(TombstoneDbRow::into_tombstone) else {
            return Err(StoreError::NotFound("deleted article"));
        };

        let article = revive(&mut tx, &tombstone).await?;
        sqlx::query("DELETE FROM deleted WHERE id = ?")
            .bind(tombstone.id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        tracing::info!(article_id = article.id, "Deletion undone");
        Ok(article)
    }

    /// Restore every tombstone whose article was published within the last
    /// `days` days. Returns how many tombstones were consumed.
    ///
    /// A tombstone whose identity is live again is folded into that article:
    /// its feed becomes a source, unread wins and starred wins.
    /// Otherwise it is re-inserted as a new article. Tombstones without a
    /// publish time never match.
    ///
    /// # Errors
    ///
    /// `StoreError::InvalidInput` for a non-positive window and
    /// `StoreError::NotFound` when no tombstone falls inside it.
    pub async fn restore_within_days(&self, days: i64) -> Result<usize, StoreError> {
        if days <= 0 {
            return Err(StoreError::InvalidInput(format!(
                "restore window must be positive, got {days}"
            )));
        }
        let cutoff = self.now() - days * SECONDS_PER_DAY;
        let mut tx = self.pool.begin().await?;

        let (matching,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM deleted WHERE published_at > 0 AND published_at >= ?")
                .bind(cutoff)
                .fetch_one(&mut *tx)
                .await?;
        if matching == 0 {
            return Err(StoreError::NotFound("deleted article"));
        }

        let rows: Vec<TombstoneDbRow> = sqlx::query_as(&format!(
            "SELECT {TOMBSTONE_COLUMNS} FROM deleted WHERE published_at > 0 AND published_at >= ? ORDER BY id"
        ))
        .bind(cutoff)
        .fetch_all(&mut *tx)
        .await?;

        let (mut revived, mut folded) = (0usize, 0usize);
        for tombstone in rows.into_iter().map(TombstoneDbRow::into_tombstone) {
            let article = &tombstone.article;
            let identity = resolve_identity(&article.url, Some(&article.base_url));

            match find_by_identity(&mut tx, &identity).await? {
                Some((existing, is_read, is_starred)) => {
                    ensure_article_source(&mut tx, existing, tombstone.feed_id, article.published_at)
                        .await?;
                    sqlx::query("UPDATE articles SET is_read = ?, is_starred = ? WHERE id = ?")
                        .bind(is_read && article.is_read)
                        .bind(is_starred || article.is_starred)
                        .bind(existing)
                        .execute(&mut *tx)
                        .await?;
                    folded += 1;
                }
                None => {
                    let mut tombstone = tombstone.clone();
                    tombstone.article.base_url = identity;
                    revive(&mut tx, &tombstone).await?;
                    revived += 1;
                }
            }

            sqlx::query("DELETE FROM deleted WHERE id = ?")
                .bind(tombstone.id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        tracing::info!(days, revived, folded, "Deleted articles restored");
        Ok(revived + folded)
    }

    /// Drop tombstones deleted more than `days` days ago.
    pub async fn purge_tombstones_older_than(&self, days: i64) -> Result<usize, StoreError> {
        if days <= 0 {
            return Err(StoreError::InvalidInput(format!(
                "purge window must be positive, got {days}"
            )));
        }
        let cutoff = self.now() - days * SECONDS_PER_DAY;
        let purged = sqlx::query("DELETE FROM deleted WHERE deleted_at > 0 AND deleted_at < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?
            .rows_affected();
        tracing::info!(days, purged, "Old tombstones purged");
        Ok(purged as usize)
    }

    pub(crate) async fn fetch_tombstones(&self) -> Result<Vec<Tombstone>, sqlx::Error> {
        let rows: Vec<TombstoneDbRow> =
            sqlx::query_as(&format!("SELECT {TOMBSTONE_COLUMNS} FROM deleted ORDER BY id"))
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(TombstoneDbRow::into_tombstone).collect())
    }

    /// Tombstones oldest first. Empty on storage failure.
    pub async fn tombstones(&self) -> Vec<Tombstone> {
        or_default("deleted articles", self.fetch_tombstones().await)
    }
}
