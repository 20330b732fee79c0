use sqlx::SqliteConnection;

use super::schema::Database;
use super::types::{
    or_default, to_epoch, Article, ArticleDbRow, ArticleSource, SavedBookmark, SavedDbRow,
    StoreError, Summary, SummaryDbRow, TableCounts,
};
use crate::util::resolve_identity;

pub(crate) const ARTICLE_COLUMNS: &str = "id, feed_id, guid, title, url, base_url, author, \
     content, content_text, published_at, fetched_at, is_read, is_starred, feed_title";

pub(crate) const SECONDS_PER_DAY: i64 = 86_400;

// ============================================================================
// Transaction Helpers
// ============================================================================

/// The live article holding `identity`, with its read and starred flags.
pub(crate) async fn find_by_identity(
    conn: &mut SqliteConnection,
    identity: &str,
) -> Result<Option<(i64, bool, bool)>, sqlx::Error> {
    sqlx::query_as("SELECT id, is_read, is_starred FROM articles WHERE base_url = ? ORDER BY id LIMIT 1")
        .bind(identity)
        .fetch_optional(&mut *conn)
        .await
}

/// Record that `article_id` was observed through `feed_id`.
///
/// A pairing is created once. A later observation only fills in a publish
/// time the pairing did not have. Nothing is written when the feed no longer
/// exists.
pub(crate) async fn ensure_article_source(
    conn: &mut SqliteConnection,
    article_id: i64,
    feed_id: i64,
    published: Option<i64>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO article_sources (article_id, feed_id, published_at)
        SELECT ?1, ?2, ?3 WHERE EXISTS (SELECT 1 FROM feeds WHERE id = ?2)
        ON CONFLICT(article_id, feed_id) DO UPDATE SET published_at = excluded.published_at
        WHERE (article_sources.published_at IS NULL OR article_sources.published_at = 0)
          AND excluded.published_at > 0
        "#,
    )
    .bind(article_id)
    .bind(feed_id)
    .bind(to_epoch(published))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Insert `article` as a new row and return its id.
///
/// An id of 0 lets SQLite assign one.
pub(crate) async fn insert_article(
    conn: &mut SqliteConnection,
    article: &Article,
) -> Result<i64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT INTO articles (id, feed_id, guid, title, url, base_url, author, content, content_text,
                              published_at, fetched_at, is_read, is_starred, feed_title)
        VALUES (NULLIF(?, 0), ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(article.id)
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
    .execute(&mut *conn)
    .await?;
    Ok(result.last_insert_rowid())
}

/// Drop summaries, bookmarks and sources whose article is gone.
pub(crate) async fn cleanup_orphans(conn: &mut SqliteConnection) -> Result<u64, sqlx::Error> {
    let mut removed = 0;
    for statement in [
        "DELETE FROM summaries WHERE article_id NOT IN (SELECT id FROM articles)",
        "DELETE FROM saved WHERE article_id NOT IN (SELECT id FROM articles)",
        "DELETE FROM article_sources WHERE article_id NOT IN (SELECT id FROM articles)",
    ] {
        removed += sqlx::query(statement).execute(&mut *conn).await?.rows_affected();
    }
    Ok(removed)
}

impl Database {
    // ========================================================================
    // Article Queries
    // ========================================================================

    pub async fn article_by_id(&self, article_id: i64) -> Result<Option<Article>, StoreError> {
        let row: Option<ArticleDbRow> =
            sqlx::query_as(&format!("SELECT {ARTICLE_COLUMNS} FROM articles WHERE id = ?"))
                .bind(article_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(ArticleDbRow::into_article))
    }

    pub(crate) async fn fetch_articles(&self) -> Result<Vec<Article>, sqlx::Error> {
        let rows: Vec<ArticleDbRow> =
            sqlx::query_as(&format!("SELECT {ARTICLE_COLUMNS} FROM articles ORDER BY id"))
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(ArticleDbRow::into_article).collect())
    }

    /// All articles in insertion order. Empty on storage failure.
    pub async fn articles(&self) -> Vec<Article> {
        or_default("articles", self.fetch_articles().await)
    }

    /// All articles, newest publication first. Empty on storage failure.
    pub async fn sorted_articles(&self) -> Vec<Article> {
        let result: Result<Vec<ArticleDbRow>, _> = sqlx::query_as(&format!(
            "SELECT {ARTICLE_COLUMNS} FROM articles ORDER BY published_at DESC, id DESC"
        ))
        .fetch_all(&self.pool)
        .await;
        or_default("sorted articles", result)
            .into_iter()
            .map(ArticleDbRow::into_article)
            .collect()
    }

    /// Articles seen through `feed_id`, whether or not the feed owns them.
    pub async fn articles_for_feed(&self, feed_id: i64) -> Vec<Article> {
        let result: Result<Vec<ArticleDbRow>, _> = sqlx::query_as(&format!(
            r#"
            SELECT {ARTICLE_COLUMNS} FROM articles
            WHERE feed_id = ?1
               OR id IN (SELECT article_id FROM article_sources WHERE feed_id = ?1)
            ORDER BY published_at DESC, id DESC
            "#
        ))
        .bind(feed_id)
        .fetch_all(&self.pool)
        .await;
        or_default("feed articles", result)
            .into_iter()
            .map(ArticleDbRow::into_article)
            .collect()
    }

    /// Feeds an article was observed through, ordered by feed title.
    pub async fn article_sources(&self, article_id: i64) -> Vec<ArticleSource> {
        let result: Result<Vec<(i64, Option<String>, Option<i64>)>, _> = sqlx::query_as(
            r#"
            SELECT s.feed_id, f.title, s.published_at
            FROM article_sources s
            LEFT JOIN feeds f ON f.id = s.feed_id
            WHERE s.article_id = ?
            ORDER BY f.title COLLATE NOCASE, s.feed_id
            "#,
        )
        .bind(article_id)
        .fetch_all(&self.pool)
        .await;

        or_default("article sources", result)
            .into_iter()
            .map(|(feed_id, title, published)| ArticleSource {
                feed_id,
                feed_title: title.unwrap_or_default(),
                published_at: super::types::from_epoch(published),
            })
            .collect()
    }

    // ========================================================================
    // Article Mutations
    // ========================================================================

    /// Overwrite an article's fields. The identity is recomputed from `url`.
    pub async fn update_article(&self, article: &Article) -> Result<(), StoreError> {
        let identity = resolve_identity(&article.url, Some(&article.base_url));
        let result = sqlx::query(
            r#"
            UPDATE articles
            SET feed_id = ?, guid = ?, title = ?, url = ?, base_url = ?, author = ?,
                content = ?, content_text = ?, published_at = ?, fetched_at = ?,
                is_read = ?, is_starred = ?, feed_title = ?
            WHERE id = ?
            "#,
        )
        .bind(article.feed_id)
        .bind(&article.guid)
        .bind(&article.title)
        .bind(&article.url)
        .bind(&identity)
        .bind(&article.author)
        .bind(&article.content)
        .bind(&article.content_text)
        .bind(to_epoch(article.published_at))
        .bind(to_epoch(article.fetched_at))
        .bind(article.is_read)
        .bind(article.is_starred)
        .bind(&article.feed_title)
        .bind(article.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("article"));
        }
        Ok(())
    }

    pub async fn set_read(&self, article_id: i64, read: bool) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE articles SET is_read = ? WHERE id = ?")
            .bind(read)
            .bind(article_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("article"));
        }
        Ok(())
    }

    /// Flip the starred flag, returning the new value.
    pub async fn toggle_starred(&self, article_id: i64) -> Result<bool, StoreError> {
        let row: Option<(bool,)> = sqlx::query_as(
            "UPDATE articles SET is_starred = NOT is_starred WHERE id = ? RETURNING is_starred",
        )
        .bind(article_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|(starred,)| starred)
            .ok_or(StoreError::NotFound("article"))
    }

    /// Delete unstarred articles fetched more than `days` days ago, along
    /// with their summaries, bookmarks and sources. Articles with no fetch
    /// time are kept.
    pub async fn purge_articles_older_than(&self, days: i64) -> Result<usize, StoreError> {
        if days <= 0 {
            return Err(StoreError::InvalidInput(format!(
                "purge window must be positive, got {days}"
            )));
        }
        let cutoff = self.now() - days * SECONDS_PER_DAY;
        let mut tx = self.pool.begin().await?;

        let purged = sqlx::query(
            "DELETE FROM articles WHERE is_starred = 0 AND fetched_at > 0 AND fetched_at < ?",
        )
        .bind(cutoff)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        let orphans = cleanup_orphans(&mut tx).await?;

        tx.commit().await?;
        tracing::info!(days, purged, orphans, "Old articles purged");
        Ok(purged as usize)
    }

    // ========================================================================
    // Summaries and Bookmarks
    // ========================================================================

    pub async fn find_summary(&self, article_id: i64) -> Option<Summary> {
        let result: Result<Option<SummaryDbRow>, _> = sqlx::query_as(
            "SELECT id, article_id, content, model, generated_at FROM summaries WHERE article_id = ?",
        )
        .bind(article_id)
        .fetch_optional(&self.pool)
        .await;
        or_default("summary", result).map(SummaryDbRow::into_summary)
    }

    /// Store or replace the summary for an article.
    pub async fn upsert_summary(
        &self,
        article_id: i64,
        content: &str,
        model: &str,
    ) -> Result<Summary, StoreError> {
        let row: SummaryDbRow = sqlx::query_as(
            r#"
            INSERT INTO summaries (article_id, content, model, generated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(article_id) DO UPDATE SET
                content = excluded.content,
                model = excluded.model,
                generated_at = excluded.generated_at
            RETURNING id, article_id, content, model, generated_at
            "#,
        )
        .bind(article_id)
        .bind(content)
        .bind(model)
        .bind(self.now())
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into_summary())
    }

    pub(crate) async fn fetch_summaries(&self) -> Result<Vec<Summary>, sqlx::Error> {
        let rows: Vec<SummaryDbRow> = sqlx::query_as(
            "SELECT id, article_id, content, model, generated_at FROM summaries ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(SummaryDbRow::into_summary).collect())
    }

    pub async fn summaries(&self) -> Vec<Summary> {
        or_default("summaries", self.fetch_summaries().await)
    }

    /// Record that an article was saved to the bookmark service.
    pub async fn save_bookmark(
        &self,
        article_id: i64,
        bookmark_id: i64,
        tags: &[String],
    ) -> Result<SavedBookmark, StoreError> {
        let now = self.now();
        let tags_json = serde_json::to_string(tags)?;
        sqlx::query(
            r#"
            INSERT INTO saved (article_id, bookmark_id, tags, saved_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(article_id) DO UPDATE SET
                bookmark_id = excluded.bookmark_id,
                tags = excluded.tags,
                saved_at = excluded.saved_at
            "#,
        )
        .bind(article_id)
        .bind(bookmark_id)
        .bind(&tags_json)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(SavedBookmark {
            article_id,
            bookmark_id,
            tags: tags.to_vec(),
            saved_at: Some(now),
        })
    }

    pub(crate) async fn fetch_saved(&self) -> Result<Vec<SavedBookmark>, sqlx::Error> {
        let rows: Vec<SavedDbRow> = sqlx::query_as(
            "SELECT article_id, bookmark_id, tags, saved_at FROM saved ORDER BY article_id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(SavedDbRow::into_saved).collect())
    }

    pub async fn saved(&self) -> Vec<SavedBookmark> {
        or_default("bookmarks", self.fetch_saved().await)
    }

    /// Number of bookmarked articles. Zero on storage failure.
    pub async fn saved_count(&self) -> i64 {
        let result: Result<(i64,), _> = sqlx::query_as("SELECT COUNT(*) FROM saved")
            .fetch_one(&self.pool)
            .await;
        or_default("bookmark count", result.map(|(count,)| count))
    }

    /// Row counts for every table.
    pub async fn counts(&self) -> Result<TableCounts, StoreError> {
        let row: (i64, i64, i64, i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                (SELECT COUNT(*) FROM feeds),
                (SELECT COUNT(*) FROM articles),
                (SELECT COUNT(*) FROM article_sources),
                (SELECT COUNT(*) FROM summaries),
                (SELECT COUNT(*) FROM saved),
                (SELECT COUNT(*) FROM deleted)
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(TableCounts {
            feeds: row.0,
            articles: row.1,
            sources: row.2,
            summaries: row.3,
            saved: row.4,
            deleted: row.5,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{FixedClock, IncomingArticle, NewFeed};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    const NOW: i64 = 1_700_000_000;

    async fn test_db() -> (Database, Arc<FixedClock>) {
        let clock = Arc::new(FixedClock::new(NOW));
        let db = Database::open_with_clock(":memory:", clock.clone())
            .await
            .unwrap();
        (db, clock)
    }

    async fn test_feed(db: &Database, url: &str, title: &str) -> i64 {
        db.insert_feed(&NewFeed {
            title: title.to_string(),
            url: url.to_string(),
            ..Default::default()
        })
        .await
        .unwrap()
        .id
    }

    fn test_article(guid: &str, url: &str, published: Option<i64>) -> IncomingArticle {
        IncomingArticle {
            guid: guid.to_string(),
            title: format!("Title {guid}"),
            url: url.to_string(),
            published,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_sorted_articles_newest_first() {
        let (db, _) = test_db().await;
        let feed = test_feed(&db, "https://a.test/feed", "A").await;
        db.ingest(
            feed,
            &[
                test_article("old", "https://x.test/old", Some(NOW - 500)),
                test_article("new", "https://x.test/new", Some(NOW - 10)),
                test_article("mid", "https://x.test/mid", Some(NOW - 100)),
            ],
        )
        .await
        .unwrap();

        let guids: Vec<String> = db.sorted_articles().await.into_iter().map(|a| a.guid).collect();
        assert_eq!(guids, vec!["new", "mid", "old"]);
    }

    #[tokio::test]
    async fn test_update_article_recomputes_identity() {
        let (db, _) = test_db().await;
        let feed = test_feed(&db, "https://a.test/feed", "A").await;
        let mut article = db
            .ingest(feed, &[test_article("1", "https://x.test/one", None)])
            .await
            .unwrap()
            .remove(0);

        article.url = "https://x.test/moved?utm=1".to_string();
        article.base_url = "stale".to_string();
        article.title = "Edited".to_string();
        db.update_article(&article).await.unwrap();

        let stored = db.article_by_id(article.id).await.unwrap().unwrap();
        assert_eq!(stored.base_url, "https://x.test/moved");
        assert_eq!(stored.title, "Edited");

        article.id = 999;
        assert!(matches!(
            db.update_article(&article).await,
            Err(StoreError::NotFound("article"))
        ));
    }

    #[tokio::test]
    async fn test_read_and_star_flags() {
        let (db, _) = test_db().await;
        let feed = test_feed(&db, "https://a.test/feed", "A").await;
        let id = db
            .ingest(feed, &[test_article("1", "https://x.test/one", None)])
            .await
            .unwrap()[0]
            .id;

        db.set_read(id, true).await.unwrap();
        assert!(db.toggle_starred(id).await.unwrap());
        assert!(!db.toggle_starred(id).await.unwrap());
        assert!(db.toggle_starred(id).await.unwrap());

        let stored = db.article_by_id(id).await.unwrap().unwrap();
        assert!(stored.is_read);
        assert!(stored.is_starred);

        assert!(matches!(db.set_read(404, true).await, Err(StoreError::NotFound(_))));
        assert!(matches!(db.toggle_starred(404).await, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_summary_upsert_replaces() {
        let (db, clock) = test_db().await;
        let feed = test_feed(&db, "https://a.test/feed", "A").await;
        let id = db
            .ingest(feed, &[test_article("1", "https://x.test/one", None)])
            .await
            .unwrap()[0]
            .id;

        assert!(db.find_summary(id).await.is_none());
        let first = db.upsert_summary(id, "short", "model-a").await.unwrap();
        clock.advance(60);
        let second = db.upsert_summary(id, "longer", "model-b").await.unwrap();

        assert_eq!(first.id, second.id);
        let stored = db.find_summary(id).await.unwrap();
        assert_eq!(stored.content, "longer");
        assert_eq!(stored.model, "model-b");
        assert_eq!(stored.generated_at, Some(NOW + 60));
        assert_eq!(db.summaries().await.len(), 1);
    }

    #[tokio::test]
    async fn test_bookmarks() {
        let (db, _) = test_db().await;
        let feed = test_feed(&db, "https://a.test/feed", "A").await;
        let ids: Vec<i64> = db
            .ingest(
                feed,
                &[
                    test_article("1", "https://x.test/one", None),
                    test_article("2", "https://x.test/two", None),
                ],
            )
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.id)
            .collect();

        let tags = vec!["rss".to_string(), "rust".to_string()];
        db.save_bookmark(ids[0], 77, &tags).await.unwrap();
        db.save_bookmark(ids[0], 78, &tags[..1]).await.unwrap();
        db.save_bookmark(ids[1], 79, &[]).await.unwrap();

        assert_eq!(db.saved_count().await, 2);
        let saved = db.saved().await;
        assert_eq!(saved[0].bookmark_id, 78);
        assert_eq!(saved[0].tags, vec!["rss".to_string()]);
        assert!(saved[1].tags.is_empty());
    }

    #[tokio::test]
    async fn test_article_sources_ordered_by_feed_title() {
        let (db, _) = test_db().await;
        let zeta = test_feed(&db, "https://z.test/feed", "Zeta").await;
        let alpha = test_feed(&db, "https://a.test/feed", "Alpha").await;

        let id = db
            .ingest(zeta, &[test_article("z1", "https://x.test/post?src=z", Some(NOW - 50))])
            .await
            .unwrap()[0]
            .id;
        let folded = db
            .ingest(alpha, &[test_article("a1", "https://x.test/post?src=a", None)])
            .await
            .unwrap();
        assert!(folded.is_empty());

        let sources = db.article_sources(id).await;
        assert_eq!(
            sources,
            vec![
                ArticleSource {
                    feed_id: alpha,
                    feed_title: "Alpha".to_string(),
                    published_at: None,
                },
                ArticleSource {
                    feed_id: zeta,
                    feed_title: "Zeta".to_string(),
                    published_at: Some(NOW - 50),
                },
            ]
        );
        assert_eq!(db.articles_for_feed(alpha).await.len(), 1);
    }

    #[tokio::test]
    async fn test_purge_keeps_recent_starred_and_unfetched() {
        let (db, clock) = test_db().await;
        let feed = test_feed(&db, "https://a.test/feed", "A").await;
        let old = db
            .ingest(
                feed,
                &[
                    test_article("old", "https://x.test/old", None),
                    test_article("starred", "https://x.test/starred", None),
                ],
            )
            .await
            .unwrap();
        db.toggle_starred(old[1].id).await.unwrap();
        db.upsert_summary(old[0].id, "gone soon", "m").await.unwrap();

        clock.advance(40 * SECONDS_PER_DAY);
        db.ingest(feed, &[test_article("new", "https://x.test/new", None)])
            .await
            .unwrap();

        assert_eq!(db.purge_articles_older_than(30).await.unwrap(), 1);

        let guids: Vec<String> = db.articles().await.into_iter().map(|a| a.guid).collect();
        assert_eq!(guids, vec!["starred", "new"]);
        assert!(db.summaries().await.is_empty());

        assert!(matches!(
            db.purge_articles_older_than(0).await,
            Err(StoreError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_reads_degrade_after_pool_closed() {
        let (db, _) = test_db().await;
        let feed = test_feed(&db, "https://a.test/feed", "A").await;
        db.ingest(feed, &[test_article("1", "https://x.test/one", None)])
            .await
            .unwrap();
        db.pool.close().await;

        assert!(db.articles().await.is_empty());
        assert!(db.sorted_articles().await.is_empty());
        assert!(db.article_sources(1).await.is_empty());
        assert!(db.summaries().await.is_empty());
        assert!(db.find_summary(1).await.is_none());
        assert_eq!(db.saved_count().await, 0);
    }
}
