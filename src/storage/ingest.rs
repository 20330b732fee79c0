use std::collections::HashSet;

use super::articles::{ensure_article_source, find_by_identity, insert_article};
use super::schema::Database;
use super::types::{Article, IncomingArticle, StoreError};
use crate::util::base_identity;

impl Database {
    // ========================================================================
    // Ingestion
    // ========================================================================

    /// Fold a batch of parsed articles from `feed_id` into the store.
    ///
    /// For each incoming article, in order:
    ///
    /// 1. An empty GUID falls back to the article URL.
    /// 2. A GUID already known for this feed, live or deleted, is skipped.
    ///    Deleted articles therefore never come back through ingestion.
    /// 3. If a live article already has the same identity, this feed is
    ///    recorded as one of its sources and no row is created.
    /// 4. Otherwise a new article is inserted, owned by this feed.
    ///
    /// The batch and the feed's `last_fetched` stamp are applied in one
    /// transaction. Returns the newly inserted articles.
    ///
    /// # Errors
    ///
    /// `StoreError::NotFound` if the feed does not exist. Any storage
    /// failure rolls back the whole batch.
    pub async fn ingest(
        &self,
        feed_id: i64,
        incoming: &[IncomingArticle],
    ) -> Result<Vec<Article>, StoreError> {
        let now = self.now();
        let mut tx = self.pool.begin().await?;

        let feed: Option<(Option<String>,)> = sqlx::query_as("SELECT title FROM feeds WHERE id = ?")
            .bind(feed_id)
            .fetch_optional(&mut *tx)
            .await?;
        let Some((feed_title,)) = feed else {
            return Err(StoreError::NotFound("feed"));
        };
        let feed_title = feed_title.unwrap_or_default();

        let known: Vec<(String,)> = sqlx::query_as(
            "SELECT guid FROM articles WHERE feed_id = ?1 UNION SELECT guid FROM deleted WHERE feed_id = ?1",
        )
        .bind(feed_id)
        .fetch_all(&mut *tx)
        .await?;
        let mut seen: HashSet<String> = known.into_iter().map(|(guid,)| guid).collect();

        let mut inserted = Vec::new();
        let (mut folded, mut skipped) = (0usize, 0usize);

        for item in incoming {
            let guid = if item.guid.trim().is_empty() {
                item.url.clone()
            } else {
                item.guid.clone()
            };
            if !seen.insert(guid.clone()) {
                skipped += 1;
                continue;
            }

            let mut identity = base_identity(&item.url);
            if identity.is_empty() {
                identity = item.url.clone();
            }

            if let Some((existing, _, _)) = find_by_identity(&mut tx, &identity).await? {
                ensure_article_source(&mut tx, existing, feed_id, item.published).await?;
                tracing::debug!(feed_id, article_id = existing, identity = %identity, "Folded into existing article");
                folded += 1;
                continue;
            }

            let mut article = Article {
                id: 0,
                feed_id,
                guid,
                title: item.title.clone(),
                url: item.url.clone(),
                base_url: identity,
                author: item.author.clone(),
                content: item.content.clone(),
                content_text: item.content_text.clone(),
                published_at: item.published.filter(|ts| *ts != 0),
                fetched_at: Some(now),
                is_read: false,
                is_starred: false,
                feed_title: feed_title.clone(),
            };
            article.id = insert_article(&mut tx, &article).await?;
            ensure_article_source(&mut tx, article.id, feed_id, item.published).await?;
            inserted.push(article);
        }

        sqlx::query("UPDATE feeds SET last_fetched = ?1, updated_at = ?1 WHERE id = ?2")
            .bind(now)
            .bind(feed_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        tracing::info!(
            feed_id,
            inserted = inserted.len(),
            folded,
            skipped,
            "Ingested feed batch"
        );
        Ok(inserted)
    }
}
