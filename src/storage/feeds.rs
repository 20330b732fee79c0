use sqlx::QueryBuilder;

use super::schema::Database;
use super::types::{or_default, to_epoch, Feed, FeedDbRow, NewFeed, StoreError};

impl Database {
    // ========================================================================
    // Feed Operations
    // ========================================================================

    /// Subscribe to a feed.
    ///
    /// # Errors
    ///
    /// `StoreError::AlreadyExists` if a feed with the same URL is stored.
    pub async fn insert_feed(&self, feed: &NewFeed) -> Result<Feed, StoreError> {
        let now = self.now();
        let mut tx = self.pool.begin().await?;

        let existing: Option<(i64,)> = sqlx::query_as("SELECT id FROM feeds WHERE url = ?")
            .bind(&feed.url)
            .fetch_optional(&mut *tx)
            .await?;
        if existing.is_some() {
            return Err(StoreError::AlreadyExists(feed.url.clone()));
        }

        let id = sqlx::query(
            r#"
            INSERT INTO feeds (title, url, site_url, description, last_fetched, created_at, updated_at)
            VALUES (?, ?, ?, ?, 0, ?, ?)
            "#,
        )
        .bind(&feed.title)
        .bind(&feed.url)
        .bind(&feed.site_url)
        .bind(&feed.description)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        tx.commit().await?;
        tracing::info!(feed_id = id, url = %feed.url, "Feed added");

        Ok(Feed {
            id,
            title: feed.title.clone(),
            url: feed.url.clone(),
            site_url: feed.site_url.clone(),
            description: feed.description.clone(),
            last_fetched: None,
            created_at: Some(now),
            updated_at: Some(now),
        })
    }

    /// Overwrite a feed's metadata. `updated_at` is set from the clock.
    pub async fn update_feed(&self, feed: &Feed) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE feeds
            SET title = ?, url = ?, site_url = ?, description = ?, last_fetched = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&feed.title)
        .bind(&feed.url)
        .bind(&feed.site_url)
        .bind(&feed.description)
        .bind(to_epoch(feed.last_fetched))
        .bind(self.now())
        .bind(feed.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("feed"));
        }
        Ok(())
    }

    /// Unsubscribe a feed.
    ///
    /// Removes the feed, the articles it owns and its tombstones in one
    /// transaction. Source links from articles owned by other feeds cascade.
    pub async fn delete_feed(&self, feed_id: i64) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        let articles = sqlx::query("DELETE FROM articles WHERE feed_id = ?")
            .bind(feed_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        sqlx::query("DELETE FROM deleted WHERE feed_id = ?")
            .bind(feed_id)
            .execute(&mut *tx)
            .await?;
        let feeds = sqlx::query("DELETE FROM feeds WHERE id = ?")
            .bind(feed_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        if feeds == 0 {
            return Err(StoreError::NotFound("feed"));
        }

        tx.commit().await?;
        tracing::info!(feed_id, articles, "Feed deleted");
        Ok(())
    }

    /// Look up a single feed.
    pub async fn feed_by_id(&self, feed_id: i64) -> Result<Option<Feed>, StoreError> {
        let row: Option<FeedDbRow> = sqlx::query_as(
            r#"
            SELECT id, title, url, site_url, description, last_fetched, created_at, updated_at
            FROM feeds WHERE id = ?
            "#,
        )
        .bind(feed_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(FeedDbRow::into_feed))
    }

    pub(crate) async fn fetch_feeds(&self) -> Result<Vec<Feed>, sqlx::Error> {
        let rows: Vec<FeedDbRow> = sqlx::query_as(
            r#"
            SELECT id, title, url, site_url, description, last_fetched, created_at, updated_at
            FROM feeds
            ORDER BY title COLLATE NOCASE, id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(FeedDbRow::into_feed).collect())
    }

    /// All feeds ordered by title. Empty on storage failure.
    pub async fn feeds(&self) -> Vec<Feed> {
        or_default("feeds", self.fetch_feeds().await)
    }

    /// Subscribe to many feeds at once, skipping URLs already stored.
    ///
    /// Returns how many feeds were added.
    pub async fn import_feeds(&self, feeds: &[NewFeed]) -> Result<usize, StoreError> {
        if feeds.is_empty() {
            return Ok(0);
        }

        const BATCH_SIZE: usize = 100;
        let now = self.now();
        let mut added = 0u64;
        let mut tx = self.pool.begin().await?;

        for chunk in feeds.chunks(BATCH_SIZE) {
            let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(
                "INSERT INTO feeds (title, url, site_url, description, last_fetched, created_at, updated_at) ",
            );
            builder.push_values(chunk, |mut b, feed| {
                b.push_bind(&feed.title)
                    .push_bind(&feed.url)
                    .push_bind(&feed.site_url)
                    .push_bind(&feed.description)
                    .push_bind(0i64)
                    .push_bind(now)
                    .push_bind(now);
            });
            builder.push(" ON CONFLICT(url) DO NOTHING");

            added += builder.build().execute(&mut *tx).await?.rows_affected();
        }

        tx.commit().await?;
        tracing::info!(added, offered = feeds.len(), "Feeds imported");
        Ok(added as usize)
    }
}
