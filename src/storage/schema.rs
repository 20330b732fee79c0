use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqliteConnection, SqlitePool,
};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use super::clock::{Clock, SystemClock};
use super::types::{is_lock_error, StoreError};

// ============================================================================
// Database
// ============================================================================

#[derive(Clone)]
pub struct Database {
    pub(crate) pool: SqlitePool,
    pub(crate) clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

impl Database {
    /// Open a database connection and run migrations, using wall-clock time.
    ///
    /// `":memory:"` opens a private in-memory store.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::InstanceLocked` if another process has the
    /// database locked, `StoreError::Migration` if the schema cannot be
    /// created.
    pub async fn open(path: &str) -> Result<Self, StoreError> {
        Self::open_with_clock(path, Arc::new(SystemClock)).await
    }

    /// Open a database whose timestamps come from `clock`.
    pub async fn open_with_clock(path: &str, clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        let in_memory = path == ":memory:";
        let url = format!("sqlite:{}?mode=rwc", path);

        // Create the file owner-only before SQLite does
        #[cfg(unix)]
        if !in_memory {
            use std::os::unix::fs::OpenOptionsExt;
            let db_path = std::path::Path::new(path);
            if !db_path.exists() && db_path.parent().map_or(true, |p| p.as_os_str().is_empty() || p.exists()) {
                let _file = std::fs::OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .mode(0o600)
                    .open(db_path)
                    .ok(); // SQLite reports any real problem at connect time
            }
        }

        let options = SqliteConnectOptions::from_str(&url)
            .map_err(StoreError::from_sqlx)?
            .foreign_keys(true)
            .pragma("busy_timeout", "5000");

        // An in-memory database lives as long as its connection, so keep
        // exactly one open for the life of the pool.
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };
        let pool = pool_options
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(StoreError::from_sqlx)?;

        let db = Self { pool, clock };
        db.migrate().await.map_err(|e| {
            if is_lock_error(&e.to_string()) {
                StoreError::InstanceLocked
            } else {
                StoreError::Migration(e.to_string())
            }
        })?;
        tracing::debug!(path = %path, "Database opened");
        Ok(db)
    }

    /// Current time from the injected clock.
    pub(crate) fn now(&self) -> i64 {
        self.clock.now()
    }

    /// Create the schema atomically.
    ///
    /// Every statement is idempotent, so re-running on an existing database
    /// only adds what is missing.
    async fn migrate(&self) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feeds (
                id INTEGER PRIMARY KEY,
                title TEXT NOT NULL DEFAULT '',
                url TEXT UNIQUE NOT NULL,
                site_url TEXT,
                description TEXT,
                last_fetched INTEGER,
                created_at INTEGER,
                updated_at INTEGER
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        // feed_id records the first feed an article was seen through. It is
        // not a foreign key: ownership is tracked in article_sources.
        // AUTOINCREMENT keeps a restored article from reusing a deleted id.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS articles (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                feed_id INTEGER NOT NULL,
                guid TEXT NOT NULL,
                title TEXT,
                url TEXT,
                base_url TEXT,
                author TEXT,
                content TEXT,
                content_text TEXT,
                published_at INTEGER,
                fetched_at INTEGER,
                is_read INTEGER NOT NULL DEFAULT 0,
                is_starred INTEGER NOT NULL DEFAULT 0,
                feed_title TEXT,
                UNIQUE(feed_id, guid)
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS summaries (
                id INTEGER PRIMARY KEY,
                article_id INTEGER NOT NULL UNIQUE REFERENCES articles(id) ON DELETE CASCADE,
                content TEXT NOT NULL DEFAULT '',
                model TEXT NOT NULL DEFAULT '',
                generated_at INTEGER
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS saved (
                article_id INTEGER PRIMARY KEY REFERENCES articles(id) ON DELETE CASCADE,
                bookmark_id INTEGER NOT NULL DEFAULT 0,
                tags TEXT NOT NULL DEFAULT '[]',
                saved_at INTEGER
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS deleted (
                id INTEGER PRIMARY KEY,
                feed_id INTEGER NOT NULL,
                guid TEXT NOT NULL,
                title TEXT,
                url TEXT,
                base_url TEXT,
                author TEXT,
                content TEXT,
                content_text TEXT,
                published_at INTEGER,
                fetched_at INTEGER,
                is_read INTEGER NOT NULL DEFAULT 0,
                is_starred INTEGER NOT NULL DEFAULT 0,
                feed_title TEXT,
                deleted_at INTEGER
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS article_sources (
                article_id INTEGER NOT NULL REFERENCES articles(id) ON DELETE CASCADE,
                feed_id INTEGER NOT NULL REFERENCES feeds(id) ON DELETE CASCADE,
                published_at INTEGER,
                UNIQUE(article_id, feed_id)
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        // Databases created before identities were stored lack base_url
        ensure_column(&mut tx, "articles", "base_url", "TEXT").await?;
        ensure_column(&mut tx, "deleted", "base_url", "TEXT").await?;

        for statement in [
            "CREATE INDEX IF NOT EXISTS idx_articles_base_url ON articles(base_url)",
            "CREATE INDEX IF NOT EXISTS idx_articles_published ON articles(published_at DESC)",
            "CREATE INDEX IF NOT EXISTS idx_articles_fetched ON articles(fetched_at)",
            "CREATE INDEX IF NOT EXISTS idx_deleted_feed ON deleted(feed_id)",
            "CREATE INDEX IF NOT EXISTS idx_deleted_published ON deleted(published_at)",
            "CREATE INDEX IF NOT EXISTS idx_article_sources_feed ON article_sources(feed_id)",
        ] {
            sqlx::query(statement).execute(&mut *tx).await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

/// Add `column` to `table` unless it already exists.
async fn ensure_column(
    conn: &mut SqliteConnection,
    table: &str,
    column: &str,
    definition: &str,
) -> Result<(), sqlx::Error> {
    let (present,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM pragma_table_info(?) WHERE name = ?")
            .bind(table)
            .bind(column)
            .fetch_one(&mut *conn)
            .await?;
    if present == 0 {
        tracing::info!(table, column, "Adding missing column");
        sqlx::query(&format!("ALTER TABLE {table} ADD COLUMN {column} {definition}"))
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}
