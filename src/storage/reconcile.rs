use sqlx::SqliteConnection;
use std::collections::HashMap;

use super::articles::ensure_article_source;
use super::schema::Database;
use super::types::{from_epoch, ReconcileReport, StoreError};
use crate::util::resolve_identity;

impl Database {
    // ========================================================================
    // Reconciliation
    // ========================================================================

    /// Recompute every article's identity and merge rows that collide.
    ///
    /// The earliest row (lowest id) for an identity is kept. Each later row
    /// hands its feed sources to the keeper, along with its summary and
    /// bookmark when the keeper has none, and is then deleted. Read and
    /// starred flags of merged rows are dropped.
    ///
    /// Idempotent: a second run finds nothing to correct or merge. Runs in
    /// one transaction; on error nothing is applied.
    pub async fn reconcile(&self) -> Result<ReconcileReport, StoreError> {
        let mut tx = self.pool.begin().await?;
        let report = reconcile_in(&mut tx).await?;
        tx.commit().await?;

        tracing::info!(
            scanned = report.scanned,
            corrected = report.corrected,
            merged = report.merged,
            "Reconciliation complete"
        );
        Ok(report)
    }
}

/// Reconciliation body, run inside a caller-owned transaction.
pub(crate) async fn reconcile_in(
    conn: &mut SqliteConnection,
) -> Result<ReconcileReport, sqlx::Error> {
    let rows: Vec<(i64, i64, Option<String>, Option<String>, Option<i64>)> = sqlx::query_as(
        "SELECT id, feed_id, url, base_url, published_at FROM articles ORDER BY id",
    )
    .fetch_all(&mut *conn)
    .await?;

    let mut report = ReconcileReport {
        scanned: rows.len(),
        ..Default::default()
    };
    let mut keepers: HashMap<String, i64> = HashMap::new();

    for (id, feed_id, url, stored, published) in rows {
        let url = url.unwrap_or_default();
        let identity = resolve_identity(&url, stored.as_deref());

        if stored.as_deref() != Some(identity.as_str()) {
            sqlx::query("UPDATE articles SET base_url = ? WHERE id = ?")
                .bind(&identity)
                .bind(id)
                .execute(&mut *conn)
                .await?;
            report.corrected += 1;
        }

        let Some(&keeper) = keepers.get(&identity) else {
            keepers.insert(identity, id);
            ensure_article_source(conn, id, feed_id, from_epoch(published)).await?;
            continue;
        };

        merge_into(conn, keeper, id, feed_id, from_epoch(published)).await?;
        tracing::debug!(keeper, duplicate = id, "Merged duplicate article");
        report.merged += 1;
    }

    Ok(report)
}

/// Fold `duplicate` into `keeper` and delete it.
async fn merge_into(
    conn: &mut SqliteConnection,
    keeper: i64,
    duplicate: i64,
    feed_id: i64,
    published: Option<i64>,
) -> Result<(), sqlx::Error> {
    ensure_article_source(conn, keeper, feed_id, published).await?;

    let sources: Vec<(i64, Option<i64>)> =
        sqlx::query_as("SELECT feed_id, published_at FROM article_sources WHERE article_id = ?")
            .bind(duplicate)
            .fetch_all(&mut *conn)
            .await?;
    for (source_feed, source_published) in sources {
        ensure_article_source(conn, keeper, source_feed, from_epoch(source_published)).await?;
    }

    for table in ["summaries", "saved"] {
        let (keeper_has,): (bool,) = sqlx::query_as(&format!(
            "SELECT EXISTS (SELECT 1 FROM {table} WHERE article_id = ?)"
        ))
        .bind(keeper)
        .fetch_one(&mut *conn)
        .await?;

        let statement = if keeper_has {
            format!("DELETE FROM {table} WHERE article_id = ?2")
        } else {
            format!("UPDATE {table} SET article_id = ?1 WHERE article_id = ?2")
        };
        sqlx::query(&statement)
            .bind(keeper)
            .bind(duplicate)
            .execute(&mut *conn)
            .await?;
    }

    sqlx::query("DELETE FROM articles WHERE id = ?")
        .bind(duplicate)
        .execute(&mut *conn)
        .await?;
    Ok(())
}
