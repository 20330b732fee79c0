//! Integration tests for cross-feed deduplication: ingest folding and the
//! reconciliation pass.
//!
//! Each test creates its own in-memory SQLite database with a pinned clock.

use greeder::storage::{Database, FixedClock, IncomingArticle, NewFeed, StoreError};
use greeder::util::base_identity;
use pretty_assertions::assert_eq;
use std::collections::HashSet;
use std::sync::Arc;

const NOW: i64 = 1_700_000_000;

async fn test_db() -> Database {
    Database::open_with_clock(":memory:", Arc::new(FixedClock::new(NOW)))
        .await
        .unwrap()
}

async fn add_feed(db: &Database, title: &str) -> i64 {
    db.insert_feed(&NewFeed {
        title: title.to_string(),
        url: format!("https://{}.test/feed.xml", title.to_lowercase()),
        ..Default::default()
    })
    .await
    .unwrap()
    .id
}

fn article(guid: &str, url: &str) -> IncomingArticle {
    IncomingArticle {
        guid: guid.to_string(),
        title: format!("Article {guid}"),
        url: url.to_string(),
        published: Some(NOW - 3600),
        ..Default::default()
    }
}

async fn assert_identities_unique(db: &Database) {
    let mut seen = HashSet::new();
    for a in db.articles().await {
        assert!(seen.insert(a.base_url.clone()), "duplicate identity {}", a.base_url);
    }
}

// ============================================================================
// Ingest folding
// ============================================================================

#[tokio::test]
async fn test_same_post_via_two_feeds_with_different_query_strings() {
    let db = test_db().await;
    let f1 = add_feed(&db, "One").await;
    let f2 = add_feed(&db, "Two").await;

    db.ingest(f1, &[article("f1-post", "https://x.test/post?a=1")])
        .await
        .unwrap();
    let second = db
        .ingest(f2, &[article("f2-post", "https://x.test/post?b=2")])
        .await
        .unwrap();
    assert!(second.is_empty());

    let articles = db.articles().await;
    assert_eq!(articles.len(), 1);
    assert_eq!(articles[0].feed_id, f1);
    assert_eq!(articles[0].base_url, "https://x.test/post");

    let sources = db.article_sources(articles[0].id).await;
    let feed_ids: Vec<i64> = sources.iter().map(|s| s.feed_id).collect();
    assert_eq!(feed_ids, vec![f1, f2]);
}

#[tokio::test]
async fn test_fold_conservation() {
    let db = test_db().await;
    let f1 = add_feed(&db, "Alpha").await;
    let f2 = add_feed(&db, "Beta").await;

    db.ingest(
        f1,
        &[
            article("a1", "https://x.test/one"),
            article("a2", "https://x.test/two"),
        ],
    )
    .await
    .unwrap();

    // N = 4 distinct GUIDs, M = 2 share an identity with live articles,
    // plus one within-batch GUID repeat that must add nothing.
    let batch = [
        article("b1", "https://x.test/one?utm=b"),
        article("b2", "https://x.test/two#top"),
        article("b3", "https://x.test/three"),
        article("b4", "https://x.test/four"),
        article("b4", "https://x.test/four-again"),
    ];
    let inserted = db.ingest(f2, &batch).await.unwrap();

    assert_eq!(inserted.len(), 2);
    assert_eq!(db.articles().await.len(), 4);
    let counts = db.counts().await.unwrap();
    assert_eq!(counts.sources, 2 + 4);
    assert_identities_unique(&db).await;
}

#[tokio::test]
async fn test_ingest_into_unknown_feed_changes_nothing() {
    let db = test_db().await;
    let result = db.ingest(99, &[article("g", "https://x.test/a")]).await;
    assert!(matches!(result, Err(StoreError::NotFound(_))));
    assert!(db.articles().await.is_empty());
}

// ============================================================================
// Reconciliation
// ============================================================================

/// Two live articles sharing one identity. `update_article` does not fold,
/// so moving b's URL onto a's page leaves a duplicate for reconcile.
async fn seed_duplicates(db: &Database) -> (i64, i64) {
    let f1 = add_feed(db, "One").await;
    let f2 = add_feed(db, "Two").await;
    let a = db.ingest(f1, &[article("a", "https://x.test/dup?x=1")]).await.unwrap()[0].id;
    let b = db.ingest(f2, &[article("b", "https://y.test/other")]).await.unwrap()[0].id;

    let mut moved = db.article_by_id(b).await.unwrap().unwrap();
    moved.url = "https://x.test/dup?x=2".to_string();
    db.update_article(&moved).await.unwrap();
    (a, b)
}

#[tokio::test]
async fn test_reconcile_merges_and_conserves_summaries() {
    let db = test_db().await;
    let (a, b) = seed_duplicates(&db).await;
    db.upsert_summary(a, "keeper summary", "m").await.unwrap();
    db.upsert_summary(b, "duplicate summary", "m").await.unwrap();
    db.save_bookmark(b, 42, &["later".to_string()]).await.unwrap();

    let report = db.reconcile().await.unwrap();
    assert_eq!(report.merged, 1);

    let articles = db.articles().await;
    assert_eq!(articles.len(), 1);
    assert_eq!(articles[0].id, a);
    assert_eq!(articles[0].base_url, base_identity("https://x.test/dup?x=1"));

    let summaries = db.summaries().await;
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].content, "keeper summary");

    let saved = db.saved().await;
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].article_id, a);
    assert_eq!(db.article_sources(a).await.len(), 2);
    assert_identities_unique(&db).await;
}

#[tokio::test]
async fn test_reconcile_twice_equals_once() {
    let db = test_db().await;
    let (a, b) = seed_duplicates(&db).await;
    db.upsert_summary(b, "only summary", "m").await.unwrap();
    db.save_bookmark(a, 7, &[]).await.unwrap();

    db.reconcile().await.unwrap();
    let once = db.counts().await.unwrap();

    let second = db.reconcile().await.unwrap();
    assert_eq!(second.merged, 0);
    assert_eq!(second.corrected, 0);
    assert_eq!(db.counts().await.unwrap(), once);

    // A lone summary on the duplicate follows it to the keeper
    assert_eq!(db.find_summary(a).await.map(|s| s.content), Some("only summary".to_string()));
}

#[tokio::test]
async fn test_reconcile_keeps_keeper_flags() {
    let db = test_db().await;
    let (a, b) = seed_duplicates(&db).await;
    db.toggle_starred(b).await.unwrap();
    db.set_read(b, true).await.unwrap();

    db.reconcile().await.unwrap();

    let keeper = db.article_by_id(a).await.unwrap().unwrap();
    assert!(!keeper.is_read);
    assert!(!keeper.is_starred);
}
