//! Integration tests for deleting articles and bringing them back.

use greeder::storage::{Article, Database, FixedClock, IncomingArticle, NewFeed, StoreError};
use pretty_assertions::assert_eq;
use std::sync::Arc;

const NOW: i64 = 1_700_000_000;
const DAY: i64 = 86_400;

async fn test_db() -> (Database, Arc<FixedClock>) {
    let clock = Arc::new(FixedClock::new(NOW));
    let db = Database::open_with_clock(":memory:", clock.clone())
        .await
        .unwrap();
    (db, clock)
}

async fn add_feed(db: &Database, url: &str) -> i64 {
    db.insert_feed(&NewFeed {
        title: url.to_string(),
        url: url.to_string(),
        ..Default::default()
    })
    .await
    .unwrap()
    .id
}

fn posted(guid: &str, url: &str, published: i64) -> IncomingArticle {
    IncomingArticle {
        guid: guid.to_string(),
        title: format!("Post {guid}"),
        url: url.to_string(),
        author: "Ada".to_string(),
        content: "<p>body</p>".to_string(),
        content_text: "body".to_string(),
        published: Some(published),
    }
}

#[tokio::test]
async fn test_delete_article_seven_then_restore_three_day_window() {
    let (db, _) = test_db().await;
    let feed = add_feed(&db, "https://blog.test/feed").await;

    let batch: Vec<IncomingArticle> = (1..=7)
        .map(|n| posted(&format!("p{n}"), &format!("https://blog.test/{n}"), NOW - 10 * DAY + n))
        .chain(std::iter::once(posted("p8", "https://blog.test/8", NOW - 2 * DAY)))
        .collect();
    let inserted = db.ingest(feed, &batch).await.unwrap();
    assert_eq!(inserted[6].id, 7);

    // Article #7 is the one published two days ago
    let mut seventh = db.article_by_id(7).await.unwrap().unwrap();
    seventh.published_at = Some(NOW - 2 * DAY);
    seventh.is_read = true;
    seventh.is_starred = true;
    db.update_article(&seventh).await.unwrap();
    let seventh = db.article_by_id(7).await.unwrap().unwrap();

    db.delete_article(7).await.unwrap();
    db.delete_article(8).await.unwrap();
    db.delete_article(1).await.unwrap();
    assert_eq!(db.articles().await.len(), 5);

    // #7 and #8 are inside the window, #1 is ten days old
    assert_eq!(db.restore_within_days(3).await.unwrap(), 2);

    let restored = db
        .articles()
        .await
        .into_iter()
        .find(|a| a.url == "https://blog.test/7")
        .unwrap();
    assert_ne!(restored.id, 7);
    assert!(restored.is_read);
    assert!(restored.is_starred);
    assert_eq!(Article { id: 7, ..restored.clone() }, seventh);
    assert_eq!(db.article_sources(restored.id).await.len(), 1);

    let remaining = db.tombstones().await;
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].article.url, "https://blog.test/1");
}

#[tokio::test]
async fn test_restore_window_unread_wins_and_starred_wins() {
    let (db, _) = test_db().await;
    let a = add_feed(&db, "https://a.test/feed").await;
    let b = add_feed(&db, "https://b.test/feed").await;

    let original = db
        .ingest(a, &[posted("a1", "https://x.test/story?src=a", NOW - DAY)])
        .await
        .unwrap()
        .remove(0);
    db.toggle_starred(original.id).await.unwrap();
    db.delete_article(original.id).await.unwrap();

    let live = db
        .ingest(b, &[posted("b1", "https://x.test/story?src=b", NOW - DAY)])
        .await
        .unwrap()
        .remove(0);
    db.set_read(live.id, true).await.unwrap();

    assert_eq!(db.restore_within_days(2).await.unwrap(), 1);

    let article = db.article_by_id(live.id).await.unwrap().unwrap();
    assert!(!article.is_read);
    assert!(article.is_starred);
    assert_eq!(db.articles().await.len(), 1);
    assert_eq!(db.article_sources(live.id).await.len(), 2);
}

#[tokio::test]
async fn test_deleted_article_stays_deleted_on_refresh() {
    let (db, _) = test_db().await;
    let feed = add_feed(&db, "https://a.test/feed").await;
    let batch = [posted("g1", "https://a.test/1", NOW - DAY)];

    let id = db.ingest(feed, &batch).await.unwrap()[0].id;
    db.delete_article(id).await.unwrap();

    assert!(db.ingest(feed, &batch).await.unwrap().is_empty());
    assert!(db.articles().await.is_empty());

    let undone = db.undo_last_delete().await.unwrap();
    assert_eq!(undone.guid, "g1");
    assert!(matches!(
        db.undo_last_delete().await,
        Err(StoreError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_tombstone_age_purge_uses_deletion_time() {
    let (db, clock) = test_db().await;
    let feed = add_feed(&db, "https://a.test/feed").await;
    let ids: Vec<i64> = db
        .ingest(
            feed,
            &[
                posted("old", "https://a.test/old", NOW - DAY),
                posted("new", "https://a.test/new", NOW - DAY),
            ],
        )
        .await
        .unwrap()
        .iter()
        .map(|a| a.id)
        .collect();

    db.delete_article(ids[0]).await.unwrap();
    clock.advance(20 * DAY);
    db.delete_article(ids[1]).await.unwrap();

    assert_eq!(db.purge_tombstones_older_than(10).await.unwrap(), 1);
    let left = db.tombstones().await;
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].guid, "new");

    assert!(matches!(
        db.purge_tombstones_older_than(0).await,
        Err(StoreError::InvalidInput(_))
    ));
}
