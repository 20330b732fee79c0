//! Integration tests for moving a store in and out: OPML subscriptions and
//! full JSON state snapshots.

use greeder::feed::{export_opml_file, read_opml};
use greeder::storage::{Database, FixedClock, IncomingArticle, NewFeed, StoreError};
use pretty_assertions::assert_eq;
use std::path::PathBuf;
use std::sync::Arc;

const NOW: i64 = 1_700_000_000;

async fn test_db() -> Database {
    Database::open_with_clock(":memory:", Arc::new(FixedClock::new(NOW)))
        .await
        .unwrap()
}

fn temp_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("greeder_it_{}_{}", std::process::id(), name))
}

#[tokio::test]
async fn test_opml_import_skips_known_feeds_and_exports_back() {
    let db = test_db().await;
    db.insert_feed(&NewFeed {
        title: "Already here".into(),
        url: "https://known.test/feed".into(),
        ..Default::default()
    })
    .await
    .unwrap();

    let input = temp_path("subs.opml");
    std::fs::write(
        &input,
        r#"<?xml version="1.0"?>
<opml version="2.0"><body>
  <outline text="Tech">
    <outline text="Known" xmlUrl="https://known.test/feed"/>
    <outline text="Fresh" xmlUrl="https://fresh.test/rss" htmlUrl="https://fresh.test"/>
  </outline>
  <outline text="Local" xmlUrl="file:///etc/passwd"/>
</body></opml>"#,
    )
    .unwrap();

    let subscriptions = read_opml(&input).await.unwrap();
    assert_eq!(subscriptions.len(), 2);
    assert_eq!(db.import_feeds(&subscriptions).await.unwrap(), 1);

    let feeds = db.feeds().await;
    assert_eq!(feeds.len(), 2);
    assert_eq!(feeds[0].title, "Already here");

    let output = temp_path("export.opml");
    export_opml_file(&feeds, &output).unwrap();
    let round: Vec<String> = read_opml(&output)
        .await
        .unwrap()
        .into_iter()
        .map(|f| f.url)
        .collect();
    assert_eq!(round, vec!["https://known.test/feed", "https://fresh.test/rss"]);

    let _ = std::fs::remove_file(&input);
    let _ = std::fs::remove_file(&output);
}

#[tokio::test]
async fn test_state_moves_between_stores() {
    let source = test_db().await;
    let feed = source
        .insert_feed(&NewFeed {
            title: "Blog".into(),
            url: "https://blog.test/feed".into(),
            ..Default::default()
        })
        .await
        .unwrap();
    let articles = source
        .ingest(
            feed.id,
            &[
                IncomingArticle {
                    guid: "1".into(),
                    title: "Kept".into(),
                    url: "https://blog.test/kept?ref=rss".into(),
                    published: Some(NOW - 60),
                    ..Default::default()
                },
                IncomingArticle {
                    guid: "2".into(),
                    title: "Gone".into(),
                    url: "https://blog.test/gone".into(),
                    published: Some(NOW - 60),
                    ..Default::default()
                },
            ],
        )
        .await
        .unwrap();
    let kept = articles[0].id;
    source.toggle_starred(kept).await.unwrap();
    source.upsert_summary(kept, "tl;dr", "small").await.unwrap();
    source.save_bookmark(kept, 99, &["rust".to_string()]).await.unwrap();
    source.delete_article(articles[1].id).await.unwrap();

    let path = temp_path("state.json");
    let exported = source.export_state(&path).await.unwrap();

    let target = test_db().await;
    target
        .insert_feed(&NewFeed {
            title: "Replaced".into(),
            url: "https://replaced.test/feed".into(),
            ..Default::default()
        })
        .await
        .unwrap();
    let imported = target.import_state(&path).await.unwrap();
    let _ = std::fs::remove_file(&path);

    assert_eq!(imported.articles, exported.articles);
    assert_eq!(target.counts().await.unwrap(), source.counts().await.unwrap());
    assert_eq!(target.feeds().await, source.feeds().await);

    let article = target.article_by_id(kept).await.unwrap().unwrap();
    assert!(article.is_starred);
    assert_eq!(article.base_url, "https://blog.test/kept");
    assert_eq!(target.find_summary(kept).await.map(|s| s.content), Some("tl;dr".into()));
    assert_eq!(target.saved().await[0].tags, vec!["rust".to_string()]);
    assert_eq!(target.article_sources(kept).await.len(), 1);

    // The tombstone travels too and can still be undone
    let undone = target.undo_last_delete().await.unwrap();
    assert_eq!(undone.title, "Gone");
}

#[tokio::test]
async fn test_unsupported_snapshot_version_is_rejected() {
    let db = test_db().await;
    db.insert_feed(&NewFeed {
        title: "Stay".into(),
        url: "https://stay.test/feed".into(),
        ..Default::default()
    })
    .await
    .unwrap();

    let mut snapshot = db.snapshot().await.unwrap();
    snapshot.version = 99;
    snapshot.feeds.clear();

    let path = temp_path("future.json");
    std::fs::write(&path, serde_json::to_vec(&snapshot).unwrap()).unwrap();
    let result = db.import_state(&path).await;
    let _ = std::fs::remove_file(&path);

    assert!(matches!(result, Err(StoreError::UnsupportedVersion(99))));
    assert_eq!(db.feeds().await.len(), 1);
}
