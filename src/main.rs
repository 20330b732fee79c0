use anyhow::{Context, Result};
use chrono::{TimeZone, Utc};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::time::Duration;

use greeder::config::Config;
use greeder::feed::{self, FetchOptions};
use greeder::storage::{Database, NewFeed, StoreError};
use greeder::util::validate_feed_url;

#[derive(Parser, Debug)]
#[command(
    name = "greeder",
    about = "Local-first feed reader store with cross-feed article deduplication"
)]
struct Args {
    /// Database file (overrides the config file)
    #[arg(long, value_name = "FILE")]
    db: Option<PathBuf>,

    /// Config file [default: ~/.config/greeder/config.toml]
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Replace the whole store with a JSON snapshot
    #[arg(long, value_name = "FILE")]
    import_state: Option<PathBuf>,

    /// Subscribe to a feed and fetch it once
    #[arg(long, value_name = "URL")]
    add: Option<String>,

    /// Subscribe to every feed in an OPML file
    #[arg(long, value_name = "FILE")]
    import_opml: Option<PathBuf>,

    /// Fetch all feeds and fold new articles into the store
    #[arg(long)]
    refresh: bool,

    /// Repair stored identities and merge duplicate articles
    #[arg(long)]
    reconcile: bool,

    /// Restore the most recently deleted article
    #[arg(long)]
    undelete: bool,

    /// Restore deleted articles published within the last N days
    /// [default: restore_window_days from config]
    #[arg(long, value_name = "DAYS", num_args = 0..=1)]
    restore_days: Option<Option<i64>>,

    /// Delete articles fetched more than N days ago
    #[arg(long, value_name = "DAYS")]
    purge_days: Option<i64>,

    /// Write subscriptions as OPML
    #[arg(long, value_name = "FILE")]
    export_opml: Option<PathBuf>,

    /// Write the whole store as a JSON snapshot
    #[arg(long, value_name = "FILE")]
    export_state: Option<PathBuf>,

    /// Print articles, newest first
    #[arg(long)]
    list: bool,

    /// Print row counts
    #[arg(long)]
    stats: bool,

    /// Keep refreshing every refresh_interval_minutes until interrupted
    #[arg(long)]
    watch: bool,
}

impl Args {
    fn has_action(&self) -> bool {
        self.import_state.is_some()
            || self.add.is_some()
            || self.import_opml.is_some()
            || self.refresh
            || self.reconcile
            || self.undelete
            || self.restore_days.is_some()
            || self.purge_days.is_some()
            || self.export_opml.is_some()
            || self.export_state.is_some()
            || self.list
            || self.stats
            || self.watch
    }
}

/// Create the config directory with user-only permissions.
fn ensure_config_dir(config_dir: &Path) -> Result<()> {
    if !config_dir.exists() {
        std::fs::create_dir_all(config_dir).with_context(|| {
            format!("Failed to create config directory {}", config_dir.display())
        })?;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o700);
        if let Err(e) = std::fs::set_permissions(config_dir, perms) {
            tracing::warn!(
                path = %config_dir.display(),
                error = %e,
                "Failed to set config directory permissions to 0700"
            );
        }
    }
    Ok(())
}

fn format_date(epoch: Option<i64>) -> String {
    epoch
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
        .map(|dt| dt.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "----------".to_string())
}

async fn add_feed(db: &Database, client: &reqwest::Client, url: &str, options: &FetchOptions) -> Result<()> {
    validate_feed_url(url).with_context(|| format!("Cannot subscribe to '{}'", url))?;

    let parsed = feed::fetch_feed(client, url, options)
        .await
        .with_context(|| format!("Failed to fetch {}", url))?;
    let title = if parsed.title.is_empty() {
        url.to_string()
    } else {
        parsed.title.clone()
    };

    let new_feed = db
        .insert_feed(&NewFeed {
            title,
            url: url.to_string(),
            site_url: parsed.site_url.clone(),
            description: parsed.description.clone(),
        })
        .await
        .context("Failed to add feed")?;
    let inserted = db.ingest(new_feed.id, &parsed.articles).await?;

    println!(
        "Added '{}' ({} new articles)",
        new_feed.title,
        inserted.len()
    );
    Ok(())
}

async fn refresh(db: &Database, client: &reqwest::Client, config: &Config, options: &FetchOptions) -> Result<()> {
    let feeds = db.feeds().await;
    if feeds.is_empty() {
        println!("No feeds to refresh. Add one with --add or --import-opml.");
        return Ok(());
    }

    let results = feed::refresh_all(db, client, feeds, options).await;
    let mut new_articles = 0;
    let mut failures = 0;
    for result in &results {
        match &result.result {
            Ok(count) => new_articles += count,
            Err(e) => {
                failures += 1;
                eprintln!("Feed {} failed: {}", result.feed_id, e);
            }
        }
    }
    println!(
        "Refreshed {} feeds: {} new articles, {} failed",
        results.len(),
        new_articles,
        failures
    );

    if config.purge_after_days > 0 {
        let articles = db.purge_articles_older_than(config.purge_after_days).await?;
        let tombstones = db.purge_tombstones_older_than(config.purge_after_days).await?;
        tracing::info!(articles, tombstones, days = config.purge_after_days, "Purged old rows");
    }
    Ok(())
}

async fn run(args: Args, config: Config, db: Database) -> Result<()> {
    let options = FetchOptions::from_config(&config);
    let client = feed::build_client(&options).context("Failed to build HTTP client")?;

    if let Some(path) = &args.import_state {
        let snapshot = db
            .import_state(path)
            .await
            .with_context(|| format!("Failed to import state from {}", path.display()))?;
        println!(
            "Imported {} feeds and {} articles",
            snapshot.feeds.len(),
            snapshot.articles.len()
        );
    }

    if let Some(url) = &args.add {
        add_feed(&db, &client, url, &options).await?;
    }

    if let Some(path) = &args.import_opml {
        let subscriptions = feed::read_opml(path)
            .await
            .with_context(|| format!("Failed to read OPML file {}", path.display()))?;
        let added = db.import_feeds(&subscriptions).await?;
        println!(
            "Imported {} of {} feeds ({} already subscribed)",
            added,
            subscriptions.len(),
            subscriptions.len() - added
        );
    }

    if args.refresh {
        refresh(&db, &client, &config, &options).await?;
    }

    if args.reconcile {
        let report = db.reconcile().await.context("Reconciliation failed")?;
        println!(
            "Reconciled {} articles: {} identities corrected, {} duplicates merged",
            report.scanned, report.corrected, report.merged
        );
    }

    if args.undelete {
        match db.undo_last_delete().await {
            Ok(article) => println!("Restored '{}'", article.title),
            Err(StoreError::NotFound(_)) => println!("Nothing to restore"),
            Err(e) => return Err(e.into()),
        }
    }

    if let Some(days) = args.restore_days {
        let days = days.unwrap_or(config.restore_window_days);
        match db.restore_within_days(days).await {
            Ok(restored) => {
                println!("Restored {} articles from the last {} days", restored, days)
            }
            Err(StoreError::NotFound(_)) => {
                println!("No deleted articles published in the last {} days", days)
            }
            Err(e) => return Err(e.into()),
        }
    }

    if let Some(days) = args.purge_days {
        let articles = db.purge_articles_older_than(days).await?;
        let tombstones = db.purge_tombstones_older_than(days).await?;
        println!(
            "Purged {} articles and {} deleted records older than {} days",
            articles, tombstones, days
        );
    }

    if let Some(path) = &args.export_opml {
        feed::export_opml_file(&db.feeds().await, path)
            .with_context(|| format!("Failed to export OPML to {}", path.display()))?;
        println!("Exported feeds to {}", path.display());
    }

    if let Some(path) = &args.export_state {
        let snapshot = db
            .export_state(path)
            .await
            .with_context(|| format!("Failed to export state to {}", path.display()))?;
        println!(
            "Exported {} feeds and {} articles to {}",
            snapshot.feeds.len(),
            snapshot.articles.len(),
            path.display()
        );
    }

    if args.list {
        for article in db.sorted_articles().await {
            let marker = match (article.is_read, article.is_starred) {
                (_, true) => '*',
                (false, false) => '+',
                (true, false) => ' ',
            };
            let sources = db.article_sources(article.id).await;
            let via = if sources.len() > 1 {
                format!(" [{} feeds]", sources.len())
            } else {
                String::new()
            };
            println!(
                "{} {:>6}  {}  {}{}",
                marker,
                article.id,
                format_date(article.published_at),
                article.title,
                via
            );
        }
    }

    if args.stats {
        let counts = db.counts().await?;
        println!("feeds:     {}", counts.feeds);
        println!("articles:  {}", counts.articles);
        println!("sources:   {}", counts.sources);
        println!("summaries: {}", counts.summaries);
        println!("saved:     {}", counts.saved);
        println!("deleted:   {}", counts.deleted);
    }

    if args.watch {
        let minutes = config.refresh_interval_minutes.max(1);
        println!("Refreshing every {} minutes, Ctrl-C to stop", minutes);
        let mut interval = tokio::time::interval(Duration::from_secs(minutes * 60));
        loop {
            tokio::select! {
                _ = interval.tick() => refresh(&db, &client, &config, &options).await?,
                _ = tokio::signal::ctrl_c() => break,
            }
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config_dir = Config::config_dir().context("HOME environment variable not set")?;
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let db_path = args
        .db
        .clone()
        .unwrap_or_else(|| config.resolved_db_path(&config_dir));
    if db_path.starts_with(&config_dir) {
        ensure_config_dir(&config_dir)?;
    }

    if !args.has_action() {
        eprintln!("Nothing to do. Try `greeder --add <URL>` or `greeder --help`.");
        std::process::exit(2);
    }

    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    let db = match Database::open(db_path_str).await {
        Ok(db) => db,
        Err(StoreError::InstanceLocked) => {
            eprintln!(
                "Error: Another instance of greeder appears to be running. Please close it and try again."
            );
            std::process::exit(1);
        }
        Err(e) => {
            return Err(anyhow::anyhow!("Failed to open database: {}", e));
        }
    };

    run(args, config, db).await
}
