//! Utility functions shared by the store and the feed adapters.
//!
//! - **Article identity**: the canonical dedup key derived from an article URL
//! - **Feed URL validation**: scheme/host checks for subscriptions
//! - **Atomic writes**: temp-file-and-rename for exports
//!
//! # Examples
//!
//! ```
//! use greeder::util::{base_identity, validate_feed_url};
//!
//! assert_eq!(base_identity("https://x.test/post?a=1"), "https://x.test/post");
//! assert!(validate_feed_url("https://example.com/feed.xml").is_ok());
//! ```

mod feed_url;
mod fs;
mod identity;

pub use feed_url::{validate_feed_url, FeedUrlError};
pub use fs::write_atomic;
pub use identity::{base_identity, resolve_identity};
