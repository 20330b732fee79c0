//! greeder: a local-first feed reader store that keeps one canonical record
//! per article, however many feeds it arrives through.

pub mod config;
pub mod feed;
pub mod storage;
pub mod util;
