//! Reelhouse: response caching, page-speed rewriting, catalog sitemaps and
//! an offline cache engine for a video-streaming catalog site.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
pub mod optimize;
pub mod util;
pub mod worker;
