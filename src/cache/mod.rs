//! Reelhouse process cache.
//!
//! A [`CacheStore`] is injected wherever cached data is read, and every write
//! names its own TTL. [`MemoryStore`] is the in-process implementation.
//! Invalidation is all-or-nothing: [`CacheStore::flush`] drops everything.
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! capacity = 1024
//! max_body_bytes = 2097152
//! ```

mod config;
pub mod keys;
mod store;

pub use config::CacheConfig;
pub use store::{CacheStore, MemoryStore, remember};
