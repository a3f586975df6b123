//! Cache key builders.
//!
//! Keys are plain strings so any [`CacheStore`](super::CacheStore) backend can hold them.

use crate::domain::catalog::CatalogKind;

/// Key for the sitemap index document.
pub const SITEMAP_INDEX: &str = "sitemap_index";

/// Key for one page of a catalog sitemap: `sitemap_{type}_page_{n}`.
pub fn sitemap_page(kind: CatalogKind, page: u32) -> String {
    format!("sitemap_{}_page_{page}", kind.as_str())
}
