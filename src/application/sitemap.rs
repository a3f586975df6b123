//! Sitemap service for the catalog sitemaps and robots.txt.
//!
//! Every document is cached in the injected [`CacheStore`] under a fixed key
//! and TTL. Nothing is invalidated incrementally; a store flush is the only
//! way to drop a page before its TTL runs out.

use std::{sync::Arc, time::Duration, time::Instant};

use askama::Template;
use bytes::Bytes;
use metrics::histogram;
use thiserror::Error;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use tracing::debug;
use url::Url;

use crate::application::repos::{CatalogRepo, RepoError};
use crate::cache::{CacheStore, keys, remember};
use crate::domain::catalog::{CatalogEntry, CatalogKind};

#[derive(Debug, Error)]
pub enum SitemapError {
    #[error("failed to read catalog: {0}")]
    Catalog(#[from] RepoError),
    #[error("failed to render sitemap: {0}")]
    Template(#[from] askama::Error),
    #[error("{kind} sitemap has no page {page}")]
    PageOutOfRange { kind: &'static str, page: u32 },
}

/// Pagination and TTL policy for sitemap documents.
#[derive(Debug, Clone)]
pub struct SitemapPolicy {
    pub page_size: u32,
    pub ttl: Duration,
    pub genre_ttl: Duration,
}

impl SitemapPolicy {
    pub fn ttl_for(&self, kind: CatalogKind) -> Duration {
        match kind {
            CatalogKind::Genre => self.genre_ttl,
            _ => self.ttl,
        }
    }
}

impl From<&crate::config::SitemapSettings> for SitemapPolicy {
    fn from(settings: &crate::config::SitemapSettings) -> Self {
        Self {
            page_size: settings.page_size.get(),
            ttl: settings.ttl,
            genre_ttl: settings.genre_ttl,
        }
    }
}

/// Service for generating sitemap documents and robots.txt.
#[derive(Clone)]
pub struct SitemapService {
    catalog: Arc<dyn CatalogRepo>,
    cache: Arc<dyn CacheStore>,
    policy: SitemapPolicy,
    base: String,
}

#[derive(Template)]
#[template(path = "sitemap/urlset.xml")]
struct UrlsetTemplate {
    urls: Vec<UrlView>,
}

#[derive(Template)]
#[template(path = "sitemap/index.xml")]
struct IndexTemplate {
    sitemaps: Vec<SitemapRefView>,
}

struct UrlView {
    loc: String,
    lastmod: String,
    changefreq: &'static str,
    priority: &'static str,
}

struct SitemapRefView {
    loc: String,
    lastmod: String,
}

impl SitemapService {
    pub fn new(
        catalog: Arc<dyn CatalogRepo>,
        cache: Arc<dyn CacheStore>,
        policy: SitemapPolicy,
        public_url: &Url,
    ) -> Self {
        Self {
            catalog,
            cache,
            policy,
            base: normalize_public_site_url(public_url.as_str()),
        }
    }

    /// Sitemap index listing every non-empty page of every kind.
    pub async fn index_xml(&self) -> Result<Bytes, SitemapError> {
        remember(
            self.cache.as_ref(),
            keys::SITEMAP_INDEX,
            self.policy.ttl,
            || self.render_index(),
        )
        .await
    }

    /// One page of the sitemap for `kind`. Pages start at 1.
    ///
    /// Page 1 is always served, even for an empty catalog. Later pages past
    /// the end of the catalog are [`SitemapError::PageOutOfRange`].
    pub async fn page_xml(&self, kind: CatalogKind, page: u32) -> Result<Bytes, SitemapError> {
        if page == 0 {
            return Err(SitemapError::PageOutOfRange {
                kind: kind.as_str(),
                page,
            });
        }

        remember(
            self.cache.as_ref(),
            &keys::sitemap_page(kind, page),
            self.policy.ttl_for(kind),
            || self.render_page(kind, page),
        )
        .await
    }

    async fn render_index(&self) -> Result<Bytes, SitemapError> {
        let started = Instant::now();
        let page_size = u64::from(self.policy.page_size);
        let generated = format_lastmod(Some(OffsetDateTime::now_utc()));
        let mut sitemaps = Vec::new();

        for kind in CatalogKind::ALL {
            let count = self.catalog.count(kind).await?;
            let pages = count.div_ceil(page_size);
            for page in 1..=pages {
                sitemaps.push(SitemapRefView {
                    loc: format!("{}sitemaps/{}-{page}.xml", self.base, kind.as_str()),
                    lastmod: generated.clone(),
                });
            }
        }

        let xml = IndexTemplate { sitemaps }.render()?;
        record_render("index", started);
        Ok(Bytes::from(xml))
    }

    async fn render_page(&self, kind: CatalogKind, page: u32) -> Result<Bytes, SitemapError> {
        let started = Instant::now();
        let offset = u64::from(page - 1) * u64::from(self.policy.page_size);
        let entries = self
            .catalog
            .list(kind, offset, self.policy.page_size)
            .await?;

        if entries.is_empty() && page > 1 {
            return Err(SitemapError::PageOutOfRange {
                kind: kind.as_str(),
                page,
            });
        }

        let urls = entries
            .iter()
            .map(|entry| self.url_view(entry))
            .collect::<Vec<_>>();
        debug!(kind = kind.as_str(), page, urls = urls.len(), "rendering sitemap page");

        let xml = UrlsetTemplate { urls }.render()?;
        record_render(kind.as_str(), started);
        Ok(Bytes::from(xml))
    }

    fn url_view(&self, entry: &CatalogEntry) -> UrlView {
        UrlView {
            loc: canonical_url(&self.base, &entry.path()),
            lastmod: format_lastmod(entry.updated_at),
            changefreq: entry.kind.changefreq(),
            priority: entry.kind.priority(),
        }
    }
}

/// Default robots.txt pointing at the sitemap index.
pub fn default_robots_txt(public_url: &Url) -> String {
    let base = normalize_public_site_url(public_url.as_str());
    format!(
        "User-agent: *\nAllow: /\nDisallow: /admin\nDisallow: /_admin\nSitemap: {base}sitemap.xml\n"
    )
}

fn record_render(document: &'static str, started: Instant) {
    histogram!("reelhouse_sitemap_render_ms", "document" => document)
        .record(started.elapsed().as_secs_f64() * 1000.0);
}

fn format_lastmod(value: Option<OffsetDateTime>) -> String {
    value
        .and_then(|dt| dt.format(&Rfc3339).ok())
        .unwrap_or_default()
}

fn normalize_public_site_url(url: &str) -> String {
    let trimmed = url.trim_end_matches('/');
    format!("{trimmed}/")
}

fn canonical_url(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    if path == "/" {
        base.to_string()
    } else {
        format!("{base}{path}")
    }
}
