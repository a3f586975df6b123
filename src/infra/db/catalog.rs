use async_trait::async_trait;
use sqlx::{FromRow, query_as, query_scalar};
use time::PrimitiveDateTime;

use crate::application::repos::{CatalogRepo, RepoError};
use crate::domain::catalog::{CatalogEntry, CatalogKind, PostType};

use super::{PostgresCatalog, map_sqlx_error};

// Timestamps are naive UTC columns written by the CMS.
#[derive(Debug, FromRow)]
struct CatalogRow {
    slug: String,
    post_type: Option<String>,
    updated_at: Option<PrimitiveDateTime>,
}

impl CatalogRow {
    fn into_entry(self, kind: CatalogKind) -> CatalogEntry {
        CatalogEntry {
            kind,
            slug: self.slug,
            post_type: self.post_type.as_deref().map(PostType::from_column),
            updated_at: self.updated_at.map(PrimitiveDateTime::assume_utc),
        }
    }
}

fn count_sql(kind: CatalogKind) -> &'static str {
    match kind {
        CatalogKind::Post => "SELECT COUNT(*) FROM posts WHERE status = 'publish'",
        CatalogKind::Episode => "SELECT COUNT(*) FROM episodes",
        CatalogKind::Genre => "SELECT COUNT(*) FROM genres",
        CatalogKind::People => "SELECT COUNT(*) FROM peoples",
    }
}

fn list_sql(kind: CatalogKind) -> &'static str {
    match kind {
        CatalogKind::Post => {
            "SELECT slug, type AS post_type, updated_at FROM posts \
             WHERE status = 'publish' ORDER BY id LIMIT $1 OFFSET $2"
        }
        CatalogKind::Episode => {
            "SELECT slug, NULL::text AS post_type, updated_at FROM episodes \
             ORDER BY id LIMIT $1 OFFSET $2"
        }
        CatalogKind::Genre => {
            "SELECT slug, NULL::text AS post_type, updated_at FROM genres \
             ORDER BY id LIMIT $1 OFFSET $2"
        }
        CatalogKind::People => {
            "SELECT slug, NULL::text AS post_type, updated_at FROM peoples \
             ORDER BY id LIMIT $1 OFFSET $2"
        }
    }
}

#[async_trait]
impl CatalogRepo for PostgresCatalog {
    async fn count(&self, kind: CatalogKind) -> Result<u64, RepoError> {
        let count: i64 = query_scalar(count_sql(kind))
            .fetch_one(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    async fn list(
        &self,
        kind: CatalogKind,
        offset: u64,
        limit: u32,
    ) -> Result<Vec<CatalogEntry>, RepoError> {
        let offset = i64::try_from(offset)
            .map_err(|_| RepoError::from_persistence("sitemap offset out of range"))?;

        let rows: Vec<CatalogRow> = query_as(list_sql(kind))
            .bind(i64::from(limit))
            .bind(offset)
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(|row| row.into_entry(kind)).collect())
    }
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;

    #[test]
    fn rows_convert_to_entries() {
        let row = CatalogRow {
            slug: "breaking-bad".to_string(),
            post_type: Some("tv".to_string()),
            updated_at: Some(datetime!(2024-02-03 04:05:06)),
        };

        let entry = row.into_entry(CatalogKind::Post);
        assert_eq!(entry.path(), "/tv-show/breaking-bad");
        assert_eq!(entry.updated_at, Some(datetime!(2024-02-03 04:05:06 UTC)));
    }

    #[test]
    fn every_list_query_is_paginated() {
        for kind in CatalogKind::ALL {
            let sql = list_sql(kind);
            assert!(sql.contains("LIMIT $1 OFFSET $2"), "{kind} query");
            assert!(sql.contains("ORDER BY id"), "{kind} query");
        }
    }

    #[test]
    fn only_posts_filter_on_publish_status() {
        for kind in CatalogKind::ALL {
            let filtered = kind == CatalogKind::Post;
            assert_eq!(count_sql(kind).contains("status = 'publish'"), filtered, "{kind} count");
            assert_eq!(list_sql(kind).contains("status = 'publish'"), filtered, "{kind} list");
        }
    }
}
