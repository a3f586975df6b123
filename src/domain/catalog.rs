//! Catalog entities exposed through sitemaps.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;

/// Entity families that get their own sitemap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CatalogKind {
    Post,
    Genre,
    Episode,
    People,
}

impl CatalogKind {
    pub const ALL: [CatalogKind; 4] = [
        CatalogKind::Post,
        CatalogKind::Episode,
        CatalogKind::Genre,
        CatalogKind::People,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CatalogKind::Post => "post",
            CatalogKind::Genre => "genre",
            CatalogKind::Episode => "episode",
            CatalogKind::People => "people",
        }
    }

    pub fn changefreq(self) -> &'static str {
        match self {
            CatalogKind::Post => "daily",
            CatalogKind::Episode | CatalogKind::Genre => "weekly",
            CatalogKind::People => "monthly",
        }
    }

    pub fn priority(self) -> &'static str {
        match self {
            CatalogKind::Post => "0.8",
            CatalogKind::Episode => "0.7",
            CatalogKind::Genre => "0.6",
            CatalogKind::People => "0.5",
        }
    }
}

impl fmt::Display for CatalogKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown catalog kind `{0}`")]
pub struct UnknownKind(pub String);

impl FromStr for CatalogKind {
    type Err = UnknownKind;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "post" => Ok(CatalogKind::Post),
            "genre" => Ok(CatalogKind::Genre),
            "episode" => Ok(CatalogKind::Episode),
            "people" => Ok(CatalogKind::People),
            other => Err(UnknownKind(other.to_string())),
        }
    }
}

/// Whether a post is a film or a series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostType {
    Movie,
    Tv,
}

impl PostType {
    /// Parse the `posts.type` column; anything unrecognised is treated as a movie.
    pub fn from_column(value: &str) -> Self {
        match value {
            "tv" | "tv_show" | "series" => PostType::Tv,
            _ => PostType::Movie,
        }
    }
}

/// A row listed in a sitemap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub kind: CatalogKind,
    pub slug: String,
    pub post_type: Option<PostType>,
    pub updated_at: Option<OffsetDateTime>,
}

impl CatalogEntry {
    /// Public path of the entry's page.
    pub fn path(&self) -> String {
        let prefix = match (self.kind, self.post_type) {
            (CatalogKind::Post, Some(PostType::Tv)) => "tv-show",
            (CatalogKind::Post, _) => "movie",
            (CatalogKind::Episode, _) => "episode",
            (CatalogKind::Genre, _) => "genre",
            (CatalogKind::People, _) => "people",
        };
        format!("/{prefix}/{}", self.slug)
    }
}
