//! Repository traits describing persistence adapters.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::catalog::{CatalogEntry, CatalogKind};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("database timeout")]
    Timeout,
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }
}

/// Read access to the publicly listed catalog.
#[async_trait]
pub trait CatalogRepo: Send + Sync {
    /// Number of publicly listed rows of `kind`.
    async fn count(&self, kind: CatalogKind) -> Result<u64, RepoError>;

    /// Rows of `kind` in stable order, skipping `offset` and returning at most `limit`.
    async fn list(
        &self,
        kind: CatalogKind,
        offset: u64,
        limit: u32,
    ) -> Result<Vec<CatalogEntry>, RepoError>;
}
