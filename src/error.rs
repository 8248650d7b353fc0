use crate::model::SiteId;
use std::time::Duration;
use thiserror::Error;

/// Failures reported by a content store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("content store query timed out after {0:?}")]
    Timeout(Duration),

    /// Transient failure (connection dropped, pool exhausted); worth retrying
    #[error("content store unavailable: {0}")]
    Unavailable(String),

    #[error("content store query failed: {0}")]
    Query(String),
}

impl StoreError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => StoreError::Unavailable(err.to_string()),
            other => StoreError::Query(other.to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("site {0} is not registered or is excluded")]
    UnknownSite(SiteId),

    #[error("page {page_id} belongs to site {page_site}, not site {site}")]
    WrongSite {
        page_id: u64,
        page_site: SiteId,
        site: SiteId,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("cache write failed for site {site}: {reason}")]
    CacheWrite { site: SiteId, reason: String },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
