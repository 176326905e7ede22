//! Collaborators the application layer consumes but does not implement.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use time::OffsetDateTime;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidationError {
    #[error("invalidation request failed: {0}")]
    Transport(String),
    #[error("invalidation rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("invalidation unavailable: {0}")]
    Unavailable(String),
}

/// Marks a previously rendered page path stale.
#[async_trait]
pub trait CacheInvalidator: Send + Sync {
    async fn invalidate(&self, path: &str) -> Result<(), InvalidationError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContentStoreError {
    #[error("content store request failed: {0}")]
    Transport(String),
    #[error("content store returned status {status}")]
    Status { status: u16 },
    #[error("content store returned an unexpected payload: {0}")]
    Decode(String),
}

/// Read-only view of the external document store.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Timestamp of the most recently modified document, if any exist.
    async fn latest_modification(&self) -> Result<Option<OffsetDateTime>, ContentStoreError>;

    /// Documents modified strictly after `since`.
    async fn changed_since(&self, since: OffsetDateTime) -> Result<Vec<Value>, ContentStoreError>;
}
