//! The content-addressed blob store port.
//!
//! Objects are written before the referencing DB row commits; on DB failure
//! the writer compensates with a best-effort delete. Orphan blobs are
//! tolerated, rows pointing at missing blobs are not.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("object store backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put_object(
        &self,
        key: &str,
        bytes: Bytes,
        content_type: &str,
    ) -> Result<(), ObjectStoreError>;

    async fn get_object(&self, key: &str) -> Result<Bytes, ObjectStoreError>;

    /// Used only for compensation; deleting a missing key is not an error.
    async fn delete_object(&self, key: &str) -> Result<(), ObjectStoreError>;
}
