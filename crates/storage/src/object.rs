//! The in-memory object store.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use std::sync::Arc;

use animus_api::object_store::{ObjectStore, ObjectStoreError};

/// Keyed byte map with the interface an S3-style backend would implement.
#[derive(Debug, Clone, Default)]
pub struct MemObjectStore {
    objects: Arc<DashMap<String, (Bytes, String)>>,
}

impl MemObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects; used by compensation tests.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[async_trait]
impl ObjectStore for MemObjectStore {
    async fn put_object(
        &self,
        key: &str,
        bytes: Bytes,
        content_type: &str,
    ) -> Result<(), ObjectStoreError> {
        self.objects
            .insert(key.to_string(), (bytes, content_type.to_string()));
        Ok(())
    }

    async fn get_object(&self, key: &str) -> Result<Bytes, ObjectStoreError> {
        self.objects
            .get(key)
            .map(|entry| entry.0.clone())
            .ok_or_else(|| ObjectStoreError::NotFound(key.to_string()))
    }

    async fn delete_object(&self, key: &str) -> Result<(), ObjectStoreError> {
        self.objects.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_get_delete_roundtrip() {
        let store = MemObjectStore::new();
        store
            .put_object("runs/r1/bundle.zip", Bytes::from_static(b"zip"), "application/zip")
            .await
            .unwrap();
        assert_eq!(store.get_object("runs/r1/bundle.zip").await.unwrap(), "zip");

        store.delete_object("runs/r1/bundle.zip").await.unwrap();
        assert!(matches!(
            store.get_object("runs/r1/bundle.zip").await,
            Err(ObjectStoreError::NotFound(_))
        ));
        // deleting a missing key is not an error
        store.delete_object("runs/r1/bundle.zip").await.unwrap();
    }
}
