use crate::error::{BlobStoreError, BlobStoreResult};
use crate::{validate_name, BlobStore};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use tokio::sync::RwLock;

/// Blob store kept entirely in memory.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn write(&self, name: &str, bytes: &[u8]) -> BlobStoreResult<()> {
        validate_name(name)?;
        self.blobs.write().await.insert(name.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn read(&self, name: &str) -> BlobStoreResult<Vec<u8>> {
        validate_name(name)?;
        self.blobs
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| BlobStoreError::NotFound(name.to_string()))
    }

    async fn delete(&self, name: &str) -> BlobStoreResult<bool> {
        validate_name(name)?;
        Ok(self.blobs.write().await.remove(name).is_some())
    }

    async fn list(&self) -> BlobStoreResult<BTreeSet<String>> {
        Ok(self.blobs.read().await.keys().cloned().collect())
    }
}
