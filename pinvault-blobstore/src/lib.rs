//! Named opaque blob storage.
//!
//! A [`BlobStore`] maps flat names to byte strings. It never interprets the
//! bytes; PinVault stores one encrypted record per blob.
//!
//! Two implementations are provided:
//! - [`FsBlobStore`]: one file per blob inside a private directory, written
//!   through a hidden temporary file and an atomic rename.
//! - [`MemoryBlobStore`]: an in-process map, for tests and ephemeral vaults.

mod error;
mod fs;
mod memory;

pub use error::{BlobStoreError, BlobStoreResult};
pub use fs::FsBlobStore;
pub use memory::MemoryBlobStore;

use async_trait::async_trait;
use std::collections::BTreeSet;

/// Storage for named blobs.
///
/// Names are single path components: non-empty, no separators and no
/// leading `.` (reserved for temporary files).
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Creates or replaces the blob. Readers see either the old or the new
    /// contents, never a partial write.
    async fn write(&self, name: &str, bytes: &[u8]) -> BlobStoreResult<()>;

    async fn read(&self, name: &str) -> BlobStoreResult<Vec<u8>>;

    /// Removes the blob. Returns whether it existed.
    async fn delete(&self, name: &str) -> BlobStoreResult<bool>;

    async fn list(&self) -> BlobStoreResult<BTreeSet<String>>;
}

/// Rejects names that could escape the store or collide with temp files.
pub fn validate_name(name: &str) -> BlobStoreResult<()> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && !name.contains(['/', '\\', '\0']);
    if valid {
        Ok(())
    } else {
        Err(BlobStoreError::InvalidName(name.to_string()))
    }
}
