//! Directory-backed blob store.

use crate::error::{BlobStoreError, BlobStoreResult};
use crate::{validate_name, BlobStore};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::OnceCell;
use tracing::{debug, warn};
use uuid::Uuid;

/// One file per blob under a single directory.
///
/// The directory is created on first write. Writes go to a hidden
/// `.tmp-<uuid>` file that is synced and then renamed over the target.
#[derive(Debug)]
pub struct FsBlobStore {
    root: PathBuf,
    created: OnceCell<()>,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            created: OnceCell::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_of(&self, name: &str) -> BlobStoreResult<PathBuf> {
        validate_name(name)?;
        Ok(self.root.join(name))
    }

    async fn ensure_root(&self) -> BlobStoreResult<()> {
        self.created
            .get_or_try_init(|| async {
                fs::create_dir_all(&self.root).await.map_err(|e| {
                    BlobStoreError::io(format!("create {}", self.root.display()), e)
                })?;
                restrict_permissions(&self.root).await;
                debug!(root = %self.root.display(), "blob directory ready");
                Ok::<(), BlobStoreError>(())
            })
            .await
            .map(|_| ())
    }
}

#[cfg(unix)]
async fn restrict_permissions(dir: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(e) = fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700)).await {
        warn!(root = %dir.display(), "could not restrict blob directory permissions: {e}");
    }
}

#[cfg(not(unix))]
async fn restrict_permissions(_dir: &Path) {}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn write(&self, name: &str, bytes: &[u8]) -> BlobStoreResult<()> {
        let target = self.path_of(name)?;
        self.ensure_root().await?;

        let temp = self.root.join(format!(".tmp-{}", Uuid::new_v4()));
        let written = async {
            let mut file = fs::OpenOptions::new()
                .create_new(true)
                .write(true)
                .open(&temp)
                .await?;
            file.write_all(bytes).await?;
            file.sync_all().await?;
            drop(file);
            fs::rename(&temp, &target).await
        }
        .await;

        if let Err(e) = written {
            if let Err(cleanup) = fs::remove_file(&temp).await {
                if cleanup.kind() != ErrorKind::NotFound {
                    warn!(temp = %temp.display(), "failed to remove temporary blob: {cleanup}");
                }
            }
            return Err(BlobStoreError::io(format!("write {}", target.display()), e));
        }

        debug!(blob = name, size = bytes.len(), "blob written");
        Ok(())
    }

    async fn read(&self, name: &str) -> BlobStoreResult<Vec<u8>> {
        let path = self.path_of(name)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(BlobStoreError::NotFound(name.to_string()))
            }
            Err(e) => Err(BlobStoreError::io(format!("read {}", path.display()), e)),
        }
    }

    async fn delete(&self, name: &str) -> BlobStoreResult<bool> {
        let path = self.path_of(name)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!(blob = name, "blob deleted");
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(BlobStoreError::io(format!("delete {}", path.display()), e)),
        }
    }

    async fn list(&self) -> BlobStoreResult<BTreeSet<String>> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(BTreeSet::new()),
            Err(e) => {
                return Err(BlobStoreError::io(format!("list {}", self.root.display()), e));
            }
        };

        let mut names = BTreeSet::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| BlobStoreError::io(format!("list {}", self.root.display()), e))?
        {
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            match entry.file_type().await {
                Ok(kind) if kind.is_file() => {
                    names.insert(name);
                }
                Ok(_) => {}
                Err(e) => warn!(entry = name, "skipping unreadable directory entry: {e}"),
            }
        }
        Ok(names)
    }
}
