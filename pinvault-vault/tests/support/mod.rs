//! Shared fixtures for vault integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use pinvault_blobstore::{BlobStore, BlobStoreResult, FsBlobStore, MemoryBlobStore};
use pinvault_crypto::{
    CipherCodec, CryptoError, CryptoResult, KeyManager, KeyMaterialStore, KeyPolicy,
    SoftwareKeyStore, StoredKey,
};
use pinvault_vault::VaultRepository;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Notify;
use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

pub struct Fixture {
    pub dir: TempDir,
    pub key_store: Arc<SoftwareKeyStore>,
    pub repo: Arc<VaultRepository>,
}

impl Fixture {
    pub fn records_dir(&self) -> PathBuf {
        self.dir.path().join("encrypted_files")
    }

    pub fn blob_path(&self, id: &str) -> PathBuf {
        self.records_dir().join(format!("pin_{id}.json"))
    }
}

/// A repository over a fresh temp directory and an in-memory key store.
pub fn fixture(policy: KeyPolicy) -> Fixture {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let key_store = Arc::new(SoftwareKeyStore::in_memory());
    let repo = VaultRepository::new(
        KeyManager::new(key_store.clone(), policy),
        CipherCodec::new(key_store.clone()),
        Arc::new(FsBlobStore::new(dir.path().join("encrypted_files"))),
    );
    Fixture {
        dir,
        key_store,
        repo: Arc::new(repo),
    }
}

/// A repository over `store` with its own in-memory key store.
pub fn repository_over(store: Arc<dyn BlobStore>, policy: KeyPolicy) -> Arc<VaultRepository> {
    init_tracing();
    let key_store = Arc::new(SoftwareKeyStore::in_memory());
    Arc::new(VaultRepository::new(
        KeyManager::new(key_store.clone(), policy),
        CipherCodec::new(key_store),
        store,
    ))
}

/// In-memory store whose next `list` can be held open after it has read
/// the names.
#[derive(Default)]
pub struct PausingStore {
    inner: MemoryBlobStore,
    pause_next_list: AtomicBool,
    listed: Notify,
    resume: Notify,
}

impl PausingStore {
    pub fn pause_next_list(&self) {
        self.pause_next_list.store(true, Ordering::SeqCst);
    }

    /// Waits until a paused `list` has read the names.
    pub async fn listed(&self) {
        self.listed.notified().await;
    }

    pub fn resume(&self) {
        self.resume.notify_one();
    }
}

#[async_trait]
impl BlobStore for PausingStore {
    async fn write(&self, name: &str, bytes: &[u8]) -> BlobStoreResult<()> {
        self.inner.write(name, bytes).await
    }

    async fn read(&self, name: &str) -> BlobStoreResult<Vec<u8>> {
        self.inner.read(name).await
    }

    async fn delete(&self, name: &str) -> BlobStoreResult<bool> {
        self.inner.delete(name).await
    }

    async fn list(&self) -> BlobStoreResult<BTreeSet<String>> {
        let names = self.inner.list().await?;
        if self.pause_next_list.swap(false, Ordering::SeqCst) {
            self.listed.notify_one();
            self.resume.notified().await;
        }
        Ok(names)
    }
}

/// Key material store whose first `load` blocks its thread until signalled.
pub struct SignalledMaterialStore {
    signal: Mutex<Option<mpsc::Receiver<()>>>,
}

impl SignalledMaterialStore {
    pub fn new() -> (Self, mpsc::Sender<()>) {
        let (tx, rx) = mpsc::channel();
        let store = Self {
            signal: Mutex::new(Some(rx)),
        };
        (store, tx)
    }
}

impl KeyMaterialStore for SignalledMaterialStore {
    fn load(&self, _alias: &str) -> CryptoResult<Option<StoredKey>> {
        if let Some(signal) = self.signal.lock().unwrap().take() {
            signal.recv_timeout(Duration::from_secs(5)).map_err(|_| {
                CryptoError::KeyUnavailable("key load blocked the runtime thread".into())
            })?;
        }
        Ok(None)
    }

    fn save(&self, _alias: &str, _key: &StoredKey) -> CryptoResult<()> {
        Ok(())
    }
}
