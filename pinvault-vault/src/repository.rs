//! Secret records on top of the blob store and the cipher codec.

use crate::error::{VaultError, VaultResult};
use crate::naming::RecordNaming;
use crate::record::SecretRecord;
use crate::snapshot::VaultSnapshot;
use pinvault_blobstore::{BlobStore, BlobStoreError};
use pinvault_crypto::{
    Challenge, CipherCodec, CryptoError, EncryptedBlob, KeyHandle, KeyManager, Zeroizing,
    DEFAULT_KEY_ALIAS,
};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::{debug, info, warn};

type TokioMutex<T> = tokio::sync::Mutex<T>;

/// Stores each [`SecretRecord`] as one encrypted blob and publishes the
/// current record set.
///
/// Readers of [`VaultRepository::subscribe`] only ever see complete
/// snapshots. A refresh enumerates and decrypts without blocking adds and
/// deletes; when it publishes, it replays the adds and deletes that
/// finished while it ran, so it cannot drop a record added meanwhile or
/// bring back one deleted meanwhile.
pub struct VaultRepository {
    keys: Arc<KeyManager>,
    codec: CipherCodec,
    store: Arc<dyn BlobStore>,
    naming: RecordNaming,
    key_alias: String,
    snapshot: watch::Sender<Arc<VaultSnapshot>>,
    /// Serializes the store write or delete of one add or delete with its
    /// snapshot update. Never held across a presence prompt.
    writes: TokioMutex<()>,
    changes: Mutex<ChangeLog>,
}

impl VaultRepository {
    pub fn new(keys: KeyManager, codec: CipherCodec, store: Arc<dyn BlobStore>) -> Self {
        let (snapshot, _) = watch::channel(Arc::new(VaultSnapshot::default()));
        Self {
            keys: Arc::new(keys),
            codec,
            store,
            naming: RecordNaming::default(),
            key_alias: DEFAULT_KEY_ALIAS.to_string(),
            snapshot,
            writes: TokioMutex::new(()),
            changes: Mutex::new(ChangeLog::default()),
        }
    }

    pub fn with_naming(mut self, naming: RecordNaming) -> Self {
        self.naming = naming;
        self
    }

    pub fn with_key_alias(mut self, alias: impl Into<String>) -> Self {
        self.key_alias = alias.into();
        self
    }

    pub fn naming(&self) -> &RecordNaming {
        &self.naming
    }

    /// Looks up or creates the vault key on the blocking pool; key stores
    /// may block on the OS keychain.
    async fn key(&self) -> VaultResult<KeyHandle> {
        let keys = self.keys.clone();
        let alias = self.key_alias.clone();
        let handle = tokio::task::spawn_blocking(move || keys.get_or_create(&alias))
            .await
            .map_err(|e| {
                warn!("key lookup task panicked: {e}");
                VaultError::KeyUnavailable(format!("key lookup task failed: {e}"))
            })??;
        Ok(handle)
    }

    fn changes(&self) -> MutexGuard<'_, ChangeLog> {
        self.changes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Single records ──────────────────────────────────────────────

    /// Encrypts and stores a new record, then adds it to the snapshot.
    pub async fn add_secret(
        &self,
        label: &str,
        value: &str,
        challenge: Option<&dyn Challenge>,
    ) -> VaultResult<SecretRecord> {
        let record = SecretRecord::new(label, value);
        let json = Zeroizing::new(serde_json::to_vec(&record)?);

        let key = self.key().await?;
        let blob = self.codec.encrypt(&json, &key, challenge).await?;

        let _writes = self.writes.lock().await;
        self.store
            .write(&self.naming.name_of(record.id()), &blob.to_bytes())
            .await?;
        {
            let mut changes = self.changes();
            changes.record(Change::Added(record.clone()));
            self.snapshot.send_modify(|current| {
                Arc::make_mut(current).upsert(record.clone());
            });
        }

        info!(id = record.id(), "secret added");
        Ok(record)
    }

    /// Reads and decrypts one record. Every failure is returned.
    pub async fn get_secret(
        &self,
        id: &str,
        challenge: Option<&dyn Challenge>,
    ) -> VaultResult<SecretRecord> {
        let key = self.key().await?;
        let record = self.load(id, &key, challenge).await?;
        debug!(id, "secret read");
        Ok(record)
    }

    /// Removes a record without decrypting it. Returns whether it existed.
    pub async fn delete_secret(&self, id: &str) -> VaultResult<bool> {
        let _writes = self.writes.lock().await;
        let existed = match self.store.delete(&self.naming.name_of(id)).await {
            Ok(existed) => existed,
            Err(BlobStoreError::InvalidName(_)) => false,
            Err(e) => return Err(e.into()),
        };
        {
            let mut changes = self.changes();
            changes.record(Change::Deleted(id.to_string()));
            self.snapshot
                .send_if_modified(|current| Arc::make_mut(current).remove(id));
        }

        if existed {
            info!(id, "secret deleted");
        }
        Ok(existed)
    }

    // ── Listing ─────────────────────────────────────────────────────

    /// Refreshes without a presence challenge and returns the readable
    /// records.
    pub async fn list_secrets(&self) -> VaultResult<Vec<SecretRecord>> {
        Ok(self.refresh().await?.records.clone())
    }

    pub async fn refresh(&self) -> VaultResult<Arc<VaultSnapshot>> {
        self.refresh_with(None).await
    }

    /// Re-reads every record and publishes the result.
    ///
    /// Records that fail to decrypt or parse are left out and reported in
    /// [`VaultSnapshot::unreadable`]. Enumeration failures, key failures and
    /// authentication failures abort the refresh and leave the published
    /// snapshot unchanged.
    pub async fn refresh_with(
        &self,
        challenge: Option<&dyn Challenge>,
    ) -> VaultResult<Arc<VaultSnapshot>> {
        let ticket = RefreshTicket::begin(&self.changes);

        let names = self.store.list().await?;
        let ids: Vec<&str> = names.iter().filter_map(|n| self.naming.id_of(n)).collect();

        let mut records = Vec::with_capacity(ids.len());
        let mut unreadable = Vec::new();
        if !ids.is_empty() {
            let key = self.key().await?;
            for id in ids {
                match self.load(id, &key, challenge).await {
                    Ok(record) => records.push(record),
                    Err(VaultError::NotFound(_)) => {
                        debug!(id, "record vanished during refresh");
                    }
                    Err(VaultError::CorruptRecord(reason)) => {
                        warn!(id, "skipping unreadable record: {reason}");
                        unreadable.push(id.to_string());
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        let mut snapshot = VaultSnapshot::new(records, unreadable);
        let snapshot = {
            let changes = self.changes();
            let replayed = changes.apply_since(ticket.started, &mut snapshot);
            if replayed > 0 {
                debug!(replayed, "replayed changes made during refresh");
            }
            let snapshot = Arc::new(snapshot);
            self.snapshot.send_replace(snapshot.clone());
            snapshot
        };
        info!(
            records = snapshot.len(),
            unreadable = snapshot.unreadable.len(),
            "vault refreshed"
        );
        Ok(snapshot)
    }

    // ── Observation ─────────────────────────────────────────────────

    /// A receiver holding the latest snapshot and notified on every publish.
    pub fn subscribe(&self) -> watch::Receiver<Arc<VaultSnapshot>> {
        self.snapshot.subscribe()
    }

    pub fn snapshot(&self) -> Arc<VaultSnapshot> {
        self.snapshot.borrow().clone()
    }

    async fn load(
        &self,
        id: &str,
        key: &KeyHandle,
        challenge: Option<&dyn Challenge>,
    ) -> VaultResult<SecretRecord> {
        let bytes = self.store.read(&self.naming.name_of(id)).await?;
        let blob = EncryptedBlob::from_bytes(&bytes)?;
        let plaintext = self.codec.decrypt(&blob, key, challenge).await?;
        let record: SecretRecord = serde_json::from_slice(&plaintext)?;

        if record.id() != id {
            return Err(CryptoError::CorruptRecord(format!(
                "blob for {id} holds record {}",
                record.id()
            ))
            .into());
        }
        Ok(record)
    }
}

enum Change {
    Added(SecretRecord),
    Deleted(String),
}

/// Adds and deletes that completed while at least one refresh was running.
#[derive(Default)]
struct ChangeLog {
    seq: u64,
    entries: Vec<(u64, Change)>,
    /// Sequence number each running refresh started at.
    running: Vec<u64>,
}

impl ChangeLog {
    fn record(&mut self, change: Change) {
        if self.running.is_empty() {
            return;
        }
        self.seq += 1;
        self.entries.push((self.seq, change));
    }

    /// Replays every change newer than `started` onto `snapshot`.
    fn apply_since(&self, started: u64, snapshot: &mut VaultSnapshot) -> usize {
        let mut replayed = 0;
        for (_, change) in self.entries.iter().filter(|(seq, _)| *seq > started) {
            match change {
                Change::Added(record) => snapshot.upsert(record.clone()),
                Change::Deleted(id) => {
                    snapshot.remove(id);
                }
            }
            replayed += 1;
        }
        replayed
    }

    fn finish(&mut self, started: u64) {
        if let Some(at) = self.running.iter().position(|s| *s == started) {
            self.running.swap_remove(at);
        }
        match self.running.iter().min() {
            Some(&oldest) => self.entries.retain(|(seq, _)| *seq > oldest),
            None => self.entries.clear(),
        }
    }
}

/// Registers a running refresh and unregisters it on every exit path,
/// including a dropped future.
struct RefreshTicket<'a> {
    log: &'a Mutex<ChangeLog>,
    started: u64,
}

impl<'a> RefreshTicket<'a> {
    fn begin(log: &'a Mutex<ChangeLog>) -> Self {
        let mut changes = log.lock().unwrap_or_else(PoisonError::into_inner);
        let started = changes.seq;
        changes.running.push(started);
        Self { log, started }
    }
}

impl Drop for RefreshTicket<'_> {
    fn drop(&mut self) {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .finish(self.started);
    }
}
