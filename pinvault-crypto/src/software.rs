//! Software key store and presence verifier.
//!
//! Portable stand-ins for the platform key store and biometric prompt, used
//! on targets without a hardware key store and in tests. They enforce the
//! same contract as the hardware path: presence grants are bound to one
//! cipher context id, expire after the key's validity window and are spent
//! by the re-initialization they authorize.

use crate::auth::{AuthenticationResult, PresenceVerifier, PromptInfo, MECHANISM_UNAVAILABLE_REASON};
use crate::blob::IV_SIZE;
use crate::context::{CipherContext, CipherMode};
use crate::error::{CryptoError, CryptoResult};
use crate::key::{BackingKind, InitOutcome, KeyAlgorithm, KeyHandle, KeyPolicy, KeyStoreProvider};
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use async_trait::async_trait;
use rand::RngCore;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;
use tracing::{debug, warn};
use zeroize::Zeroizing;

/// AES-256 key length in bytes.
pub const KEY_SIZE: usize = 32;

/// Key material plus the metadata needed to rebuild its handle.
pub struct StoredKey {
    pub material: Zeroizing<[u8; KEY_SIZE]>,
    pub policy: KeyPolicy,
    pub backing: BackingKind,
}

/// Durable home for software key material.
pub trait KeyMaterialStore: Send + Sync {
    fn load(&self, alias: &str) -> CryptoResult<Option<StoredKey>>;
    fn save(&self, alias: &str, key: &StoredKey) -> CryptoResult<()>;
}

struct SoftwareKey {
    material: Zeroizing<[u8; KEY_SIZE]>,
    handle: KeyHandle,
}

#[derive(Default)]
struct PresenceLedger {
    /// Context id -> when presence was confirmed for it.
    grants: HashMap<u64, Instant>,
    /// Presence-gated contexts that passed init and may finalize once.
    armed: HashSet<u64>,
}

impl PresenceLedger {
    fn take_grant(&mut self, context_id: u64, key: &KeyHandle) -> bool {
        let Some(granted_at) = self.grants.remove(&context_id) else {
            return false;
        };
        let window = key.presence_validity();
        window.is_zero() || granted_at.elapsed() <= window
    }
}

/// In-process key store with optional persistence.
pub struct SoftwareKeyStore {
    keys: RwLock<HashMap<String, Arc<SoftwareKey>>>,
    ledger: Arc<Mutex<PresenceLedger>>,
    persistence: Option<Box<dyn KeyMaterialStore>>,
    device_locked: AtomicBool,
}

impl SoftwareKeyStore {
    /// Keys live for the lifetime of this value only.
    pub fn in_memory() -> Self {
        Self {
            keys: RwLock::new(HashMap::new()),
            ledger: Arc::new(Mutex::new(PresenceLedger::default())),
            persistence: None,
            device_locked: AtomicBool::new(false),
        }
    }

    /// Keys are loaded from and saved to `persistence`.
    pub fn with_persistence(persistence: Box<dyn KeyMaterialStore>) -> Self {
        Self {
            persistence: Some(persistence),
            ..Self::in_memory()
        }
    }

    /// Simulates the device lock state for keys requiring an unlocked device.
    pub fn set_device_locked(&self, locked: bool) {
        self.device_locked.store(locked, Ordering::SeqCst);
    }

    /// A verifier whose approvals authorize contexts in this store.
    pub fn presence_verifier(&self, decision: PresenceDecision) -> SoftwarePresenceVerifier {
        SoftwarePresenceVerifier {
            ledger: self.ledger.clone(),
            decision: Mutex::new(decision),
            prompts: AtomicUsize::new(0),
            dismissals: AtomicUsize::new(0),
        }
    }

    fn lookup(&self, alias: &str) -> CryptoResult<Option<Arc<SoftwareKey>>> {
        {
            let keys = self.keys.read().map_err(|e| lock_err("key table", e))?;
            if let Some(key) = keys.get(alias) {
                return Ok(Some(key.clone()));
            }
        }

        let Some(persistence) = &self.persistence else {
            return Ok(None);
        };
        let Some(stored) = persistence.load(alias)? else {
            return Ok(None);
        };

        let key = Arc::new(SoftwareKey {
            material: stored.material.clone(),
            handle: KeyHandle::new(alias, stored.policy.clone(), stored.backing),
        });
        let mut keys = self.keys.write().map_err(|e| lock_err("key table", e))?;
        let key = keys.entry(alias.to_string()).or_insert(key).clone();
        debug!(alias, "loaded persisted key");
        Ok(Some(key))
    }

    fn require(&self, key: &KeyHandle) -> CryptoResult<Arc<SoftwareKey>> {
        self.lookup(key.alias())?.ok_or_else(|| {
            CryptoError::KeyUnavailable(format!("no key under alias {}", key.alias()))
        })
    }

    /// Presence grants and armed contexts not yet spent or released.
    pub fn pending_grants(&self) -> usize {
        self.ledger
            .lock()
            .map(|ledger| ledger.grants.len() + ledger.armed.len())
            .unwrap_or(0)
    }

    fn ledger(&self) -> CryptoResult<std::sync::MutexGuard<'_, PresenceLedger>> {
        self.ledger.lock().map_err(|e| lock_err("presence ledger", e))
    }
}

impl Default for SoftwareKeyStore {
    fn default() -> Self {
        Self::in_memory()
    }
}

fn lock_err(what: &str, e: impl std::fmt::Display) -> CryptoError {
    CryptoError::KeyUnavailable(format!("{what} lock poisoned: {e}"))
}

fn validate_policy(policy: &KeyPolicy) -> CryptoResult<()> {
    if policy.algorithm != KeyAlgorithm::AesGcm {
        return Err(CryptoError::KeyUnavailable(format!(
            "unsupported algorithm {:?}",
            policy.algorithm
        )));
    }
    if usize::from(policy.key_size_bits) != KEY_SIZE * 8 {
        return Err(CryptoError::KeyUnavailable(format!(
            "unsupported key size {} bits",
            policy.key_size_bits
        )));
    }
    if !policy.randomized_encryption_required {
        return Err(CryptoError::KeyUnavailable(
            "randomized encryption cannot be disabled".into(),
        ));
    }
    Ok(())
}

impl KeyStoreProvider for SoftwareKeyStore {
    fn supports(&self, backing: BackingKind) -> bool {
        backing == BackingKind::Software
    }

    fn key(&self, alias: &str) -> CryptoResult<Option<KeyHandle>> {
        Ok(self.lookup(alias)?.map(|k| k.handle.clone()))
    }

    fn generate(
        &self,
        alias: &str,
        policy: &KeyPolicy,
        backing: BackingKind,
    ) -> CryptoResult<KeyHandle> {
        if !self.supports(backing) {
            return Err(CryptoError::KeyUnavailable(format!(
                "{backing:?} backing is not available"
            )));
        }
        validate_policy(policy)?;
        if self.lookup(alias)?.is_some() {
            return Err(CryptoError::KeyUnavailable(format!(
                "a key already exists under alias {alias}"
            )));
        }

        let mut material = Zeroizing::new([0u8; KEY_SIZE]);
        rand::rng().fill_bytes(&mut material[..]);
        let handle = KeyHandle::new(alias, policy.clone(), backing);

        if let Some(persistence) = &self.persistence {
            persistence.save(
                alias,
                &StoredKey {
                    material: material.clone(),
                    policy: policy.clone(),
                    backing,
                },
            )?;
        }

        let mut keys = self.keys.write().map_err(|e| lock_err("key table", e))?;
        keys.insert(
            alias.to_string(),
            Arc::new(SoftwareKey {
                material,
                handle: handle.clone(),
            }),
        );
        Ok(handle)
    }

    fn init(&self, key: &KeyHandle, context: &CipherContext) -> CryptoResult<InitOutcome> {
        let stored = self.require(key)?;
        if context.alias() != key.alias() {
            return Err(CryptoError::KeyUnavailable(format!(
                "context {} belongs to alias {}, not {}",
                context.id(),
                context.alias(),
                key.alias()
            )));
        }

        let policy = stored.handle.policy();
        if policy.unlocked_device_required && self.device_locked.load(Ordering::SeqCst) {
            return Err(CryptoError::KeyUnavailable("device is locked".into()));
        }

        if policy.requires_user_presence {
            let mut ledger = self.ledger()?;
            if !ledger.take_grant(context.id(), &stored.handle) {
                return Ok(InitOutcome::NeedsUserPresence);
            }
            ledger.armed.insert(context.id());
        }

        let iv = match context.mode() {
            CipherMode::Encrypt => {
                let mut iv = [0u8; IV_SIZE];
                rand::rng().fill_bytes(&mut iv);
                iv
            }
            CipherMode::Decrypt => *context.iv().ok_or_else(|| {
                CryptoError::CorruptRecord("decryption context has no IV".into())
            })?,
        };
        Ok(InitOutcome::Ready { iv })
    }

    fn finalize(
        &self,
        key: &KeyHandle,
        context: &CipherContext,
        input: &[u8],
    ) -> CryptoResult<Vec<u8>> {
        let stored = self.require(key)?;
        if !context.state().is_ready() {
            return Err(CryptoError::KeyUnavailable(format!(
                "cipher context {} is not initialized",
                context.id()
            )));
        }
        if stored.handle.requires_user_presence() && !self.ledger()?.armed.remove(&context.id()) {
            warn!(context = context.id(), "finalize attempted without a presence grant");
            return Err(CryptoError::AuthenticationRequired);
        }

        let iv = context
            .iv()
            .ok_or_else(|| CryptoError::KeyUnavailable("cipher context has no IV".into()))?;
        let cipher = Aes256Gcm::new_from_slice(&stored.material[..])
            .map_err(|e| CryptoError::KeyUnavailable(format!("invalid key material: {e}")))?;
        let nonce = Nonce::from_slice(iv);

        match context.mode() {
            CipherMode::Encrypt => cipher
                .encrypt(nonce, input)
                .map_err(|e| CryptoError::KeyUnavailable(format!("encryption failed: {e}"))),
            CipherMode::Decrypt => cipher.decrypt(nonce, input).map_err(|_| {
                CryptoError::CorruptRecord("authentication tag mismatch".into())
            }),
        }
    }

    fn release(&self, context_id: u64) {
        match self.ledger.lock() {
            Ok(mut ledger) => {
                let granted = ledger.grants.remove(&context_id).is_some();
                let armed = ledger.armed.remove(&context_id);
                if granted || armed {
                    debug!(context = context_id, "released unspent presence grant");
                }
            }
            Err(e) => warn!(context = context_id, "presence ledger unavailable: {e}"),
        }
    }
}

/// Scripted answer of a [`SoftwarePresenceVerifier`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PresenceDecision {
    /// Confirm presence for the prompted context.
    Approve,
    /// Reject with the given reason.
    Deny(String),
    /// Report that no mechanism is enrolled.
    Unavailable,
    /// Never answer; the prompt stays up until dismissed.
    Hold,
}

/// Presence verifier paired with a [`SoftwareKeyStore`].
pub struct SoftwarePresenceVerifier {
    ledger: Arc<Mutex<PresenceLedger>>,
    decision: Mutex<PresenceDecision>,
    prompts: AtomicUsize,
    dismissals: AtomicUsize,
}

impl SoftwarePresenceVerifier {
    pub fn set_decision(&self, decision: PresenceDecision) {
        if let Ok(mut current) = self.decision.lock() {
            *current = decision;
        }
    }

    /// Number of prompts shown so far.
    pub fn prompts(&self) -> usize {
        self.prompts.load(Ordering::SeqCst)
    }

    /// Number of prompts torn down before they settled.
    pub fn dismissals(&self) -> usize {
        self.dismissals.load(Ordering::SeqCst)
    }

    fn grant(&self, context: &CipherContext) -> AuthenticationResult {
        match self.ledger.lock() {
            Ok(mut ledger) => {
                ledger.grants.insert(context.id(), Instant::now());
                AuthenticationResult::Success
            }
            Err(e) => AuthenticationResult::Fail(format!("presence ledger unavailable: {e}")),
        }
    }

    fn decision(&self) -> PresenceDecision {
        self.decision
            .lock()
            .map(|d| d.clone())
            .unwrap_or(PresenceDecision::Unavailable)
    }
}

#[async_trait]
impl PresenceVerifier for SoftwarePresenceVerifier {
    fn is_available(&self) -> bool {
        self.decision() != PresenceDecision::Unavailable
    }

    async fn prompt(&self, context: &CipherContext, _info: &PromptInfo) -> AuthenticationResult {
        self.prompts.fetch_add(1, Ordering::SeqCst);
        match self.decision() {
            PresenceDecision::Approve => self.grant(context),
            PresenceDecision::Deny(reason) => AuthenticationResult::Fail(reason),
            PresenceDecision::Unavailable => {
                AuthenticationResult::Fail(MECHANISM_UNAVAILABLE_REASON.to_string())
            }
            PresenceDecision::Hold => std::future::pending().await,
        }
    }

    fn dismiss(&self) {
        self.dismissals.fetch_add(1, Ordering::SeqCst);
    }
}
