//! Key handles, key policies and the key-store seam.
//!
//! Key material never crosses the [`KeyStoreProvider`] boundary: callers hold
//! a [`KeyHandle`] (alias + policy + backing) and drive cipher operations
//! through `init`/`finalize`.

use crate::blob::IV_SIZE;
use crate::context::CipherContext;
use crate::error::{CryptoError, CryptoResult};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info};

/// Alias used for the single vault master key.
pub const DEFAULT_KEY_ALIAS: &str = "pin_vault_key_v2";

/// Default window during which a presence proof stays valid.
pub const DEFAULT_PRESENCE_VALIDITY_SECS: u64 = 60;

/// Where key material lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackingKind {
    /// Secure-enclave class hardware; material never leaves the component.
    HardwareIsolated,
    /// Process memory (optionally persisted by a [`crate::KeyMaterialStore`]).
    Software,
}

/// Symmetric algorithms a key may be bound to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyAlgorithm {
    /// AES in GCM mode, no padding.
    AesGcm,
}

/// Declarative usage policy attached to a key at generation time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPolicy {
    pub algorithm: KeyAlgorithm,
    pub key_size_bits: u16,
    pub randomized_encryption_required: bool,
    /// Every use needs a fresh user-presence proof.
    pub requires_user_presence: bool,
    /// How long a granted proof stays usable. Zero means the proof only
    /// covers the operation it was granted for.
    pub presence_validity_secs: u64,
    pub unlocked_device_required: bool,
    /// Ask for hardware-isolated backing when the platform has it.
    pub prefer_hardware: bool,
}

impl Default for KeyPolicy {
    fn default() -> Self {
        Self {
            algorithm: KeyAlgorithm::AesGcm,
            key_size_bits: 256,
            randomized_encryption_required: true,
            requires_user_presence: false,
            presence_validity_secs: DEFAULT_PRESENCE_VALIDITY_SECS,
            unlocked_device_required: true,
            prefer_hardware: true,
        }
    }
}

impl KeyPolicy {
    /// Policy for a key that needs a fresh presence proof on every use.
    pub fn presence_required() -> Self {
        Self {
            requires_user_presence: true,
            ..Self::default()
        }
    }

    pub fn presence_validity(&self) -> Duration {
        Duration::from_secs(self.presence_validity_secs)
    }
}

/// Reference to a named key inside a key store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyHandle {
    alias: String,
    policy: KeyPolicy,
    backing: BackingKind,
}

impl KeyHandle {
    /// Only key stores construct handles.
    pub fn new(alias: impl Into<String>, policy: KeyPolicy, backing: BackingKind) -> Self {
        Self {
            alias: alias.into(),
            policy,
            backing,
        }
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn policy(&self) -> &KeyPolicy {
        &self.policy
    }

    pub fn backing(&self) -> BackingKind {
        self.backing
    }

    pub fn requires_user_presence(&self) -> bool {
        self.policy.requires_user_presence
    }

    pub fn presence_validity(&self) -> Duration {
        self.policy.presence_validity()
    }
}

/// Result of initializing a cipher context.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InitOutcome {
    /// The context may finalize under this IV.
    Ready { iv: [u8; IV_SIZE] },
    /// The key needs a presence proof bound to this context first.
    NeedsUserPresence,
}

/// Platform key store.
///
/// Implementations must be safe to share between threads; cipher contexts
/// for one alias may be created concurrently.
pub trait KeyStoreProvider: Send + Sync {
    /// Whether keys with this backing can be generated here.
    fn supports(&self, backing: BackingKind) -> bool;

    /// Looks up an existing key.
    fn key(&self, alias: &str) -> CryptoResult<Option<KeyHandle>>;

    /// Generates a key. Must fail rather than overwrite an existing alias.
    fn generate(
        &self,
        alias: &str,
        policy: &KeyPolicy,
        backing: BackingKind,
    ) -> CryptoResult<KeyHandle>;

    /// Initializes `context` under `key`. Encryption contexts receive a
    /// freshly generated IV; decryption contexts keep theirs.
    fn init(&self, key: &KeyHandle, context: &CipherContext) -> CryptoResult<InitOutcome>;

    /// Runs the AEAD over `input` with an initialized context.
    fn finalize(
        &self,
        key: &KeyHandle,
        context: &CipherContext,
        input: &[u8],
    ) -> CryptoResult<Vec<u8>>;

    /// Drops any presence authorization still held for `context_id`. Called
    /// once the operation that owned the context has ended, however it ended.
    fn release(&self, _context_id: u64) {}
}

/// Obtains or creates the vault's keys.
pub struct KeyManager {
    provider: Arc<dyn KeyStoreProvider>,
    policy: KeyPolicy,
    generation: Mutex<()>,
}

impl KeyManager {
    pub fn new(provider: Arc<dyn KeyStoreProvider>, policy: KeyPolicy) -> Self {
        Self {
            provider,
            policy,
            generation: Mutex::new(()),
        }
    }

    pub fn provider(&self) -> &Arc<dyn KeyStoreProvider> {
        &self.provider
    }

    pub fn policy(&self) -> &KeyPolicy {
        &self.policy
    }

    /// Returns the key under `alias`, generating it on first use.
    ///
    /// An existing key is returned unchanged, whatever its policy.
    pub fn get_or_create(&self, alias: &str) -> CryptoResult<KeyHandle> {
        if alias.trim().is_empty() {
            return Err(CryptoError::KeyUnavailable("key alias must not be empty".into()));
        }

        if let Some(handle) = self.provider.key(alias)? {
            return Ok(handle);
        }

        let _guard = self
            .generation
            .lock()
            .map_err(|e| CryptoError::KeyUnavailable(format!("key generation lock poisoned: {e}")))?;

        // Another caller may have generated it while we waited.
        if let Some(handle) = self.provider.key(alias)? {
            return Ok(handle);
        }

        let handle = self.generate(alias)?;
        info!(alias, backing = ?handle.backing(), "generated vault key");
        Ok(handle)
    }

    fn generate(&self, alias: &str) -> CryptoResult<KeyHandle> {
        let mut hardware_err = None;
        if self.policy.prefer_hardware && self.provider.supports(BackingKind::HardwareIsolated) {
            match self
                .provider
                .generate(alias, &self.policy, BackingKind::HardwareIsolated)
            {
                Ok(handle) => return Ok(handle),
                Err(e) => {
                    debug!(alias, "hardware-isolated key generation failed, falling back: {e}");
                    hardware_err = Some(e);
                }
            }
        }

        if !self.provider.supports(BackingKind::Software) {
            return Err(hardware_err.unwrap_or_else(|| {
                CryptoError::KeyUnavailable(format!("no usable key backing for alias {alias}"))
            }));
        }
        self.provider
            .generate(alias, &self.policy, BackingKind::Software)
    }
}
