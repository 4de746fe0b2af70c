//! OS keychain persistence for software keys.
//!
//! Each alias is one keychain entry under the configured service. The entry
//! holds JSON with the base64 key material and the key's policy.

use crate::error::{CryptoError, CryptoResult};
use crate::key::{BackingKind, KeyPolicy};
use crate::software::{KeyMaterialStore, StoredKey, KEY_SIZE};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use keyring::Entry;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, Zeroizing};

/// Keychain service name used by the vault.
pub const KEYCHAIN_SERVICE: &str = "com.pinvault.app";

#[derive(Serialize, Deserialize)]
struct KeychainRecord {
    key: String,
    policy: KeyPolicy,
    backing: BackingKind,
}

impl Drop for KeychainRecord {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

/// [`KeyMaterialStore`] backed by the platform keychain.
pub struct KeychainMaterialStore {
    service: String,
}

impl KeychainMaterialStore {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, alias: &str) -> CryptoResult<Entry> {
        Entry::new(&self.service, alias)
            .map_err(|e| CryptoError::KeyUnavailable(format!("keychain error: {e}")))
    }
}

impl Default for KeychainMaterialStore {
    fn default() -> Self {
        Self::new(KEYCHAIN_SERVICE)
    }
}

impl KeyMaterialStore for KeychainMaterialStore {
    fn load(&self, alias: &str) -> CryptoResult<Option<StoredKey>> {
        let password = match self.entry(alias)?.get_password() {
            Ok(password) => Zeroizing::new(password),
            Err(keyring::Error::NoEntry) => return Ok(None),
            Err(e) => return Err(CryptoError::KeyUnavailable(format!("keychain error: {e}"))),
        };

        let record: KeychainRecord = serde_json::from_str(&password).map_err(|e| {
            CryptoError::KeyUnavailable(format!("keychain entry for {alias} is malformed: {e}"))
        })?;
        let bytes = Zeroizing::new(BASE64.decode(&record.key).map_err(|_| {
            CryptoError::KeyUnavailable(format!("keychain entry for {alias} is not base64"))
        })?);
        if bytes.len() != KEY_SIZE {
            return Err(CryptoError::KeyUnavailable(format!(
                "keychain key for {alias} is {} bytes, expected {KEY_SIZE}",
                bytes.len()
            )));
        }

        let mut material = Zeroizing::new([0u8; KEY_SIZE]);
        material.copy_from_slice(&bytes);
        Ok(Some(StoredKey {
            material,
            policy: record.policy.clone(),
            backing: record.backing,
        }))
    }

    fn save(&self, alias: &str, key: &StoredKey) -> CryptoResult<()> {
        let record = KeychainRecord {
            key: BASE64.encode(&key.material[..]),
            policy: key.policy.clone(),
            backing: key.backing,
        };
        let encoded = Zeroizing::new(serde_json::to_string(&record).map_err(|e| {
            CryptoError::KeyUnavailable(format!("cannot encode keychain entry: {e}"))
        })?);

        self.entry(alias)?
            .set_password(&encoded)
            .map_err(|e| CryptoError::KeyUnavailable(format!("keychain error: {e}")))
    }
}
