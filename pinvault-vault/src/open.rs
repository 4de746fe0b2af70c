//! Composition root.

use crate::config::VaultConfig;
use crate::error::VaultResult;
use crate::repository::VaultRepository;
use pinvault_blobstore::FsBlobStore;
use pinvault_crypto::{
    AuthenticationGate, CipherCodec, KeyManager, PresenceVerifier, PromptInfo, SoftwareKeyStore,
};
use std::sync::Arc;
use tracing::info;

/// An opened vault: the repository plus the key store behind it.
pub struct Vault {
    repository: VaultRepository,
    key_store: Arc<SoftwareKeyStore>,
    prompt: PromptInfo,
}

impl Vault {
    pub fn repository(&self) -> &VaultRepository {
        &self.repository
    }

    /// The key store, e.g. to obtain a
    /// [`pinvault_crypto::SoftwarePresenceVerifier`] bound to it.
    pub fn key_store(&self) -> &Arc<SoftwareKeyStore> {
        &self.key_store
    }

    /// A gate showing the configured prompt through `verifier`.
    pub fn authentication_gate(&self, verifier: Arc<dyn PresenceVerifier>) -> AuthenticationGate {
        AuthenticationGate::new(verifier, self.prompt.clone())
    }
}

/// Opens the vault described by `config` with the platform key store.
///
/// With the `os-keychain` feature the key is persisted in the OS keychain;
/// without it the key lives in memory and records written by one process
/// cannot be read by the next.
pub fn open_vault(config: &VaultConfig) -> VaultResult<Vault> {
    open_vault_with_key_store(config, Arc::new(platform_key_store()))
}

/// Opens the vault described by `config` over an explicit key store.
pub fn open_vault_with_key_store(
    config: &VaultConfig,
    key_store: Arc<SoftwareKeyStore>,
) -> VaultResult<Vault> {
    config.validate()?;

    let keys = KeyManager::new(key_store.clone(), config.key_policy());
    let codec = CipherCodec::new(key_store.clone());
    let store = Arc::new(FsBlobStore::new(&config.data_dir));
    let repository = VaultRepository::new(keys, codec, store)
        .with_naming(config.naming())
        .with_key_alias(&config.key_alias);

    info!(
        data_dir = %config.data_dir.display(),
        alias = %config.key_alias,
        "vault opened"
    );
    Ok(Vault {
        repository,
        key_store,
        prompt: config.prompt.clone(),
    })
}

#[cfg(feature = "os-keychain")]
fn platform_key_store() -> SoftwareKeyStore {
    SoftwareKeyStore::with_persistence(Box::new(pinvault_crypto::KeychainMaterialStore::default()))
}

#[cfg(not(feature = "os-keychain"))]
fn platform_key_store() -> SoftwareKeyStore {
    tracing::warn!("os-keychain feature disabled; the vault key will not survive a restart");
    SoftwareKeyStore::in_memory()
}
