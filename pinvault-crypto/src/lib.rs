//! Key management and presence-gated encryption for PinVault.
//!
//! # Architecture
//!
//! - [`KeyManager`] obtains the vault key from a [`KeyStoreProvider`],
//!   preferring hardware-isolated backing and falling back to software.
//! - [`CipherCodec`] runs AES-256-GCM through per-operation
//!   [`CipherContext`]s. When a key requires user presence, the codec hands
//!   the context to a [`Challenge`] and re-initializes it after approval.
//! - [`AuthenticationGate`] is the production [`Challenge`]: it shows a
//!   [`PresenceVerifier`] prompt bound to the context and supports
//!   cancellation.
//! - [`EncryptedBlob`] is the persisted `IV || ciphertext || tag` layout.
//!
//! Presence authorizations are scoped to one context id and are spent by
//! the operation they authorize, or released when that operation ends
//! without spending them.

mod auth;
mod blob;
mod cipher;
mod context;
mod error;
mod key;
#[cfg(feature = "os-keychain")]
mod keychain;
mod software;

pub use auth::{
    AuthenticationGate, AuthenticationResult, Challenge, ChallengeFn, PresenceVerifier,
    PromptInfo, CANCELLED_REASON, MECHANISM_UNAVAILABLE_REASON, PROMPT_ACTIVE_REASON,
};
pub use blob::{EncryptedBlob, IV_SIZE, TAG_SIZE};
pub use cipher::CipherCodec;
pub use context::{CipherContext, CipherMode, ContextState};
pub use error::{CryptoError, CryptoResult};
pub use key::{
    BackingKind, InitOutcome, KeyAlgorithm, KeyHandle, KeyManager, KeyPolicy, KeyStoreProvider,
    DEFAULT_KEY_ALIAS, DEFAULT_PRESENCE_VALIDITY_SECS,
};
#[cfg(feature = "os-keychain")]
pub use keychain::{KeychainMaterialStore, KEYCHAIN_SERVICE};
pub use software::{
    KeyMaterialStore, PresenceDecision, SoftwareKeyStore, SoftwarePresenceVerifier, StoredKey,
    KEY_SIZE,
};
pub use zeroize::Zeroizing;
