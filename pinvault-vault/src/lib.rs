//! PinVault: short secrets encrypted at rest.
//!
//! Each [`SecretRecord`] is serialized to JSON, encrypted with the vault key
//! through [`pinvault_crypto::CipherCodec`] and written as one blob named
//! `pin_<id>.json`. [`VaultRepository`] keeps the last resolved
//! [`VaultSnapshot`] and publishes it over a `tokio::sync::watch` channel.
//!
//! [`open_vault`] wires the default components from a [`VaultConfig`]; every
//! component can also be built by hand.

mod config;
mod error;
mod naming;
mod open;
mod record;
mod repository;
mod snapshot;

pub use config::VaultConfig;
pub use error::{VaultError, VaultResult};
pub use naming::{RecordNaming, DEFAULT_RECORD_PREFIX, DEFAULT_RECORD_SUFFIX};
pub use open::{open_vault, open_vault_with_key_store, Vault};
pub use record::SecretRecord;
pub use repository::VaultRepository;
pub use snapshot::VaultSnapshot;
