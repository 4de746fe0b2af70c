//! Vault error types.

use pinvault_blobstore::BlobStoreError;
use pinvault_crypto::CryptoError;
use thiserror::Error;

/// Result type for vault operations.
pub type VaultResult<T> = Result<T, VaultError>;

/// Errors surfaced by the vault API.
#[derive(Debug, Error)]
pub enum VaultError {
    #[error("key unavailable: {0}")]
    KeyUnavailable(String),

    #[error("user authentication required")]
    AuthenticationRequired,

    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("authentication cancelled")]
    AuthenticationCancelled,

    #[error("corrupt record: {0}")]
    CorruptRecord(String),

    #[error("secret not found: {0}")]
    NotFound(String),

    #[error("record store failure: {0}")]
    Io(#[source] BlobStoreError),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl From<CryptoError> for VaultError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::KeyUnavailable(msg) => Self::KeyUnavailable(msg),
            CryptoError::AuthenticationRequired => Self::AuthenticationRequired,
            CryptoError::AuthenticationFailed(reason) => Self::AuthenticationFailed(reason),
            CryptoError::AuthenticationCancelled => Self::AuthenticationCancelled,
            CryptoError::CorruptRecord(msg) => Self::CorruptRecord(msg),
        }
    }
}

impl From<BlobStoreError> for VaultError {
    fn from(err: BlobStoreError) -> Self {
        match err {
            BlobStoreError::NotFound(name) | BlobStoreError::InvalidName(name) => {
                Self::NotFound(name)
            }
            other => Self::Io(other),
        }
    }
}

impl From<serde_json::Error> for VaultError {
    fn from(err: serde_json::Error) -> Self {
        Self::CorruptRecord(format!("record is not valid JSON: {err}"))
    }
}

impl VaultError {
    /// Failures caused by the presence check rather than the data.
    pub fn is_authentication(&self) -> bool {
        matches!(
            self,
            Self::AuthenticationRequired
                | Self::AuthenticationFailed(_)
                | Self::AuthenticationCancelled
        )
    }
}
