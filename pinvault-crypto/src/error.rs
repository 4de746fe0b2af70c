//! Crypto error types.

use thiserror::Error;

/// Result type for crypto operations.
pub type CryptoResult<T> = Result<T, CryptoError>;

/// Errors that can occur while managing keys or running cipher operations.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("key unavailable: {0}")]
    KeyUnavailable(String),

    #[error("user authentication required but no challenge handler was provided")]
    AuthenticationRequired,

    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("authentication cancelled")]
    AuthenticationCancelled,

    #[error("corrupt record: {0}")]
    CorruptRecord(String),
}

impl CryptoError {
    /// True for the errors raised by the presence-verification path.
    pub fn is_authentication(&self) -> bool {
        matches!(
            self,
            Self::AuthenticationRequired
                | Self::AuthenticationFailed(_)
                | Self::AuthenticationCancelled
        )
    }
}
