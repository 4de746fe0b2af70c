//! On-disk layout of an encrypted record.
//!
//! ```text
//! offset 0..12   : IV, 12 raw bytes
//! offset 12..end : AES-GCM ciphertext followed by the 128-bit tag
//! ```
//!
//! There is no version prefix; the layout is shared with records written by
//! earlier releases of the app.

use crate::error::{CryptoError, CryptoResult};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

/// GCM IV length in bytes.
pub const IV_SIZE: usize = 12;

/// GCM authentication tag length in bytes (128 bits).
pub const TAG_SIZE: usize = 16;

/// An AEAD output together with the IV it was produced under.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncryptedBlob {
    iv: [u8; IV_SIZE],
    ciphertext_and_tag: Vec<u8>,
}

impl EncryptedBlob {
    /// Builds a blob from an IV and the AEAD output.
    ///
    /// Fails if the AEAD output is too short to hold a tag.
    pub fn new(iv: [u8; IV_SIZE], ciphertext_and_tag: Vec<u8>) -> CryptoResult<Self> {
        if ciphertext_and_tag.len() < TAG_SIZE {
            return Err(CryptoError::CorruptRecord(format!(
                "ciphertext is {} bytes, shorter than the {TAG_SIZE}-byte tag",
                ciphertext_and_tag.len()
            )));
        }
        Ok(Self {
            iv,
            ciphertext_and_tag,
        })
    }

    pub fn iv(&self) -> &[u8; IV_SIZE] {
        &self.iv
    }

    pub fn ciphertext_and_tag(&self) -> &[u8] {
        &self.ciphertext_and_tag
    }

    /// Serializes to `iv || ciphertext || tag`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(IV_SIZE + self.ciphertext_and_tag.len());
        out.extend_from_slice(&self.iv);
        out.extend_from_slice(&self.ciphertext_and_tag);
        out
    }

    /// Parses the persisted layout. Truncated input is a `CorruptRecord`.
    pub fn from_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        if bytes.len() < IV_SIZE + TAG_SIZE {
            return Err(CryptoError::CorruptRecord(format!(
                "blob is {} bytes, expected at least {}",
                bytes.len(),
                IV_SIZE + TAG_SIZE
            )));
        }
        let (iv_bytes, rest) = bytes.split_at(IV_SIZE);
        let mut iv = [0u8; IV_SIZE];
        iv.copy_from_slice(iv_bytes);
        Self::new(iv, rest.to_vec())
    }

    /// Standard base64 of the persisted layout.
    pub fn to_base64(&self) -> String {
        BASE64.encode(self.to_bytes())
    }

    pub fn from_base64(encoded: &str) -> CryptoResult<Self> {
        let bytes = BASE64
            .decode(encoded.trim())
            .map_err(|e| CryptoError::CorruptRecord(format!("invalid base64: {e}")))?;
        Self::from_bytes(&bytes)
    }
}
