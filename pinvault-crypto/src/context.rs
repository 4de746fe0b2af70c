//! Cipher contexts: one per encrypt or decrypt operation.
//!
//! A context is the unit user-presence authorizations are bound to. Every
//! context gets a process-unique id at creation; key stores key their
//! authorization bookkeeping on that id, so approving one context can never
//! unlock another.

use crate::blob::IV_SIZE;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::trace;

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Direction of a cipher operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CipherMode {
    Encrypt,
    Decrypt,
}

/// Lifecycle of a single cipher operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContextState {
    Uninitialized,
    InitOk,
    NeedsAuth,
    AwaitingChallenge,
    Authenticated,
    Reinitialized,
    Finalized,
    Failed,
    Cancelled,
}

impl ContextState {
    /// States from which `finalize` may run.
    pub fn is_ready(self) -> bool {
        matches!(self, Self::InitOk | Self::Reinitialized)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finalized | Self::Failed | Self::Cancelled)
    }
}

/// An in-progress cipher operation under one key alias.
#[derive(Debug)]
pub struct CipherContext {
    id: u64,
    alias: String,
    mode: CipherMode,
    iv: Option<[u8; IV_SIZE]>,
    state: ContextState,
}

impl CipherContext {
    /// A context for encryption. The IV is chosen by the key store at init.
    pub fn for_encryption(alias: impl Into<String>) -> Self {
        Self::new(alias.into(), CipherMode::Encrypt, None)
    }

    /// A context for decryption under the IV extracted from a stored blob.
    pub fn for_decryption(alias: impl Into<String>, iv: [u8; IV_SIZE]) -> Self {
        Self::new(alias.into(), CipherMode::Decrypt, Some(iv))
    }

    fn new(alias: String, mode: CipherMode, iv: Option<[u8; IV_SIZE]>) -> Self {
        Self {
            id: NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed),
            alias,
            mode,
            iv,
            state: ContextState::Uninitialized,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn mode(&self) -> CipherMode {
        self.mode
    }

    /// The IV in use. `None` for an encryption context that has not been
    /// initialized yet.
    pub fn iv(&self) -> Option<&[u8; IV_SIZE]> {
        self.iv.as_ref()
    }

    pub fn state(&self) -> ContextState {
        self.state
    }

    pub(crate) fn set_iv(&mut self, iv: [u8; IV_SIZE]) {
        self.iv = Some(iv);
    }

    pub(crate) fn advance(&mut self, next: ContextState) {
        trace!(context = self.id, from = ?self.state, to = ?next, "cipher context transition");
        self.state = next;
    }
}
