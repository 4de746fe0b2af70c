//! Presence-gated authenticated encryption.
//!
//! Each call drives one [`CipherContext`] through
//! `Uninitialized -> InitOk -> Finalized`, or, when the key demands a
//! fresh presence proof,
//! `Uninitialized -> NeedsAuth -> AwaitingChallenge -> Authenticated ->
//! Reinitialized -> Finalized`. `Failed` and `Cancelled` end the operation
//! without producing output.
//!
//! Key-store calls may block (keychain access, hardware round trips), so
//! `init` and `finalize` run on the blocking pool and the context travels
//! into the call and back out.

use crate::auth::{AuthenticationResult, Challenge};
use crate::blob::EncryptedBlob;
use crate::context::{CipherContext, CipherMode, ContextState};
use crate::error::{CryptoError, CryptoResult};
use crate::key::{InitOutcome, KeyHandle, KeyStoreProvider};
use std::sync::Arc;
use tracing::{debug, warn};
use zeroize::Zeroizing;

/// Encrypts and decrypts records under keys held by a [`KeyStoreProvider`].
#[derive(Clone)]
pub struct CipherCodec {
    provider: Arc<dyn KeyStoreProvider>,
}

impl CipherCodec {
    pub fn new(provider: Arc<dyn KeyStoreProvider>) -> Self {
        Self { provider }
    }

    /// Encrypts `plaintext` under a fresh IV chosen by the key store.
    pub async fn encrypt(
        &self,
        plaintext: &[u8],
        key: &KeyHandle,
        challenge: Option<&dyn Challenge>,
    ) -> CryptoResult<EncryptedBlob> {
        let context = CipherContext::for_encryption(key.alias());
        let _release = self.release_on_drop(&context);
        let context = self.prepare(key, context, challenge).await?;
        let input = Zeroizing::new(plaintext.to_vec());
        let (context, output) = self.finish(key, context, input).await?;
        let iv = *context
            .iv()
            .ok_or_else(|| CryptoError::KeyUnavailable("key store did not supply an IV".into()))?;
        debug!(alias = key.alias(), context = context.id(), "encrypted payload");
        EncryptedBlob::new(iv, output)
    }

    /// Decrypts `blob` under the IV stored with it.
    pub async fn decrypt(
        &self,
        blob: &EncryptedBlob,
        key: &KeyHandle,
        challenge: Option<&dyn Challenge>,
    ) -> CryptoResult<Zeroizing<Vec<u8>>> {
        let context = CipherContext::for_decryption(key.alias(), *blob.iv());
        let _release = self.release_on_drop(&context);
        let context = self.prepare(key, context, challenge).await?;
        let input = Zeroizing::new(blob.ciphertext_and_tag().to_vec());
        let (context, plaintext) = self.finish(key, context, input).await?;
        debug!(alias = key.alias(), context = context.id(), "decrypted payload");
        Ok(Zeroizing::new(plaintext))
    }

    /// Encrypts UTF-8 text into base64 of the persisted blob layout.
    pub async fn encrypt_text(
        &self,
        text: &str,
        key: &KeyHandle,
        challenge: Option<&dyn Challenge>,
    ) -> CryptoResult<String> {
        let blob = self.encrypt(text.as_bytes(), key, challenge).await?;
        Ok(blob.to_base64())
    }

    /// Reverses [`CipherCodec::encrypt_text`].
    pub async fn decrypt_text(
        &self,
        encoded: &str,
        key: &KeyHandle,
        challenge: Option<&dyn Challenge>,
    ) -> CryptoResult<String> {
        let blob = EncryptedBlob::from_base64(encoded)?;
        let plaintext = self.decrypt(&blob, key, challenge).await?;
        String::from_utf8(plaintext.to_vec())
            .map_err(|_| CryptoError::CorruptRecord("plaintext is not valid UTF-8".into()))
    }

    fn release_on_drop(&self, context: &CipherContext) -> ReleaseOnDrop {
        ReleaseOnDrop {
            provider: self.provider.clone(),
            context_id: context.id(),
        }
    }

    async fn prepare(
        &self,
        key: &KeyHandle,
        context: CipherContext,
        challenge: Option<&dyn Challenge>,
    ) -> CryptoResult<CipherContext> {
        let (mut context, ready) = self.init(key, context, ContextState::InitOk).await?;
        if ready {
            return Ok(context);
        }
        context.advance(ContextState::NeedsAuth);

        let Some(challenge) = challenge else {
            context.advance(ContextState::Failed);
            return Err(CryptoError::AuthenticationRequired);
        };

        context.advance(ContextState::AwaitingChallenge);
        match challenge.challenge(&context).await {
            AuthenticationResult::Success => context.advance(ContextState::Authenticated),
            result if result.is_cancelled() => {
                context.advance(ContextState::Cancelled);
                return Err(CryptoError::AuthenticationCancelled);
            }
            AuthenticationResult::Fail(reason) => {
                context.advance(ContextState::Failed);
                return Err(CryptoError::AuthenticationFailed(reason));
            }
        }

        let (mut context, ready) = self.init(key, context, ContextState::Reinitialized).await?;
        if ready {
            return Ok(context);
        }
        warn!(
            alias = key.alias(),
            context = context.id(),
            "challenge reported success but the key store still requires presence"
        );
        context.advance(ContextState::Failed);
        Err(CryptoError::AuthenticationFailed(
            "presence was not confirmed for this operation".into(),
        ))
    }

    /// Hands the context back with `true` once it is ready, `false` if it
    /// needs presence.
    async fn init(
        &self,
        key: &KeyHandle,
        context: CipherContext,
        ready: ContextState,
    ) -> CryptoResult<(CipherContext, bool)> {
        let provider = self.provider.clone();
        let handle = key.clone();
        let (mut context, outcome) = blocking(move || {
            let outcome = provider.init(&handle, &context);
            (context, outcome)
        })
        .await?;

        match outcome {
            Ok(InitOutcome::Ready { iv }) => {
                if context.mode() == CipherMode::Encrypt {
                    context.set_iv(iv);
                }
                context.advance(ready);
                Ok((context, true))
            }
            Ok(InitOutcome::NeedsUserPresence) => Ok((context, false)),
            Err(e) => {
                context.advance(ContextState::Failed);
                Err(e)
            }
        }
    }

    async fn finish(
        &self,
        key: &KeyHandle,
        context: CipherContext,
        input: Zeroizing<Vec<u8>>,
    ) -> CryptoResult<(CipherContext, Vec<u8>)> {
        let provider = self.provider.clone();
        let handle = key.clone();
        let (mut context, output) = blocking(move || {
            let output = provider.finalize(&handle, &context, &input);
            (context, output)
        })
        .await?;

        match output {
            Ok(output) => {
                context.advance(ContextState::Finalized);
                Ok((context, output))
            }
            Err(e) => {
                context.advance(ContextState::Failed);
                Err(e)
            }
        }
    }
}

/// Runs a key-store call off the async workers.
async fn blocking<T, F>(call: F) -> CryptoResult<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(call).await.map_err(|e| {
        warn!("key store task panicked: {e}");
        CryptoError::KeyUnavailable(format!("key store task failed: {e}"))
    })
}

/// Releases the context's presence bookkeeping when the operation ends,
/// including when its future is dropped mid-flight.
struct ReleaseOnDrop {
    provider: Arc<dyn KeyStoreProvider>,
    context_id: u64,
}

impl Drop for ReleaseOnDrop {
    fn drop(&mut self) {
        self.provider.release(self.context_id);
    }
}
