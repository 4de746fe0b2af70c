//! User-presence challenges bound to a cipher context.
//!
//! A [`Challenge`] is handed the exact [`CipherContext`] that needs
//! authorizing and answers with an [`AuthenticationResult`]. It never
//! returns a proof token: a successful prompt authorizes the context inside
//! the key store, and the codec simply re-initializes that same context.

use crate::context::CipherContext;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

/// Reason reported when the prompt was cancelled by the caller.
pub const CANCELLED_REASON: &str = "cancelled";

/// Reason reported when no presence mechanism can be used.
pub const MECHANISM_UNAVAILABLE_REASON: &str = "mechanism unavailable";

/// Reason reported when another prompt is still pending.
pub const PROMPT_ACTIVE_REASON: &str = "authentication prompt already active";

/// Outcome of a presence challenge.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthenticationResult {
    Success,
    Fail(String),
}

impl AuthenticationResult {
    pub fn cancelled() -> Self {
        Self::Fail(CANCELLED_REASON.to_string())
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Fail(reason) if reason == CANCELLED_REASON)
    }
}

/// Runs a presence challenge for one cipher context.
#[async_trait]
pub trait Challenge: Send + Sync {
    async fn challenge(&self, context: &CipherContext) -> AuthenticationResult;
}

/// Adapts a synchronous closure into a [`Challenge`].
pub struct ChallengeFn<F>(pub F);

#[async_trait]
impl<F> Challenge for ChallengeFn<F>
where
    F: Fn(&CipherContext) -> AuthenticationResult + Send + Sync,
{
    async fn challenge(&self, context: &CipherContext) -> AuthenticationResult {
        (self.0)(context)
    }
}

/// Text shown on the presence prompt.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptInfo {
    pub title: String,
    pub subtitle: String,
    pub negative_button: String,
}

impl Default for PromptInfo {
    fn default() -> Self {
        Self {
            title: "Biometric Authentication".to_string(),
            subtitle: "Authenticate to access encrypted data".to_string(),
            negative_button: "Cancel".to_string(),
        }
    }
}

/// Platform prompt for biometric or device-credential verification.
#[async_trait]
pub trait PresenceVerifier: Send + Sync {
    /// Whether a verification mechanism is enrolled and usable right now.
    fn is_available(&self) -> bool;

    /// Shows the prompt bound to `context` and waits for the user.
    async fn prompt(&self, context: &CipherContext, info: &PromptInfo) -> AuthenticationResult;

    /// Tears down a prompt that is still showing.
    fn dismiss(&self);
}

/// Dismisses the prompt unless it settled on its own.
struct PromptGuard<'a> {
    verifier: &'a dyn PresenceVerifier,
    active: bool,
}

impl PromptGuard<'_> {
    fn settle(&mut self) {
        self.active = false;
    }
}

impl Drop for PromptGuard<'_> {
    fn drop(&mut self) {
        if self.active {
            self.verifier.dismiss();
        }
    }
}

/// The vault's [`Challenge`] implementation over a [`PresenceVerifier`].
///
/// At most one prompt is shown at a time; a second challenge while one is
/// pending fails immediately. A pending prompt has no timeout and stays up
/// until the user answers or [`AuthenticationGate::cancel`] is called.
pub struct AuthenticationGate {
    verifier: Arc<dyn PresenceVerifier>,
    prompt: PromptInfo,
    in_flight: Mutex<()>,
    cancel: watch::Sender<u64>,
}

impl AuthenticationGate {
    pub fn new(verifier: Arc<dyn PresenceVerifier>, prompt: PromptInfo) -> Self {
        let (cancel, _) = watch::channel(0);
        Self {
            verifier,
            prompt,
            in_flight: Mutex::new(()),
            cancel,
        }
    }

    /// Cancels the prompt currently in flight, if any.
    pub fn cancel(&self) {
        self.cancel.send_modify(|generation| *generation += 1);
    }

    /// True while a prompt is showing.
    pub fn is_prompting(&self) -> bool {
        self.in_flight.try_lock().is_err()
    }
}

#[async_trait]
impl Challenge for AuthenticationGate {
    async fn challenge(&self, context: &CipherContext) -> AuthenticationResult {
        if !self.verifier.is_available() {
            warn!(context = context.id(), "presence verification unavailable");
            return AuthenticationResult::Fail(MECHANISM_UNAVAILABLE_REASON.to_string());
        }

        let Ok(_slot) = self.in_flight.try_lock() else {
            debug!(context = context.id(), "rejecting concurrent presence prompt");
            return AuthenticationResult::Fail(PROMPT_ACTIVE_REASON.to_string());
        };

        let mut cancelled = self.cancel.subscribe();
        let mut guard = PromptGuard {
            verifier: self.verifier.as_ref(),
            active: true,
        };

        debug!(context = context.id(), alias = context.alias(), "showing presence prompt");
        tokio::select! {
            result = self.verifier.prompt(context, &self.prompt) => {
                guard.settle();
                if let AuthenticationResult::Fail(reason) = &result {
                    info!(context = context.id(), "presence prompt failed: {reason}");
                }
                result
            }
            _ = cancelled.changed() => {
                info!(context = context.id(), "presence prompt cancelled");
                AuthenticationResult::cancelled()
            }
        }
    }
}
