//! Access-token sources for the WebSocket handshake.
//!
//! The connection manager never stores a token. It asks its [`TokenProvider`] on every
//! connection attempt, so a token rotated by the host application between attempts is picked
//! up on the next reconnect.

use std::sync::{Arc, PoisonError, RwLock};

/// Secret string types that redact values in debug output for security.
pub use secrecy::{ExposeSecret, SecretString};

use crate::ACCESS_TOKEN_VAR;

/// Synchronous, externally owned source of bearer tokens.
///
/// Implemented for any `Fn() -> Option<String>` closure, so simple hosts can pass a closure
/// over their own token storage.
pub trait TokenProvider: Send + Sync + 'static {
    /// Returns the current access token, or `None` when the user is signed out.
    fn access_token(&self) -> Option<SecretString>;
}

impl<F> TokenProvider for F
where
    F: Fn() -> Option<String> + Send + Sync + 'static,
{
    fn access_token(&self) -> Option<SecretString> {
        self().map(SecretString::from)
    }
}

/// A token that never changes for the lifetime of the provider.
#[derive(Clone, Debug)]
pub struct StaticToken(SecretString);

impl StaticToken {
    #[must_use]
    pub fn new<S: Into<String>>(token: S) -> Self {
        Self(SecretString::from(token.into()))
    }
}

impl TokenProvider for StaticToken {
    fn access_token(&self) -> Option<SecretString> {
        Some(self.0.clone())
    }
}

/// Reads [`ACCESS_TOKEN_VAR`] from the process environment on every call.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, Default)]
pub struct EnvToken;

impl TokenProvider for EnvToken {
    fn access_token(&self) -> Option<SecretString> {
        std::env::var(ACCESS_TOKEN_VAR).ok().map(SecretString::from)
    }
}

/// A token slot shared with the host's login flow.
///
/// Clones share the same slot: the login flow calls [`SharedToken::set`] or
/// [`SharedToken::clear`] and the next connection attempt observes the change.
#[derive(Clone, Debug, Default)]
pub struct SharedToken {
    inner: Arc<RwLock<Option<SecretString>>>,
}

impl SharedToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the current token.
    pub fn set<S: Into<String>>(&self, token: S) {
        // Option<SecretString> has no intermediate state to corrupt, so a poisoned lock is usable.
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) =
            Some(SecretString::from(token.into()));
    }

    /// Removes the token, e.g. on sign-out.
    pub fn clear(&self) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

impl TokenProvider for SharedToken {
    fn access_token(&self) -> Option<SecretString> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Reads a token for a single attempt, treating blank tokens as absent.
pub(crate) fn fresh_token(provider: &dyn TokenProvider) -> Option<SecretString> {
    provider
        .access_token()
        .filter(|token| !token.expose_secret().trim().is_empty())
}
