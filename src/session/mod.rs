//! Shared session state.
//!
//! One [`Session`] is created at startup and handed (as `Arc<Session>`) to the
//! transport and the stream subscriber. It holds:
//!
//! - the negotiated session id and shared key (both present or both absent)
//! - the bearer credential and the claims decoded from it
//! - the stable client instance id
//!
//! # Lifecycle
//!
//! ```text
//!  [Empty] --install()--> [Keyed] --set_credential()--> [LoggedIn]
//!                            ^                              |
//!                            +---------- logout() ----------+
//!
//!  reset(): any state --> [Empty]    (client id survives)
//! ```
//!
//! All state sits behind one `RwLock`, so readers either see the old key and
//! id together or the new key and id together.

mod claims;
mod identity;

pub use claims::Claims;
pub use identity::{default_client_id_path, ClientIdentity};

#[cfg(test)]
pub(crate) use claims::encode_test_token;

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::crypto::SharedKey;

/// Consistent snapshot of the negotiated session.
#[derive(Debug, Clone)]
pub struct SessionKeys {
    /// Opaque id issued by the server
    pub session_id: String,
    /// Derived symmetric key
    pub shared_key: Arc<SharedKey>,
    /// Bumped on every install; used to detect a key replaced under us
    pub generation: u64,
}

#[derive(Default)]
struct Inner {
    keys: Option<SessionKeys>,
    credential: Option<String>,
    claims: Option<Claims>,
    generation: u64,
}

/// Session context shared by every caller.
pub struct Session {
    inner: RwLock<Inner>,
    identity: ClientIdentity,
}

impl Session {
    /// Create an empty session for the given client identity.
    pub fn new(identity: ClientIdentity) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            identity,
        }
    }

    /// Create an empty session with a throwaway client id.
    pub fn ephemeral() -> Self {
        Self::new(ClientIdentity::ephemeral())
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        // A poisoned lock still holds consistent data: every write below is a
        // single assignment
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Install a freshly negotiated session id and key.
    pub fn install(&self, session_id: impl Into<String>, shared_key: SharedKey) -> SessionKeys {
        let mut inner = self.write();
        inner.generation += 1;
        let keys = SessionKeys {
            session_id: session_id.into(),
            shared_key: Arc::new(shared_key),
            generation: inner.generation,
        };
        inner.keys = Some(keys.clone());
        keys
    }

    /// Snapshot of the active session, if any.
    pub fn keys(&self) -> Option<SessionKeys> {
        self.read().keys.clone()
    }

    /// Whether a session id and key are present.
    pub fn has_session(&self) -> bool {
        self.read().keys.is_some()
    }

    /// Current session id, if any.
    pub fn session_id(&self) -> Option<String> {
        self.read().keys.as_ref().map(|k| k.session_id.clone())
    }

    /// Forget the negotiated key but keep the credential.
    ///
    /// Only drops the key if it is still `generation`, so a caller holding a
    /// stale snapshot cannot discard a newer session.
    pub fn drop_keys(&self, generation: u64) -> bool {
        let mut inner = self.write();
        match &inner.keys {
            Some(keys) if keys.generation == generation => {
                inner.keys = None;
                true
            },
            _ => false,
        }
    }

    /// Set or clear the bearer credential and re-decode its claims.
    pub fn set_credential(&self, credential: Option<String>) {
        let claims = credential.as_deref().and_then(|token| match Claims::from_token(token) {
            Ok(claims) => Some(claims),
            Err(e) => {
                tracing::warn!("Credential claims could not be decoded: {}", e);
                None
            },
        });

        let mut inner = self.write();
        inner.credential = credential;
        inner.claims = claims;
    }

    /// Bearer credential, if logged in.
    pub fn credential(&self) -> Option<String> {
        self.read().credential.clone()
    }

    /// Claims decoded from the credential.
    pub fn claims(&self) -> Option<Claims> {
        self.read().claims.clone()
    }

    /// Whether a credential is present.
    pub fn is_logged_in(&self) -> bool {
        self.read().credential.is_some()
    }

    /// Clear credential and claims, keep the negotiated session.
    pub fn logout(&self) {
        let mut inner = self.write();
        inner.credential = None;
        inner.claims = None;
    }

    /// Clear everything except the client id.
    pub fn reset(&self) {
        let mut inner = self.write();
        inner.credential = None;
        inner.claims = None;
        inner.keys = None;
    }

    /// Stable per-installation id.
    pub fn client_id(&self) -> &str {
        self.identity.id()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.read();
        f.debug_struct("Session")
            .field("session_id", &inner.keys.as_ref().map(|k| k.session_id.as_str()))
            .field("generation", &inner.generation)
            .field("logged_in", &inner.credential.is_some())
            .field("client_id", &self.identity.id())
            .finish()
    }
}
