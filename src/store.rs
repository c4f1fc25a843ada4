//! Session store: the single source of truth for "who is logged in".
//!
//! SYSTEM CONTEXT
//! ==============
//! Hosts create one `SessionStore` at startup and hand clones to every
//! component that gates behavior on authentication. The store owns the
//! durable storage backend and keeps it in step with the in-memory session.
//!
//! DESIGN
//! ======
//! The session sits behind an `RwLock` and the auth phase behind a
//! `tokio::sync::watch` channel. Readers take cheap synchronous snapshots;
//! route guards can instead await `wait_until_loaded` so they never decide
//! access while the startup revalidation is still outstanding.
//!
//! Storage writes happen while the session write lock is held, so in-memory
//! and persisted state never diverge between two mutations. A failed storage
//! write is logged and does not undo the in-memory change; the persisted
//! record is cleared instead, so it never pairs a token with another user.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::watch;

use crate::identity::{BearerToken, Session, SessionError, UserIdentity};
use crate::storage::{self, SessionStorage};

/// Where the store is in the startup state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthPhase {
    /// Startup revalidation has not concluded yet.
    Loading,
    Authenticated,
    Unauthenticated,
}

impl AuthPhase {
    #[must_use]
    pub fn is_loading(self) -> bool {
        matches!(self, Self::Loading)
    }
}

/// Point-in-time view returned by `SessionStore::current_session`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub session: Option<Session>,
    /// Access-control decisions must wait until this is `false`.
    pub loading: bool,
}

impl SessionSnapshot {
    #[must_use]
    pub fn user(&self) -> Option<&UserIdentity> {
        self.session.as_ref().map(|s| &s.user)
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.session.is_some()
    }
}

/// Shared handle to the current session. Cloning shares the same state.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    session: RwLock<Option<Session>>,
    phase: watch::Sender<AuthPhase>,
    storage: Arc<dyn SessionStorage>,
    bootstrap_claimed: AtomicBool,
}

impl SessionStore {
    /// Create an empty store in the `Loading` phase.
    #[must_use]
    pub fn new(storage: Arc<dyn SessionStorage>) -> Self {
        let (phase, _) = watch::channel(AuthPhase::Loading);
        Self {
            inner: Arc::new(StoreInner {
                session: RwLock::new(None),
                phase,
                storage,
                bootstrap_claimed: AtomicBool::new(false),
            }),
        }
    }

    /// Record a session the server has already confirmed.
    pub fn login(&self, token: BearerToken, user: UserIdentity) {
        debug_assert!(user.validate().is_ok(), "login requires a well-formed identity");
        let session = Session { token, user };

        let mut guard = self.inner.session.write().unwrap_or_else(PoisonError::into_inner);
        self.persist(&session);
        tracing::debug!(user_id = %session.user.id, "session established");
        *guard = Some(session);
        self.inner.phase.send_replace(AuthPhase::Authenticated);
    }

    /// Drop the session and its persisted record. Safe to call repeatedly.
    pub fn logout(&self) {
        let mut guard = self.inner.session.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(session) = guard.take() {
            tracing::debug!(user_id = %session.user.id, "session cleared");
        }
        self.clear_storage();
        self.inner.phase.send_replace(AuthPhase::Unauthenticated);
    }

    /// Replace the identity of the active session, keeping its token.
    ///
    /// # Errors
    ///
    /// `NoActiveSession` when nobody is logged in, or `IncompleteIdentity`
    /// when `user` lacks an id or email. State is untouched on error.
    pub fn update_user(&self, user: UserIdentity) -> Result<(), SessionError> {
        user.validate()?;
        let mut guard = self.inner.session.write().unwrap_or_else(PoisonError::into_inner);
        let Some(session) = guard.as_mut() else {
            return Err(SessionError::NoActiveSession);
        };
        session.user = user;
        self.persist(session);
        Ok(())
    }

    #[must_use]
    pub fn current_session(&self) -> SessionSnapshot {
        let session = self.inner.session.read().unwrap_or_else(PoisonError::into_inner).clone();
        SessionSnapshot { session, loading: self.phase().is_loading() }
    }

    #[must_use]
    pub fn phase(&self) -> AuthPhase {
        *self.inner.phase.borrow()
    }

    /// Token of the active session, for building authorized requests.
    #[must_use]
    pub fn token(&self) -> Option<BearerToken> {
        self.inner
            .session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|s| s.token.clone())
    }

    /// Watch phase transitions.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<AuthPhase> {
        self.inner.phase.subscribe()
    }

    /// Wait for startup revalidation to conclude, then snapshot.
    pub async fn wait_until_loaded(&self) -> SessionSnapshot {
        let mut rx = self.inner.phase.subscribe();
        // The sender lives as long as `self`, so this only returns once loaded.
        let _ = rx.wait_for(|phase| !phase.is_loading()).await;
        self.current_session()
    }

    // =========================================================================
    // BOOTSTRAP HOOKS
    // =========================================================================

    pub(crate) fn storage(&self) -> &dyn SessionStorage {
        self.inner.storage.as_ref()
    }

    /// Returns `true` exactly once per store.
    pub(crate) fn claim_bootstrap(&self) -> bool {
        !self.inner.bootstrap_claimed.swap(true, Ordering::SeqCst)
    }

    /// Optimistically install a persisted session. Phase stays `Loading`.
    /// Returns `false` if a session is already present or a login/logout
    /// has already concluded loading.
    pub(crate) fn restore(&self, session: Session) -> bool {
        let mut guard = self.inner.session.write().unwrap_or_else(PoisonError::into_inner);
        if guard.is_some() || !self.phase().is_loading() {
            return false;
        }
        *guard = Some(session);
        true
    }

    /// Apply a successful verification of `token`.
    pub(crate) fn confirm(&self, token: &BearerToken, user: UserIdentity) -> AuthPhase {
        let mut guard = self.inner.session.write().unwrap_or_else(PoisonError::into_inner);
        match guard.as_mut() {
            Some(session) if session.token == *token => {
                session.user = user;
                self.persist(session);
                self.inner.phase.send_replace(AuthPhase::Authenticated);
            }
            _ => tracing::debug!("discarding verification result for a replaced session"),
        }
        drop(guard);
        self.phase()
    }

    /// Apply a failed verification of `token`.
    pub(crate) fn demote(&self, token: &BearerToken) -> AuthPhase {
        let mut guard = self.inner.session.write().unwrap_or_else(PoisonError::into_inner);
        match guard.as_ref().map(|session| session.token == *token) {
            Some(true) => {
                *guard = None;
                self.clear_storage();
                self.inner.phase.send_replace(AuthPhase::Unauthenticated);
            }
            Some(false) => tracing::debug!("discarding verification failure for a replaced session"),
            None => self.settle_unauthenticated(),
        }
        drop(guard);
        self.phase()
    }

    /// Conclude startup with no session. Clears storage when `discard` is set,
    /// unless a login landed in the meantime.
    pub(crate) fn finish_unauthenticated(&self, discard: bool) -> AuthPhase {
        let guard = self.inner.session.read().unwrap_or_else(PoisonError::into_inner);
        if guard.is_none() {
            if discard {
                self.clear_storage();
            }
            self.settle_unauthenticated();
        }
        drop(guard);
        self.phase()
    }

    fn settle_unauthenticated(&self) {
        self.inner.phase.send_if_modified(|phase| {
            if phase.is_loading() {
                *phase = AuthPhase::Unauthenticated;
                true
            } else {
                false
            }
        });
    }

    fn persist(&self, session: &Session) {
        if let Err(e) = storage::save_session(self.storage(), session) {
            tracing::warn!(error = %e, "failed to persist session; clearing persisted record");
            self.clear_storage();
        }
    }

    fn clear_storage(&self) {
        if let Err(e) = storage::clear_session(self.storage()) {
            tracing::warn!(error = %e, "failed to clear persisted session");
        }
    }
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore").field("phase", &self.phase()).finish_non_exhaustive()
    }
}

#[cfg(test)]
#[path = "store_test.rs"]
mod tests;
