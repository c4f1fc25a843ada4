//! Startup reconciliation of the persisted session with the identity service.
//!
//! ARCHITECTURE
//! ============
//! `loading -> {authenticated, unauthenticated}`:
//!
//! 1. Read the persisted record.
//! 2. Absent: unauthenticated, no network call. Malformed: delete it, then
//!    unauthenticated.
//! 3. Present: install it in the store right away (phase stays `loading`).
//! 4. Verify the token. Success replaces the cached identity with the
//!    server's; any failure, including a timeout, logs the session out.
//!
//! TRADE-OFFS
//! ==========
//! Verification is binary and never retried. A flaky network on startup
//! costs the user a login, but the store never trusts a token the server
//! has not confirmed.

use std::time::Duration;

use tokio::task::JoinHandle;

use crate::api::IdentityService;
use crate::storage::{self, PersistedSession};
use crate::store::{AuthPhase, SessionStore};

pub const DEFAULT_VERIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// One-shot startup task for a `SessionStore`.
pub struct Bootstrapper<I> {
    store: SessionStore,
    identity: I,
    verify_timeout: Duration,
}

impl<I: IdentityService> Bootstrapper<I> {
    #[must_use]
    pub fn new(store: SessionStore, identity: I) -> Self {
        Self { store, identity, verify_timeout: DEFAULT_VERIFY_TIMEOUT }
    }

    /// Bound on the verification call; expiry counts as a failure.
    #[must_use]
    pub fn with_verify_timeout(mut self, verify_timeout: Duration) -> Self {
        self.verify_timeout = verify_timeout;
        self
    }

    /// Run the bootstrap and return the phase it settled in.
    ///
    /// Only the first run against a given store does anything; later runs
    /// return the store's current phase untouched.
    pub async fn run(self) -> AuthPhase {
        if !self.store.claim_bootstrap() {
            tracing::warn!("session bootstrap already ran for this store");
            return self.store.phase();
        }

        let session = match storage::load_session(self.store.storage()) {
            PersistedSession::Absent => {
                tracing::debug!("no persisted session");
                return self.store.finish_unauthenticated(false);
            }
            PersistedSession::Malformed(reason) => {
                tracing::warn!(%reason, "discarding malformed persisted session");
                return self.store.finish_unauthenticated(true);
            }
            PersistedSession::Present(session) => session,
        };

        let token = session.token.clone();
        let user_id = session.user.id.clone();
        if !self.store.restore(session) {
            tracing::debug!("session already established or settled; skipping revalidation");
            return self.store.phase();
        }

        match tokio::time::timeout(self.verify_timeout, self.identity.verify(&token)).await {
            Ok(Ok(user)) => match user.validate() {
                Ok(()) => {
                    tracing::info!(user_id = %user.id, "persisted session revalidated");
                    self.store.confirm(&token, user)
                }
                Err(e) => {
                    tracing::warn!(%user_id, error = %e, "identity service returned an incomplete user");
                    self.store.demote(&token)
                }
            },
            Ok(Err(e)) => {
                tracing::warn!(%user_id, error = %e, "session revalidation failed");
                self.store.demote(&token)
            }
            Err(_) => {
                tracing::warn!(%user_id, timeout = ?self.verify_timeout, "session revalidation timed out");
                self.store.demote(&token)
            }
        }
    }
}

impl<I: IdentityService + 'static> Bootstrapper<I> {
    /// Run on a background task so startup is not blocked.
    pub fn spawn(self) -> JoinHandle<AuthPhase> {
        tokio::spawn(self.run())
    }
}

#[cfg(test)]
#[path = "bootstrap_test.rs"]
mod tests;
