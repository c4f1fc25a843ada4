//! Access-control helpers for session-gated routes and commands.
//!
//! SYSTEM CONTEXT
//! ==============
//! Every gated surface should apply the same rule: decide nothing while the
//! store is loading, then allow or send the user to the login flow.

use crate::identity::Session;
use crate::store::{SessionSnapshot, SessionStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    /// Startup revalidation is still running.
    Wait,
    Allow,
    RedirectToLogin,
}

#[must_use]
pub fn access_decision(snapshot: &SessionSnapshot) -> AccessDecision {
    if snapshot.loading {
        AccessDecision::Wait
    } else if snapshot.session.is_some() {
        AccessDecision::Allow
    } else {
        AccessDecision::RedirectToLogin
    }
}

/// True once auth has loaded and nobody is logged in.
#[must_use]
pub fn should_redirect_unauth(snapshot: &SessionSnapshot) -> bool {
    access_decision(snapshot) == AccessDecision::RedirectToLogin
}

/// Wait for the store to settle and return the session, if any.
pub async fn require_session(store: &SessionStore) -> Option<Session> {
    store.wait_until_loaded().await.session
}

#[cfg(test)]
#[path = "guard_test.rs"]
mod tests;
