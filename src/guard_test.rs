use super::*;
use crate::identity::{BearerToken, UserIdentity};
use crate::storage::MemoryStorage;
use std::sync::Arc;

fn session() -> Session {
    Session::new(BearerToken::new("abc").unwrap(), UserIdentity::new("u1", "alice@hive.test", "Alice")).unwrap()
}

#[test]
fn should_redirect_unauth_when_not_loading_and_user_missing() {
    let state = SessionSnapshot { session: None, loading: false };
    assert!(should_redirect_unauth(&state));
}

#[test]
fn should_not_redirect_while_loading() {
    let state = SessionSnapshot { session: None, loading: true };
    assert!(!should_redirect_unauth(&state));
    assert_eq!(access_decision(&state), AccessDecision::Wait);
}

#[test]
fn optimistic_session_still_waits_while_loading() {
    let state = SessionSnapshot { session: Some(session()), loading: true };
    assert_eq!(access_decision(&state), AccessDecision::Wait);
}

#[test]
fn should_not_redirect_when_user_exists() {
    let state = SessionSnapshot { session: Some(session()), loading: false };
    assert!(!should_redirect_unauth(&state));
    assert_eq!(access_decision(&state), AccessDecision::Allow);
}

#[tokio::test]
async fn require_session_returns_logged_in_session() {
    let store = SessionStore::new(Arc::new(MemoryStorage::new()));
    let expected = session();
    store.login(expected.token.clone(), expected.user.clone());
    assert_eq!(require_session(&store).await, Some(expected));
}
