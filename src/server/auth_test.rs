use super::*;
use crate::api::{ApiError, HttpIdentityClient};
use crate::bootstrap::Bootstrapper;
use crate::config::Timeouts;
use crate::identity::{AuthProvider, BearerToken, Session};
use crate::server::accounts::{AccountDirectory, AccountSeed};
use crate::server::app;
use crate::storage::{FileStorage, PersistedSession, SessionStorage, TOKEN_KEY, load_session, save_session};
use crate::store::{AuthPhase, SessionStore};
use std::sync::Arc;
use std::time::Duration;

fn seeds() -> Vec<AccountSeed> {
    vec![
        AccountSeed {
            id: "1".into(),
            email: "a@b.com".into(),
            name: "A".into(),
            avatar: None,
            auth_provider: AuthProvider::Local,
            password: Some("honey".into()),
        },
        AccountSeed {
            id: "2".into(),
            email: "fed@b.com".into(),
            name: "Fed".into(),
            avatar: None,
            auth_provider: AuthProvider::Federated,
            password: None,
        },
    ]
}

/// Serve the router on an ephemeral port; returns the API base URL.
async fn spawn_server() -> String {
    spawn_server_with(AccountDirectory::from_seeds(seeds()).unwrap()).await
}

async fn spawn_server_with(accounts: AccountDirectory) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app(AppState::new(accounts))).await.unwrap();
    });
    format!("http://{addr}/api")
}

fn client(base_url: &str) -> HttpIdentityClient {
    HttpIdentityClient::new(base_url, Timeouts { request_secs: 5, connect_secs: 2 }).unwrap()
}

// =============================================================================
// bearer_token
// =============================================================================

fn parts_with_auth(value: Option<&str>) -> Parts {
    let mut builder = axum::http::Request::builder().uri("/api/auth/me");
    if let Some(value) = value {
        builder = builder.header(AUTHORIZATION, value);
    }
    builder.body(()).unwrap().into_parts().0
}

#[test]
fn bearer_token_parses_scheme_case_insensitively() {
    assert_eq!(bearer_token(&parts_with_auth(Some("Bearer abc"))), Some("abc"));
    assert_eq!(bearer_token(&parts_with_auth(Some("bearer  abc "))), Some("abc"));
}

#[test]
fn bearer_token_rejects_other_schemes_and_blanks() {
    assert_eq!(bearer_token(&parts_with_auth(None)), None);
    assert_eq!(bearer_token(&parts_with_auth(Some("Basic abc"))), None);
    assert_eq!(bearer_token(&parts_with_auth(Some("Bearer "))), None);
    assert_eq!(bearer_token(&parts_with_auth(Some("Bearer"))), None);
}

// =============================================================================
// endpoints over HTTP
// =============================================================================

#[tokio::test]
async fn login_then_me_returns_account() {
    let base = spawn_server().await;
    let api = client(&base);

    let session = api.login(" A@B.com ", "honey").await.unwrap();
    assert_eq!(session.user.id, "1");
    assert_eq!(session.token.as_str().len(), 64);

    let me = api.fetch_current_user(&session.token).await.unwrap();
    assert_eq!(me.name, "A");
}

#[tokio::test]
async fn login_with_wrong_password_is_unauthorized() {
    let api = client(&spawn_server().await);
    let err = api.login("a@b.com", "wax").await.unwrap_err();
    assert!(matches!(err, ApiError::Status { status: 401, .. }));
    assert_eq!(err.reason(), "invalid email or password");
}

#[tokio::test]
async fn login_with_invalid_email_is_bad_request() {
    let api = client(&spawn_server().await);
    let err = api.login("not-an-email", "honey").await.unwrap_err();
    assert!(matches!(err, ApiError::Status { status: 400, .. }));
}

#[tokio::test]
async fn federated_account_cannot_password_login() {
    let api = client(&spawn_server().await);
    let err = api.login("fed@b.com", "").await.unwrap_err();
    assert!(matches!(err, ApiError::Status { status: 401, .. }));
}

#[tokio::test]
async fn me_with_unknown_token_is_unauthorized() {
    let api = client(&spawn_server().await);
    let err = api.fetch_current_user(&BearerToken::new("nope").unwrap()).await.unwrap_err();
    assert!(matches!(err, ApiError::Status { status: 401, .. }));
}

#[tokio::test]
async fn me_without_header_is_unauthorized() {
    let base = spawn_server().await;
    let resp = reqwest::get(format!("{base}/auth/me")).await.unwrap();
    assert_eq!(resp.status().as_u16(), 401);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn update_profile_round_trips() {
    let api = client(&spawn_server().await);
    let session = api.login("a@b.com", "honey").await.unwrap();

    let update = ProfileUpdate { name: Some("Queen".into()), avatar: None };
    let user = api.update_profile(&session.token, &update).await.unwrap();
    assert_eq!(user.name, "Queen");
    assert_eq!(api.fetch_current_user(&session.token).await.unwrap().name, "Queen");
}

#[tokio::test]
async fn update_profile_rejects_blank_name() {
    let api = client(&spawn_server().await);
    let session = api.login("a@b.com", "honey").await.unwrap();
    let update = ProfileUpdate { name: Some("  ".into()), avatar: None };
    let err = api.update_profile(&session.token, &update).await.unwrap_err();
    assert!(matches!(err, ApiError::Status { status: 400, .. }));
}

#[tokio::test]
async fn logout_revokes_token() {
    let api = client(&spawn_server().await);
    let session = api.login("a@b.com", "honey").await.unwrap();

    api.logout(&session.token).await.unwrap();
    let err = api.fetch_current_user(&session.token).await.unwrap_err();
    assert!(matches!(err, ApiError::Status { status: 401, .. }));
}

#[tokio::test]
async fn me_with_expired_token_is_unauthorized() {
    let accounts = AccountDirectory::from_seeds(seeds()).unwrap().with_session_ttl(Duration::from_millis(400));
    let api = client(&spawn_server_with(accounts).await);
    let session = api.login("a@b.com", "honey").await.unwrap();
    assert!(api.fetch_current_user(&session.token).await.is_ok());

    tokio::time::sleep(Duration::from_millis(700)).await;
    let err = api.fetch_current_user(&session.token).await.unwrap_err();
    assert!(matches!(err, ApiError::Status { status: 401, .. }));
}

#[tokio::test]
async fn healthz_is_ok() {
    let base = spawn_server().await;
    let root = base.trim_end_matches("/api");
    let body = reqwest::get(format!("{root}/healthz")).await.unwrap().text().await.unwrap();
    assert_eq!(body, "ok");
}

// =============================================================================
// bootstrap against the live server
// =============================================================================

#[tokio::test]
async fn login_persist_then_bootstrap_restores_session() {
    let base = spawn_server().await;
    let api = client(&base);
    let dir = tempfile::tempdir().unwrap();

    let session = api.login("a@b.com", "honey").await.unwrap();
    SessionStore::new(Arc::new(FileStorage::new(dir.path()))).login(session.token.clone(), session.user.clone());

    let reloaded = SessionStore::new(Arc::new(FileStorage::new(dir.path())));
    let phase = Bootstrapper::new(reloaded.clone(), api).run().await;

    assert_eq!(phase, AuthPhase::Authenticated);
    assert_eq!(reloaded.current_session().session, Some(session));
}

#[tokio::test]
async fn stale_local_profile_is_replaced_by_server_identity() {
    let base = spawn_server().await;
    let api = client(&base);
    let dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(FileStorage::new(dir.path()));

    let live = api.login("a@b.com", "honey").await.unwrap();
    let stale = Session { token: live.token.clone(), user: UserIdentity::new("1", "a@b.com", "") };
    save_session(storage.as_ref(), &stale).unwrap();

    let store = SessionStore::new(storage.clone());
    Bootstrapper::new(store.clone(), api).run().await;

    let snapshot = store.current_session();
    assert!(!snapshot.loading);
    assert_eq!(snapshot.user().map(|u| u.name.as_str()), Some("A"));
    let PersistedSession::Present(persisted) = load_session(storage.as_ref()) else {
        panic!("session should stay persisted");
    };
    assert_eq!(persisted.user.name, "A");
}

#[tokio::test]
async fn revoked_token_is_cleared_on_bootstrap() {
    let base = spawn_server().await;
    let dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(FileStorage::new(dir.path()));
    let seeded = Session::new(BearerToken::new("abc").unwrap(), UserIdentity::new("1", "a@b.com", "")).unwrap();
    save_session(storage.as_ref(), &seeded).unwrap();

    let store = SessionStore::new(storage.clone());
    let phase = Bootstrapper::new(store.clone(), client(&base)).run().await;

    assert_eq!(phase, AuthPhase::Unauthenticated);
    assert!(store.current_session().session.is_none());
    assert!(!store.current_session().loading);
    assert_eq!(storage.get(TOKEN_KEY).unwrap(), None);
}

#[tokio::test]
async fn unreachable_server_demotes() {
    // Bind and drop a listener to get a port nothing is serving on.
    let port = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };
    let dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(FileStorage::new(dir.path()));
    let seeded = Session::new(BearerToken::new("abc").unwrap(), UserIdentity::new("1", "a@b.com", "A")).unwrap();
    save_session(storage.as_ref(), &seeded).unwrap();

    let store = SessionStore::new(storage.clone());
    let phase = Bootstrapper::new(store.clone(), client(&format!("http://127.0.0.1:{port}/api"))).run().await;

    assert_eq!(phase, AuthPhase::Unauthenticated);
    assert_eq!(load_session(storage.as_ref()), PersistedSession::Absent);
}
