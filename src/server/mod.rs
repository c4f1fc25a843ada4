//! Reference identity server for the storefront admin API.
//!
//! SYSTEM CONTEXT
//! ==============
//! Implements the auth contract the session bootstrapper relies on
//! (`/api/auth/me` and friends). Backed by an in-memory account directory,
//! so it suits local development and end-to-end tests.

pub mod accounts;
pub mod auth;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

use crate::config::ServerConfig;
use accounts::{AccountDirectory, AccountsError};

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("accounts: {0}")]
    Accounts(#[from] AccountsError),
    #[error("server io failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Shared state, injected into handlers via the `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub accounts: Arc<AccountDirectory>,
}

impl AppState {
    #[must_use]
    pub fn new(accounts: AccountDirectory) -> Self {
        Self { accounts: Arc::new(accounts) }
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/me", get(auth::me).patch(auth::update_me))
        .route("/api/auth/logout", post(auth::logout))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

/// Bind `0.0.0.0:<port>` and serve until the process exits.
pub async fn serve(config: ServerConfig) -> Result<(), ServerError> {
    let accounts = match &config.accounts_path {
        Some(path) => AccountDirectory::load(path)?,
        None => {
            tracing::warn!("APIARY_ACCOUNTS not set; serving with no accounts");
            AccountDirectory::default()
        }
    };
    let accounts = accounts.with_session_ttl(Duration::from_secs(config.session_ttl_secs));
    tracing::info!(
        accounts = accounts.account_count().await,
        session_ttl = ?accounts.session_ttl(),
        "account directory loaded"
    );

    let app = app(AppState::new(accounts));
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
    tracing::info!(port = config.port, "apiary identity server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
