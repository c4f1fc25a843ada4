//! Auth routes: password login, bearer-token identity, profile edits, logout.
//!
//! Every response is a `{success, ...}` envelope; failures also carry a
//! `message`. The client treats any non-2xx status as a failed check.

use axum::extract::{FromRef, FromRequestParts, State};
use axum::http::StatusCode;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;

use super::AppState;
use super::accounts::normalize_email;
use crate::api::{LoginRequest, ProfileUpdate};
use crate::identity::UserIdentity;

fn failure(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "success": false, "message": message }))).into_response()
}

fn user_envelope(user: &UserIdentity) -> Response {
    Json(json!({ "success": true, "user": user })).into_response()
}

/// Extract the token from `Authorization: Bearer <token>`.
pub(crate) fn bearer_token(parts: &Parts) -> Option<&str> {
    let raw = parts.headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = raw.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

// =============================================================================
// AUTH EXTRACTOR
// =============================================================================

/// Caller authenticated by bearer token.
/// Use as a handler parameter to require authentication.
pub struct BearerUser {
    pub user: UserIdentity,
    pub token: String,
}

impl<S> FromRequestParts<S> for BearerUser
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Some(token) = bearer_token(parts) else {
            return Err(failure(StatusCode::UNAUTHORIZED, "missing bearer token"));
        };
        let app_state = AppState::from_ref(state);
        let Some(user) = app_state.accounts.validate_session(token).await else {
            return Err(failure(StatusCode::UNAUTHORIZED, "invalid or expired token"));
        };
        Ok(Self { user, token: token.to_owned() })
    }
}

// =============================================================================
// HANDLERS
// =============================================================================

/// `POST /api/auth/login`: check credentials, open a session.
pub async fn login(State(state): State<AppState>, Json(body): Json<LoginRequest>) -> Response {
    if normalize_email(&body.email).is_none() {
        return failure(StatusCode::BAD_REQUEST, "invalid email address");
    }
    let Some(user) = state.accounts.authenticate(&body.email, &body.password).await else {
        tracing::info!("login rejected");
        return failure(StatusCode::UNAUTHORIZED, "invalid email or password");
    };

    let token = state.accounts.create_session(&user.id).await;
    tracing::info!(user_id = %user.id, "login succeeded");
    Json(json!({ "success": true, "token": token, "user": user })).into_response()
}

/// `GET /api/auth/me`: return the authenticated user.
pub async fn me(auth: BearerUser) -> Response {
    user_envelope(&auth.user)
}

/// `PATCH /api/auth/me`: edit display name and avatar.
pub async fn update_me(State(state): State<AppState>, auth: BearerUser, Json(update): Json<ProfileUpdate>) -> Response {
    if update.name.as_deref().is_some_and(|name| name.trim().is_empty()) {
        return failure(StatusCode::BAD_REQUEST, "name must not be blank");
    }
    match state.accounts.update_profile(&auth.user.id, &update).await {
        Some(user) => user_envelope(&user),
        None => failure(StatusCode::NOT_FOUND, "account no longer exists"),
    }
}

/// `POST /api/auth/logout`: revoke the presented token.
pub async fn logout(State(state): State<AppState>, auth: BearerUser) -> Response {
    state.accounts.delete_session(&auth.token).await;
    tracing::info!(user_id = %auth.user.id, "logout");
    Json(json!({ "success": true })).into_response()
}

#[cfg(test)]
#[path = "auth_test.rs"]
mod tests;
