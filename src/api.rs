//! HTTP client for the storefront identity endpoints.
//!
//! SYSTEM CONTEXT
//! ==============
//! The bootstrapper only needs `IdentityService::verify`; the CLI also uses
//! the login/profile/logout calls. Every authorized request gets its
//! credential from `authorize`, never from client-wide default headers, so
//! nothing outside the session store can leak a stale token into a request.
//!
//! ERROR HANDLING
//! ==============
//! Response bodies are parsed by pure functions (`parse_user_response`,
//! `parse_login_response`) so the failure taxonomy is testable without a
//! server. Any non-2xx status or `success: false` envelope is an error.

use std::time::Duration;

use reqwest::header::AUTHORIZATION;
use serde::{Deserialize, Serialize};

use crate::config::{ClientConfig, Timeouts, normalize_base_url};
use crate::identity::{BearerToken, Session, UserIdentity};

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Transport-level failure: DNS, connect, TLS, reset, body read.
    #[error("request failed: {0}")]
    Request(String),

    #[error("server responded with status {status}")]
    Status { status: u16, message: Option<String> },

    /// 2xx response carrying `success: false`.
    #[error("server rejected the request: {0}")]
    Rejected(String),

    #[error("response parse failed: {0}")]
    Parse(String),

    #[error("HTTP client build failed: {0}")]
    ClientBuild(String),

    #[error("request timed out")]
    Timeout,
}

impl ApiError {
    /// Human-readable reason, preferring the server's message when it sent one.
    #[must_use]
    pub fn reason(&self) -> String {
        match self {
            Self::Status { message: Some(message), .. } | Self::Rejected(message) => message.clone(),
            other => other.to_string(),
        }
    }
}

/// Remote authority that decides whether a token is still valid.
#[async_trait::async_trait]
pub trait IdentityService: Send + Sync {
    /// Resolve `token` to the server's current view of the user.
    async fn verify(&self, token: &BearerToken) -> Result<UserIdentity, ApiError>;
}

#[async_trait::async_trait]
impl<T: IdentityService + ?Sized> IdentityService for std::sync::Arc<T> {
    async fn verify(&self, token: &BearerToken) -> Result<UserIdentity, ApiError> {
        (**self).verify(token).await
    }
}

/// Attach `Authorization: Bearer <token>` to a request.
#[must_use]
pub fn authorize(request: reqwest::RequestBuilder, token: &BearerToken) -> reqwest::RequestBuilder {
    request.header(AUTHORIZATION, token.header_value())
}

// =============================================================================
// WIRE TYPES
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Partial profile edit; absent fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

impl ProfileUpdate {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.avatar.is_none()
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    success: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    user: Option<UserIdentity>,
}

// =============================================================================
// CLIENT
// =============================================================================

/// `reqwest`-backed client for `{base}/auth/*`.
#[derive(Debug, Clone)]
pub struct HttpIdentityClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpIdentityClient {
    pub fn new(base_url: &str, timeouts: Timeouts) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeouts.request_secs))
            .connect_timeout(Duration::from_secs(timeouts.connect_secs))
            .build()
            .map_err(|e| ApiError::ClientBuild(e.to_string()))?;
        Ok(Self { http, base_url: normalize_base_url(base_url) })
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self, ApiError> {
        Self::new(&config.api_base_url, config.timeouts)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// `POST /auth/login`. Returns the session the store should record.
    pub async fn login(&self, email: &str, password: &str) -> Result<Session, ApiError> {
        let body = LoginRequest { email: email.to_owned(), password: password.to_owned() };
        let request = self.http.post(self.endpoint("/auth/login")).json(&body);
        let (status, text) = send(request).await?;
        parse_login_response(status, &text)
    }

    /// `GET /auth/me`.
    pub async fn fetch_current_user(&self, token: &BearerToken) -> Result<UserIdentity, ApiError> {
        let request = authorize(self.http.get(self.endpoint("/auth/me")), token);
        let (status, text) = send(request).await?;
        parse_user_response(status, &text)
    }

    /// `PATCH /auth/me`. Returns the updated identity.
    pub async fn update_profile(&self, token: &BearerToken, update: &ProfileUpdate) -> Result<UserIdentity, ApiError> {
        let request = authorize(self.http.patch(self.endpoint("/auth/me")), token).json(update);
        let (status, text) = send(request).await?;
        parse_user_response(status, &text)
    }

    /// `POST /auth/logout`. Revokes the token server-side.
    pub async fn logout(&self, token: &BearerToken) -> Result<(), ApiError> {
        let request = authorize(self.http.post(self.endpoint("/auth/logout")), token);
        let (status, text) = send(request).await?;
        parse_envelope(status, &text).map(|_| ())
    }
}

#[async_trait::async_trait]
impl IdentityService for HttpIdentityClient {
    async fn verify(&self, token: &BearerToken) -> Result<UserIdentity, ApiError> {
        self.fetch_current_user(token).await
    }
}

async fn send(request: reqwest::RequestBuilder) -> Result<(u16, String), ApiError> {
    let response = request.send().await.map_err(request_error)?;
    let status = response.status().as_u16();
    let text = response.text().await.map_err(request_error)?;
    Ok((status, text))
}

fn request_error(e: reqwest::Error) -> ApiError {
    if e.is_timeout() { ApiError::Timeout } else { ApiError::Request(e.to_string()) }
}

// =============================================================================
// PARSING
// =============================================================================

fn parse_envelope(status: u16, body: &str) -> Result<Envelope, ApiError> {
    if !(200..300).contains(&status) {
        let message = serde_json::from_str::<Envelope>(body).ok().and_then(|e| e.message);
        return Err(ApiError::Status { status, message });
    }
    let envelope: Envelope = serde_json::from_str(body).map_err(|e| ApiError::Parse(e.to_string()))?;
    if !envelope.success {
        return Err(ApiError::Rejected(envelope.message.unwrap_or_else(|| "success: false".to_owned())));
    }
    Ok(envelope)
}

fn take_user(envelope: &mut Envelope) -> Result<UserIdentity, ApiError> {
    let user = envelope.user.take().ok_or_else(|| ApiError::Parse("missing user".to_owned()))?;
    user.validate().map_err(|e| ApiError::Parse(e.to_string()))?;
    Ok(user)
}

/// Parse a `{success, user}` response.
pub fn parse_user_response(status: u16, body: &str) -> Result<UserIdentity, ApiError> {
    let mut envelope = parse_envelope(status, body)?;
    take_user(&mut envelope)
}

/// Parse a `{success, token, user}` response.
pub fn parse_login_response(status: u16, body: &str) -> Result<Session, ApiError> {
    let mut envelope = parse_envelope(status, body)?;
    let user = take_user(&mut envelope)?;
    let token = envelope
        .token
        .take()
        .ok_or_else(|| ApiError::Parse("missing token".to_owned()))
        .and_then(|raw| BearerToken::new(raw).map_err(|e| ApiError::Parse(e.to_string())))?;
    Ok(Session { token, user })
}

#[cfg(test)]
#[path = "api_test.rs"]
mod tests;
