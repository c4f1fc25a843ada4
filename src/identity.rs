//! Identity and credential types shared by the store, storage, and API layers.
//!
//! DESIGN
//! ======
//! A `Session` always carries both a token and a user. Code that needs
//! "maybe logged in" holds `Option<Session>`, so a token without an identity
//! (or the reverse) cannot be represented.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Errors raised when constructing or mutating session values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("bearer token is empty")]
    EmptyToken,
    #[error("user identity is missing `{0}`")]
    IncompleteIdentity(&'static str),
    #[error("no active session; login must happen before updating the user")]
    NoActiveSession,
}

// =============================================================================
// BEARER TOKEN
// =============================================================================

/// Opaque credential presented as `Authorization: Bearer <token>`.
///
/// `Debug` redacts the value so tokens never reach the logs.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BearerToken(String);

impl BearerToken {
    /// Wrap a raw token string. The value is kept byte for byte; only a
    /// blank token is rejected.
    pub fn new(raw: impl Into<String>) -> Result<Self, SessionError> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            return Err(SessionError::EmptyToken);
        }
        Ok(Self(raw))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Header value for the `Authorization` header.
    #[must_use]
    pub fn header_value(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BearerToken(***)")
    }
}

impl TryFrom<String> for BearerToken {
    type Error = SessionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<BearerToken> for String {
    fn from(token: BearerToken) -> Self {
        token.0
    }
}

// =============================================================================
// USER IDENTITY
// =============================================================================

/// How the account authenticates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthProvider {
    #[default]
    Local,
    Federated,
}

/// User record as stored locally and returned by `/auth/me`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserIdentity {
    pub id: String,
    pub email: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default, alias = "provider")]
    pub auth_provider: AuthProvider,
}

impl UserIdentity {
    /// Build a local-provider identity with no avatar.
    #[must_use]
    pub fn new(id: impl Into<String>, email: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: email.into(),
            name: name.into(),
            avatar: None,
            auth_provider: AuthProvider::Local,
        }
    }

    /// Check the minimum shape: a non-blank id and email.
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.id.trim().is_empty() {
            return Err(SessionError::IncompleteIdentity("id"));
        }
        if self.email.trim().is_empty() {
            return Err(SessionError::IncompleteIdentity("email"));
        }
        Ok(())
    }
}

// =============================================================================
// SESSION
// =============================================================================

/// Authenticated identity plus the credential that proves it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub token: BearerToken,
    pub user: UserIdentity,
}

impl Session {
    /// Pair a token with a validated identity.
    pub fn new(token: BearerToken, user: UserIdentity) -> Result<Self, SessionError> {
        user.validate()?;
        Ok(Self { token, user })
    }
}

#[cfg(test)]
#[path = "identity_test.rs"]
mod tests;
