//! In-memory account directory and bearer-session table.
//!
//! ARCHITECTURE
//! ============
//! Accounts are seeded from a JSON file at startup and never written back.
//! Passwords are kept only as SHA-256 hex digests. Sessions map a random
//! 32-byte hex token to a user id and live until logout or until their TTL
//! runs out. Expired entries read as absent and are pruned on the next login.

use std::collections::HashMap;
use std::fmt::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rand::Rng;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::api::ProfileUpdate;
use crate::identity::{AuthProvider, UserIdentity};

/// Session lifetime when none is configured.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);
/// Upper bound on any configured TTL.
pub const MAX_SESSION_TTL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

#[derive(Debug, thiserror::Error)]
pub enum AccountsError {
    #[error("failed to read accounts file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid accounts file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid account email: {0}")]
    InvalidEmail(String),
    #[error("duplicate account: {0}")]
    Duplicate(String),
    #[error("account {0} has a blank id")]
    BlankId(String),
}

/// One entry of the accounts file.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSeed {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub auth_provider: AuthProvider,
    /// Plain-text password; hashed on load. Federated accounts have none.
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Clone)]
struct Account {
    user: UserIdentity,
    password_hash: Option<String>,
}

pub(crate) fn bytes_to_hex(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(s, "{b:02x}");
    }
    s
}

/// Generate a cryptographically random 32-byte hex token.
#[must_use]
pub fn generate_token() -> String {
    let bytes: [u8; 32] = rand::rng().random();
    bytes_to_hex(&bytes)
}

#[must_use]
pub fn hash_password(password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    bytes_to_hex(&hasher.finalize())
}

/// Trim and lowercase; require exactly one `@` with text on both sides.
#[must_use]
pub fn normalize_email(email: &str) -> Option<String> {
    let normalized = email.trim().to_ascii_lowercase();
    let mut parts = normalized.split('@');
    let (Some(local), Some(domain), None) = (parts.next(), parts.next(), parts.next()) else {
        return None;
    };
    if local.is_empty() || domain.is_empty() || normalized.chars().any(char::is_whitespace) {
        return None;
    }
    Some(normalized)
}

#[derive(Debug, Clone)]
struct SessionEntry {
    user_id: String,
    expires_at: Instant,
}

impl SessionEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

#[derive(Debug)]
pub struct AccountDirectory {
    accounts: RwLock<HashMap<String, Account>>,
    ids_by_email: HashMap<String, String>,
    sessions: RwLock<HashMap<String, SessionEntry>>,
    session_ttl: Duration,
}

impl Default for AccountDirectory {
    fn default() -> Self {
        Self {
            accounts: RwLock::default(),
            ids_by_email: HashMap::new(),
            sessions: RwLock::default(),
            session_ttl: DEFAULT_SESSION_TTL,
        }
    }
}

impl AccountDirectory {
    pub fn from_seeds(seeds: Vec<AccountSeed>) -> Result<Self, AccountsError> {
        let mut accounts = HashMap::new();
        let mut ids_by_email = HashMap::new();
        for seed in seeds {
            let email = normalize_email(&seed.email).ok_or_else(|| AccountsError::InvalidEmail(seed.email.clone()))?;
            let id = seed.id.trim().to_owned();
            if id.is_empty() {
                return Err(AccountsError::BlankId(email));
            }
            if ids_by_email.insert(email.clone(), id.clone()).is_some() {
                return Err(AccountsError::Duplicate(email));
            }
            let user = UserIdentity {
                id: id.clone(),
                email,
                name: seed.name,
                avatar: seed.avatar,
                auth_provider: seed.auth_provider,
            };
            let password_hash = seed.password.as_deref().map(hash_password);
            if accounts.insert(id.clone(), Account { user, password_hash }).is_some() {
                return Err(AccountsError::Duplicate(id));
            }
        }
        Ok(Self { accounts: RwLock::new(accounts), ids_by_email, ..Self::default() })
    }

    /// Set how long new sessions stay valid. Capped at `MAX_SESSION_TTL`.
    #[must_use]
    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl.min(MAX_SESSION_TTL);
        self
    }

    #[must_use]
    pub fn session_ttl(&self) -> Duration {
        self.session_ttl
    }

    /// Load seeds from a JSON array file.
    pub fn load(path: &Path) -> Result<Self, AccountsError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|source| AccountsError::Io { path: path.to_path_buf(), source })?;
        let seeds: Vec<AccountSeed> = serde_json::from_str(&raw)?;
        Self::from_seeds(seeds)
    }

    pub async fn account_count(&self) -> usize {
        self.accounts.read().await.len()
    }

    /// Check a password login. Federated accounts never match.
    pub async fn authenticate(&self, email: &str, password: &str) -> Option<UserIdentity> {
        let email = normalize_email(email)?;
        let id = self.ids_by_email.get(&email)?;
        let accounts = self.accounts.read().await;
        let account = accounts.get(id)?;
        if account.user.auth_provider != AuthProvider::Local {
            return None;
        }
        let expected = account.password_hash.as_deref()?;
        (expected == hash_password(password)).then(|| account.user.clone())
    }

    /// Open a session for `user_id`, returning its token. Expired sessions
    /// are pruned first.
    pub async fn create_session(&self, user_id: &str) -> String {
        let token = generate_token();
        let now = Instant::now();
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, entry| entry.is_live(now));
        let pruned = before - sessions.len();
        if pruned > 0 {
            tracing::debug!(pruned, "pruned expired sessions");
        }
        let entry = SessionEntry { user_id: user_id.to_owned(), expires_at: now + self.session_ttl };
        sessions.insert(token.clone(), entry);
        token
    }

    /// Resolve a token to its user. Expired tokens read as absent.
    pub async fn validate_session(&self, token: &str) -> Option<UserIdentity> {
        let user_id = {
            let sessions = self.sessions.read().await;
            let entry = sessions.get(token)?;
            if !entry.is_live(Instant::now()) {
                return None;
            }
            entry.user_id.clone()
        };
        self.accounts.read().await.get(&user_id).map(|a| a.user.clone())
    }

    /// Number of entries in the session table, expired ones included.
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn update_profile(&self, user_id: &str, update: &ProfileUpdate) -> Option<UserIdentity> {
        let mut accounts = self.accounts.write().await;
        let account = accounts.get_mut(user_id)?;
        if let Some(name) = &update.name {
            account.user.name = name.trim().to_owned();
        }
        if let Some(avatar) = &update.avatar {
            let avatar = avatar.trim();
            account.user.avatar = (!avatar.is_empty()).then(|| avatar.to_owned());
        }
        Some(account.user.clone())
    }

    pub async fn delete_session(&self, token: &str) {
        self.sessions.write().await.remove(token);
    }
}

#[cfg(test)]
#[path = "accounts_test.rs"]
mod tests;
