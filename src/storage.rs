//! Durable client-side storage for the persisted session record.
//!
//! SYSTEM CONTEXT
//! ==============
//! The record lives in two string slots, `token` and `user` (JSON), the same
//! shape a browser keeps in `localStorage`. Backends only speak strings; the
//! helpers at the bottom of this module own the record format.
//!
//! ERROR HANDLING
//! ==============
//! A corrupt backing file is reported on read and silently replaced on the
//! next write, so one bad file never wedges login/logout.

use std::collections::{BTreeMap, HashMap};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use crate::identity::{BearerToken, Session, UserIdentity};

/// Slot holding the raw bearer token.
pub const TOKEN_KEY: &str = "token";
/// Slot holding the serialized user identity.
pub const USER_KEY: &str = "user";

const FILE_NAME: &str = "session.json";

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage io failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("storage file {0} is corrupt")]
    Corrupt(PathBuf),
    #[error("storage serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// String-keyed durable slots.
pub trait SessionStorage: Send + Sync {
    /// Read a slot. A missing slot is `Ok(None)`.
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Write several slots. Backends that can commit them in one step
    /// override this; the default writes them one at a time.
    fn set_all(&self, entries: &[(&str, &str)]) -> Result<(), StorageError> {
        for (key, value) in entries {
            self.set(key, value)?;
        }
        Ok(())
    }

    /// Delete a slot. Removing a missing slot succeeds.
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

// =============================================================================
// MEMORY STORAGE
// =============================================================================

/// Process-local storage. Used by tests and hosts without a disk.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    slots: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStorage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(slots.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.set_all(&[(key, value)])
    }

    fn set_all(&self, entries: &[(&str, &str)]) -> Result<(), StorageError> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        for (key, value) in entries {
            slots.insert((*key).to_owned(), (*value).to_owned());
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.remove(key);
        Ok(())
    }
}

// =============================================================================
// FILE STORAGE
// =============================================================================

/// Slots kept as one JSON object in `<dir>/session.json`.
///
/// Writes go to a temp file that is renamed over the original, so a crash
/// mid-write leaves either the old or the new contents.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStorage {
    #[must_use]
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self { path: dir.as_ref().join(FILE_NAME), lock: Mutex::new(()) }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> StorageError {
        StorageError::Io { path: self.path.clone(), source }
    }

    fn read_map(&self) -> Result<BTreeMap<String, String>, StorageError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(self.io_error(e)),
        };
        serde_json::from_str(&raw).map_err(|_| StorageError::Corrupt(self.path.clone()))
    }

    /// Like `read_map`, but a corrupt file reads as empty so the next write replaces it.
    fn read_map_for_write(&self) -> Result<(BTreeMap<String, String>, bool), StorageError> {
        match self.read_map() {
            Ok(map) => Ok((map, false)),
            Err(StorageError::Corrupt(path)) => {
                tracing::warn!(path = %path.display(), "replacing corrupt session storage file");
                Ok((BTreeMap::new(), true))
            }
            Err(e) => Err(e),
        }
    }

    fn write_map(&self, map: &BTreeMap<String, String>) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }
        let raw = serde_json::to_string_pretty(map)?;
        let tmp = self.path.with_extension("json.tmp");
        let mut file = std::fs::File::create(&tmp).map_err(|e| self.io_error(e))?;
        file.write_all(raw.as_bytes()).map_err(|e| self.io_error(e))?;
        file.sync_all().map_err(|e| self.io_error(e))?;
        drop(file);
        std::fs::rename(&tmp, &self.path).map_err(|e| self.io_error(e))
    }
}

impl SessionStorage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(self.read_map()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.set_all(&[(key, value)])
    }

    /// All entries land in one rename.
    fn set_all(&self, entries: &[(&str, &str)]) -> Result<(), StorageError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let (mut map, _) = self.read_map_for_write()?;
        for (key, value) in entries {
            map.insert((*key).to_owned(), (*value).to_owned());
        }
        self.write_map(&map)
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let (mut map, was_corrupt) = self.read_map_for_write()?;
        if map.remove(key).is_none() && !was_corrupt {
            return Ok(());
        }
        self.write_map(&map)
    }
}

// =============================================================================
// PERSISTED SESSION RECORD
// =============================================================================

/// Outcome of reading the persisted record at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistedSession {
    Absent,
    /// Present but unusable; the reason is for logs only.
    Malformed(String),
    Present(Session),
}

/// Read and validate both slots.
pub fn load_session(storage: &dyn SessionStorage) -> PersistedSession {
    let token = storage.get(TOKEN_KEY);
    let user = storage.get(USER_KEY);
    let (token, user) = match (token, user) {
        (Ok(token), Ok(user)) => (token, user),
        (Err(e), _) | (_, Err(e)) => return PersistedSession::Malformed(e.to_string()),
    };

    match (token, user) {
        (None, None) => PersistedSession::Absent,
        (Some(_), None) => PersistedSession::Malformed("token present without user".into()),
        (None, Some(_)) => PersistedSession::Malformed("user present without token".into()),
        (Some(token), Some(user)) => parse_record(token, &user),
    }
}

fn parse_record(token: String, user: &str) -> PersistedSession {
    let token = match BearerToken::new(token) {
        Ok(token) => token,
        Err(e) => return PersistedSession::Malformed(e.to_string()),
    };
    let user: UserIdentity = match serde_json::from_str(user) {
        Ok(user) => user,
        Err(e) => return PersistedSession::Malformed(format!("user record: {e}")),
    };
    match Session::new(token, user) {
        Ok(session) => PersistedSession::Present(session),
        Err(e) => PersistedSession::Malformed(e.to_string()),
    }
}

/// Write both slots together.
pub fn save_session(storage: &dyn SessionStorage, session: &Session) -> Result<(), StorageError> {
    let user = serde_json::to_string(&session.user)?;
    storage.set_all(&[(TOKEN_KEY, session.token.as_str()), (USER_KEY, &user)])
}

/// Remove both slots. Both removals are attempted; the first error wins.
pub fn clear_session(storage: &dyn SessionStorage) -> Result<(), StorageError> {
    let token = storage.remove(TOKEN_KEY);
    let user = storage.remove(USER_KEY);
    token.and(user)
}

#[cfg(test)]
#[path = "storage_test.rs"]
mod tests;
