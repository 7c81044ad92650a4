//! Session lifecycle
//!
//! One `Option<Session>` holds token and user together, so one is never
//! present without the other. The durable copy lives behind a
//! [`SessionBackend`]; memory is only updated once the backend accepted it.

use keyring::Entry;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use crate::models::User;

const KEYRING_SERVICE: &str = "plantwatch";
const KEYRING_TOKEN: &str = "token";
const KEYRING_USER: &str = "user";

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session storage IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupted session data: {0}")]
    Json(#[from] serde_json::Error),
    #[error("keyring error: {0}")]
    Keyring(#[from] keyring::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub token: String,
    pub user: User,
}

/// Durable storage for the current session
pub trait SessionBackend: Send + Sync {
    fn load(&self) -> Result<Option<Session>, SessionError>;
    fn store(&self, session: &Session) -> Result<(), SessionError>;
    fn clear(&self) -> Result<(), SessionError>;
}

/// JSON file, written through a temp file and renamed into place
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

impl SessionBackend for FileBackend {
    fn load(&self) -> Result<Option<Session>, SessionError> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn store(&self, session: &Session) -> Result<(), SessionError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(session)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn clear(&self) -> Result<(), SessionError> {
        match std::fs::remove_file(&self.path) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

/// OS keyring: token and serialized user as two entries
pub struct KeyringBackend {
    service: String,
}

impl Default for KeyringBackend {
    fn default() -> Self {
        Self { service: KEYRING_SERVICE.to_string() }
    }
}

impl KeyringBackend {
    fn entry(&self, name: &str) -> Result<Entry, SessionError> {
        Ok(Entry::new(&self.service, name)?)
    }

    fn read(&self, name: &str) -> Result<Option<String>, SessionError> {
        match self.entry(name)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn delete(&self, name: &str) -> Result<(), SessionError> {
        match self.entry(name)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl SessionBackend for KeyringBackend {
    fn load(&self) -> Result<Option<Session>, SessionError> {
        let (Some(token), Some(user)) = (self.read(KEYRING_TOKEN)?, self.read(KEYRING_USER)?) else {
            return Ok(None);
        };
        Ok(Some(Session { token, user: serde_json::from_str(&user)? }))
    }

    fn store(&self, session: &Session) -> Result<(), SessionError> {
        let user = serde_json::to_string(&session.user)?;
        self.entry(KEYRING_TOKEN)?.set_password(&session.token)?;
        if let Err(e) = self.entry(KEYRING_USER)?.set_password(&user) {
            let _ = self.delete(KEYRING_TOKEN);
            return Err(e.into());
        }
        Ok(())
    }

    fn clear(&self) -> Result<(), SessionError> {
        let token = self.delete(KEYRING_TOKEN);
        let user = self.delete(KEYRING_USER);
        token.and(user)
    }
}

#[derive(Default)]
pub struct MemoryBackend {
    slot: RwLock<Option<Session>>,
}

impl SessionBackend for MemoryBackend {
    fn load(&self) -> Result<Option<Session>, SessionError> {
        Ok(self.slot.read().clone())
    }

    fn store(&self, session: &Session) -> Result<(), SessionError> {
        *self.slot.write() = Some(session.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), SessionError> {
        *self.slot.write() = None;
        Ok(())
    }
}

struct Inner {
    current: RwLock<Option<Session>>,
    backend: Box<dyn SessionBackend>,
}

/// Cloneable handle on the session, injected into the gateway and views
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("user", &self.user().map(|u| u.email))
            .finish()
    }
}

impl SessionStore {
    /// Empty store; nothing is read from the backend
    pub fn new(backend: Box<dyn SessionBackend>) -> Self {
        Self {
            inner: Arc::new(Inner { current: RwLock::new(None), backend }),
        }
    }

    /// Store restored from the backend. Unreadable data is discarded.
    pub fn init(backend: Box<dyn SessionBackend>) -> Self {
        let restored = match backend.load() {
            Ok(session) => session,
            Err(e) => {
                warn!("discarding unreadable session: {e}");
                if let Err(e) = backend.clear() {
                    warn!("could not clear session storage: {e}");
                }
                None
            }
        };
        if let Some(session) = &restored {
            info!("restored session for {}", session.user.email);
        }
        Self {
            inner: Arc::new(Inner { current: RwLock::new(restored), backend }),
        }
    }

    pub fn login(&self, session: Session) -> Result<(), SessionError> {
        self.inner.backend.store(&session)?;
        *self.inner.current.write() = Some(session);
        Ok(())
    }

    /// Clear memory and storage. Memory is cleared even if storage fails.
    pub fn logout(&self) -> Result<(), SessionError> {
        self.inner.current.write().take();
        self.inner.backend.clear()
    }

    /// Drop the session after an authorization-expired answer.
    /// Returns whether a session was actually active.
    pub fn expire(&self) -> bool {
        let had_session = self.inner.current.write().take().is_some();
        if let Err(e) = self.inner.backend.clear() {
            warn!("could not clear expired session: {e}");
        }
        had_session
    }

    pub fn token(&self) -> Option<String> {
        self.inner.current.read().as_ref().map(|s| s.token.clone())
    }

    pub fn user(&self) -> Option<User> {
        self.inner.current.read().as_ref().map(|s| s.user.clone())
    }

    pub fn current(&self) -> Option<Session> {
        self.inner.current.read().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.current.read().is_some()
    }

    pub fn is_admin(&self) -> bool {
        self.inner.current.read().as_ref().is_some_and(|s| s.user.is_admin())
    }
}
