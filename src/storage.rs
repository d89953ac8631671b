//! Session Storage Module
//!
//! Persists the session document to the user data directory.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

const SESSION_FILE: &str = "session.json";

/// Coarse authorization class, derived from profile flags after login.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Customer,
    Staff,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Customer => write!(f, "customer"),
            Role::Staff => write!(f, "staff"),
        }
    }
}

/// Session state persisted across restarts.
///
/// Invariant: `access_token` and `refresh_token` are both present or both
/// absent, except transiently while a refresh is in flight.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Session {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub role: Option<Role>,
    pub telegram_init_data: Option<String>,
    pub view_mode: Option<String>,
}

impl Session {
    pub fn is_authenticated(&self) -> bool {
        self.access_token.is_some()
    }
}

/// On-disk wrapper; `saved_at` is write metadata, not session state.
#[derive(Debug, Serialize, Deserialize)]
struct SessionDocument {
    saved_at: DateTime<Utc>,
    #[serde(flatten)]
    session: Session,
}

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Durable store for the [`Session`].
///
/// Mutations persist synchronously as a single JSON document written via a
/// temp file and rename, so a concurrent reload observes either the old or
/// the new session, never a partial one. Operations are total: persistence
/// failures are logged and the in-memory session stays authoritative.
pub struct SessionStore {
    path: PathBuf,
    session: Mutex<Session>,
}

impl SessionStore {
    /// Open the store, reloading any session persisted in `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        if let Err(e) = std::fs::create_dir_all(&dir) {
            error!("Failed to create storage directory: {e}");
        }

        let path = dir.join(SESSION_FILE);
        let session = match Self::read_document(&path) {
            Ok(session) => session,
            Err(StorageError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                Session::default()
            }
            Err(e) => {
                warn!("Discarding unreadable session document: {e}");
                Session::default()
            }
        };

        debug!("Session store initialized at: {:?}", path);

        Self {
            path,
            session: Mutex::new(session),
        }
    }

    /// Snapshot of the current session.
    pub fn session(&self) -> Session {
        self.session.lock().unwrap().clone()
    }

    pub fn access_token(&self) -> Option<String> {
        self.session.lock().unwrap().access_token.clone()
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.session.lock().unwrap().refresh_token.clone()
    }

    pub fn role(&self) -> Option<Role> {
        self.session.lock().unwrap().role
    }

    pub fn telegram_init_data(&self) -> Option<String> {
        self.session.lock().unwrap().telegram_init_data.clone()
    }

    /// Apply a partial mutation and persist the result.
    pub fn update(&self, f: impl FnOnce(&mut Session)) {
        let mut session = self.session.lock().unwrap();
        f(&mut session);
        self.persist(&session);
    }

    /// Store a token pair from a login or refresh response.
    ///
    /// A refresh response may omit the rotated refresh token, in which case
    /// the stored one is retained.
    pub fn set_tokens(&self, access: String, refresh: Option<String>) {
        self.update(|session| {
            session.access_token = Some(access);
            if let Some(refresh) = refresh {
                session.refresh_token = Some(refresh);
            }
        });
    }

    pub fn set_role(&self, role: Role) {
        self.update(|session| session.role = Some(role));
    }

    pub fn set_telegram_init_data(&self, init_data: &str) {
        self.update(|session| session.telegram_init_data = Some(init_data.to_string()));
    }

    pub fn set_view_mode(&self, mode: &str) {
        self.update(|session| session.view_mode = Some(mode.to_string()));
    }

    /// Reset every persisted field.
    pub fn clear(&self) {
        let mut session = self.session.lock().unwrap();
        *session = Session::default();
        self.persist(&session);
    }

    fn persist(&self, session: &Session) {
        let document = SessionDocument {
            saved_at: Utc::now(),
            session: session.clone(),
        };
        if let Err(e) = self.write_document(&document) {
            error!("Failed to persist session: {e}");
        }
    }

    fn write_document(&self, document: &SessionDocument) -> Result<(), StorageError> {
        let json = serde_json::to_vec_pretty(document)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn read_document(path: &Path) -> Result<Session, StorageError> {
        let raw = std::fs::read(path)?;
        let document: SessionDocument = serde_json::from_slice(&raw)?;
        Ok(document.session)
    }
}
