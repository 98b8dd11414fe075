//! Session persistence — in-memory map with JSON write-through.
//!
//! Every stage transition persists the full session, so a crashed or
//! abandoned process can reload and resume suspended sessions. One pretty
//! printed JSON file per session id under the state directory; a store
//! without a state directory is purely in-memory (tests, demo runs).
//!
//! All mutation goes through [`SessionStore::update`], which applies a
//! closure under the write lock — the atomic-update primitive that keeps
//! concurrent writers from losing updates.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use tracing::{debug, warn};

use crate::session::state::SessionStatus;
use crate::session::types::{Session, SessionId};

/// Errors from session store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Session not found: {id}")]
    NotFound { id: SessionId },

    #[error("Store lock poisoned")]
    LockPoisoned,
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Thread-safe session store.
pub struct SessionStore {
    sessions: RwLock<HashMap<SessionId, Session>>,
    state_dir: Option<PathBuf>,
}

impl SessionStore {
    /// Purely in-memory store.
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            state_dir: None,
        }
    }

    /// Store persisting to `state_dir`, loading any sessions already
    /// present there.
    pub fn with_state_dir(state_dir: impl Into<PathBuf>) -> StoreResult<Self> {
        let state_dir = state_dir.into();
        fs::create_dir_all(&state_dir)?;

        let mut sessions = HashMap::new();
        for entry in fs::read_dir(&state_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match load_session_file(&path) {
                Ok(session) => {
                    sessions.insert(session.id.clone(), session);
                }
                Err(e) => {
                    warn!(path = %path.display(), "Skipping unreadable session file: {e}");
                }
            }
        }
        debug!(
            count = sessions.len(),
            dir = %state_dir.display(),
            "Loaded persisted sessions"
        );

        Ok(Self {
            sessions: RwLock::new(sessions),
            state_dir: Some(state_dir),
        })
    }

    /// Insert a new session and persist it.
    pub fn insert(&self, session: Session) -> StoreResult<()> {
        let mut sessions = self.sessions.write().map_err(|_| StoreError::LockPoisoned)?;
        self.persist(&session)?;
        sessions.insert(session.id.clone(), session);
        Ok(())
    }

    /// Latest persisted snapshot for a session id.
    pub fn get(&self, id: &str) -> StoreResult<Option<Session>> {
        let sessions = self.sessions.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(sessions.get(id).cloned())
    }

    /// Apply `f` to the stored session under the write lock, persist the
    /// result, and return the updated snapshot.
    ///
    /// Persisting happens under the same lock, so file contents never trail
    /// the in-memory state for a session id.
    pub fn update<F>(&self, id: &str, f: F) -> StoreResult<Session>
    where
        F: FnOnce(&mut Session),
    {
        let mut sessions = self.sessions.write().map_err(|_| StoreError::LockPoisoned)?;
        let session = sessions.get_mut(id).ok_or_else(|| StoreError::NotFound {
            id: id.to_string(),
        })?;
        f(session);
        session.touch();
        let snapshot = session.clone();
        self.persist(&snapshot)?;
        Ok(snapshot)
    }

    /// All sessions, unordered.
    pub fn list(&self) -> StoreResult<Vec<Session>> {
        let sessions = self.sessions.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(sessions.values().cloned().collect())
    }

    /// Sessions parked at the suspension point, for queue rebuilds.
    pub fn awaiting_approval(&self) -> StoreResult<Vec<Session>> {
        let sessions = self.sessions.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(sessions
            .values()
            .filter(|s| s.status == SessionStatus::AwaitingApproval)
            .cloned()
            .collect())
    }

    pub fn len(&self) -> usize {
        self.sessions.read().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn persist(&self, session: &Session) -> StoreResult<()> {
        let Some(dir) = &self.state_dir else {
            return Ok(());
        };
        let json = serde_json::to_string_pretty(session)?;
        fs::write(dir.join(format!("{}.json", session.id)), json)?;
        Ok(())
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

fn load_session_file(path: &Path) -> StoreResult<Session> {
    let contents = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}
