//! # Session Registry
//!
//! Process-wide table of live sessions, keyed by the generated session id.
//! Lives as long as the process; nothing is persisted.
//!
//! ## Locking discipline:
//! One `RwLock` around the map, held only for the map operation itself and
//! never across I/O. Callers get `Arc<Session>` clones and do their slow work
//! (socket sends, closes) after the lock is released.

use crate::error::{RelayError, RelayResult};
use crate::session::Session;

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<String, Arc<Session>>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session under its own id.
    pub fn insert(&self, session: Arc<Session>) -> RelayResult<()> {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        if sessions.contains_key(session.id()) {
            return Err(RelayError::DuplicateSession(session.id().to_string()));
        }
        sessions.insert(session.id().to_string(), session);
        Ok(())
    }

    pub fn lookup(&self, session_id: &str) -> RelayResult<Arc<Session>> {
        let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        sessions
            .get(session_id)
            .cloned()
            .ok_or_else(|| RelayError::NotFound(session_id.to_string()))
    }

    /// Remove a session. Removing an absent id is a no-op.
    pub fn remove(&self, session_id: &str) -> Option<Arc<Session>> {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        sessions.remove(session_id)
    }

    pub fn contains(&self, session_id: &str) -> bool {
        let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        sessions.contains_key(session_id)
    }

    pub fn len(&self) -> usize {
        let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        sessions.len()
    }

    /// Snapshot of registered ids, used to drain sessions at shutdown.
    pub fn ids(&self) -> Vec<String> {
        let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        sessions.keys().cloned().collect()
    }
}
