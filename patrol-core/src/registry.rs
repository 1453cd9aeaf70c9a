//! Session registry
//!
//! Owned, lock-guarded map of user key → in-flight [`Session`]. The command
//! path inserts and removes; the monitor updates entries in place. Every
//! accessor takes the lock for the duration of one operation only, so no
//! caller ever holds it across I/O.

use std::collections::HashMap;

use tokio::sync::RwLock;

use crate::error::PatrolError;
use crate::models::Session;

#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Session>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bulk-load restored sessions. A user who is already tracked keeps the
    /// in-memory entry; a conflicting open row for them is logged. Returns how
    /// many sessions were newly loaded.
    pub async fn restore(&self, sessions: Vec<Session>) -> usize {
        let mut map = self.sessions.write().await;
        let mut loaded = 0;
        for session in sessions {
            if let Some(existing) = map.get(session.user_key()) {
                if existing.record_id() == session.record_id() {
                    continue;
                }
                tracing::warn!(
                    user_key = %session.user_key(),
                    kept_record = existing.record_id(),
                    skipped_record = session.record_id(),
                    "Skipping duplicate open patrol during restore"
                );
                continue;
            }
            map.insert(session.user_key().to_string(), session);
            loaded += 1;
        }
        loaded
    }

    pub async fn insert(&self, session: Session) -> Result<(), PatrolError> {
        let mut map = self.sessions.write().await;
        if map.contains_key(session.user_key()) {
            return Err(PatrolError::DuplicateSession {
                user_key: session.user_key().to_string(),
            });
        }
        map.insert(session.user_key().to_string(), session);
        Ok(())
    }

    /// Removing an untracked user is not an error.
    pub async fn remove(&self, user_key: &str) -> Option<Session> {
        self.sessions.write().await.remove(user_key)
    }

    /// Apply `f` to the session for `user_key`, but only if it is still the
    /// same patrol (`record_id`). A patrol that ended, or ended and restarted,
    /// since the caller's snapshot is left alone and `None` is returned.
    pub async fn update<R>(
        &self,
        user_key: &str,
        record_id: i64,
        f: impl FnOnce(&mut Session) -> R,
    ) -> Option<R> {
        let mut map = self.sessions.write().await;
        match map.get_mut(user_key) {
            Some(session) if session.record_id() == record_id => Some(f(session)),
            _ => None,
        }
    }

    /// Point-in-time copy, ordered by user key.
    pub async fn snapshot(&self) -> Vec<Session> {
        let map = self.sessions.read().await;
        let mut sessions: Vec<Session> = map.values().cloned().collect();
        sessions.sort_by(|a, b| a.user_key().cmp(b.user_key()));
        sessions
    }

    pub async fn get(&self, user_key: &str) -> Option<Session> {
        self.sessions.read().await.get(user_key).cloned()
    }

    pub async fn contains(&self, user_key: &str) -> bool {
        self.sessions.read().await.contains_key(user_key)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}
