//! Session Store (§4.14, §3 Session). Cache-first, store-fallback; the
//! session record has one authoritative owner-task location — the cache is a
//! read-through accelerator, never a second source of truth.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Pending,
    Active,
    Completed,
    Error,
    Expired,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub user_id: String,
    pub status: SessionStatus,
    pub context: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session not found")]
    NotFound,
    #[error("session expired")]
    Expired,
}

/// In-memory cache; in a full deployment the durable record lives in the
/// vector store's database alongside documents/chunks, this core owns only
/// the cache and the authoritative in-process copy.
pub struct SessionStore {
    sessions: RwLock<HashMap<Uuid, Session>>,
    active_count: AtomicU64,
}

impl SessionStore {
    pub fn new() -> Self {
        Self { sessions: RwLock::new(HashMap::new()), active_count: AtomicU64::new(0) }
    }

    pub fn create_session(&self, user_id: String, context: Value, ttl: ChronoDuration) -> Session {
        let now = Utc::now();
        let session = Session {
            id: Uuid::new_v4(),
            user_id,
            status: SessionStatus::Pending,
            context,
            created_at: now,
            updated_at: now,
            expires_at: now + ttl,
        };
        self.sessions.write().insert(session.id, session.clone());
        self.active_count.fetch_add(1, Ordering::SeqCst);
        session
    }

    /// Cache-first, store-fallback: only non-expired sessions are returned.
    pub fn get_session(&self, id: Uuid) -> Result<Session, SessionError> {
        let sessions = self.sessions.read();
        let session = sessions.get(&id).ok_or(SessionError::NotFound)?;
        if session.is_expired(Utc::now()) {
            return Err(SessionError::Expired);
        }
        Ok(session.clone())
    }

    pub fn update_status(&self, id: Uuid, status: SessionStatus) -> Result<(), SessionError> {
        let mut sessions = self.sessions.write();
        let session = sessions.get_mut(&id).ok_or(SessionError::NotFound)?;
        session.status = status;
        session.updated_at = Utc::now();
        Ok(())
    }

    pub fn update_context(&self, id: Uuid, context: Value) -> Result<(), SessionError> {
        let mut sessions = self.sessions.write();
        let session = sessions.get_mut(&id).ok_or(SessionError::NotFound)?;
        session.context = context;
        session.updated_at = Utc::now();
        Ok(())
    }

    pub fn end_session(&self, id: Uuid) -> Result<(), SessionError> {
        self.update_status(id, SessionStatus::Completed)?;
        self.active_count.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }

    /// Cleanup sweep (§4.14): evicts expired entries, decrements the
    /// active-session counter for each one removed. Run every 60s.
    pub fn sweep_expired(&self) -> usize {
        let now = Utc::now();
        let mut sessions = self.sessions.write();
        let expired: Vec<Uuid> = sessions.iter().filter(|(_, s)| s.is_expired(now)).map(|(id, _)| *id).collect();
        for id in &expired {
            sessions.remove(id);
            self.active_count.fetch_sub(1, Ordering::SeqCst);
        }
        expired.len()
    }

    pub fn active_count(&self) -> u64 {
        self.active_count.load(Ordering::SeqCst)
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_get_round_trips() {
        let store = SessionStore::new();
        let session = store.create_session("user-1".into(), serde_json::json!({}), ChronoDuration::minutes(30));
        let fetched = store.get_session(session.id).unwrap();
        assert_eq!(fetched.user_id, "user-1");
        assert_eq!(fetched.status, SessionStatus::Pending);
    }

    #[test]
    fn expired_session_is_not_returned() {
        let store = SessionStore::new();
        let session = store.create_session("user-1".into(), serde_json::json!({}), ChronoDuration::seconds(-1));
        let result = store.get_session(session.id);
        assert!(matches!(result, Err(SessionError::Expired)));
    }

    #[test]
    fn unknown_session_is_not_found() {
        let store = SessionStore::new();
        assert!(matches!(store.get_session(Uuid::new_v4()), Err(SessionError::NotFound)));
    }

    #[test]
    fn update_status_and_context_are_write_through() {
        let store = SessionStore::new();
        let session = store.create_session("u".into(), serde_json::json!({}), ChronoDuration::minutes(5));
        store.update_status(session.id, SessionStatus::Active).unwrap();
        store.update_context(session.id, serde_json::json!({"k": "v"})).unwrap();
        let fetched = store.get_session(session.id).unwrap();
        assert_eq!(fetched.status, SessionStatus::Active);
        assert_eq!(fetched.context, serde_json::json!({"k": "v"}));
    }

    #[test]
    fn sweep_evicts_expired_and_decrements_active_count() {
        let store = SessionStore::new();
        store.create_session("u1".into(), serde_json::json!({}), ChronoDuration::seconds(-1));
        store.create_session("u2".into(), serde_json::json!({}), ChronoDuration::minutes(30));
        assert_eq!(store.active_count(), 2);
        let evicted = store.sweep_expired();
        assert_eq!(evicted, 1);
        assert_eq!(store.active_count(), 1);
    }

    #[test]
    fn end_session_decrements_active_count() {
        let store = SessionStore::new();
        let session = store.create_session("u".into(), serde_json::json!({}), ChronoDuration::minutes(5));
        store.end_session(session.id).unwrap();
        assert_eq!(store.active_count(), 0);
        assert_eq!(store.get_session(session.id).unwrap().status, SessionStatus::Completed);
    }
}
