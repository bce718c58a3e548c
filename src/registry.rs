//! # Session Registry Module
//!
//! Thread-safe, process-lifetime storage of intake sessions keyed by the
//! Telegram user identifier.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info};

use crate::session::Session;

/// Shared handle to one user's session
pub type SessionHandle = Arc<AsyncMutex<Session>>;

/// Registry of in-progress intake sessions
///
/// Each user gets one session cell. Holding the cell's async lock serializes
/// turns for that user while other users proceed independently. The map lock
/// only guards insertion and removal and is never held across an await.
///
/// Sessions are not persisted and live until the process exits, unless
/// [`SessionRegistry::evict_idle`] is driven by a sweeper.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<i64, SessionHandle>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self) -> MutexGuard<'_, HashMap<i64, SessionHandle>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get or create the session cell for `user_id`
    pub fn handle(&self, user_id: i64) -> SessionHandle {
        let mut sessions = self.map();
        Arc::clone(sessions.entry(user_id).or_insert_with(|| {
            debug!(user_id, "Creating new intake session");
            Arc::new(AsyncMutex::new(Session::new(user_id)))
        }))
    }

    /// Snapshot of the session for `user_id`, creating an empty one first
    pub async fn get_or_create(&self, user_id: i64) -> Session {
        let handle = self.handle(user_id);
        let session = handle.lock().await;
        session.clone()
    }

    /// Replace the stored session for `user_id`
    pub async fn update(&self, user_id: i64, session: Session) {
        let handle = self.handle(user_id);
        *handle.lock().await = session;
    }

    pub fn len(&self) -> usize {
        self.map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map().is_empty()
    }

    /// Remove sessions idle for longer than `max_idle` as of `now`.
    ///
    /// Sessions that someone else holds a handle to are kept, locked or not:
    /// a turn that has fetched its handle but not yet taken the lock must
    /// commit into the cell the registry still serves.
    pub fn evict_idle(&self, max_idle: Duration, now: DateTime<Utc>) -> usize {
        let Ok(max_idle) = chrono::Duration::from_std(max_idle) else {
            return 0;
        };
        let mut sessions = self.map();
        let before = sessions.len();
        sessions.retain(|_, handle| {
            if Arc::strong_count(handle) > 1 {
                return true;
            }
            match handle.try_lock() {
                Ok(session) => now - session.last_activity <= max_idle,
                Err(_) => true,
            }
        });
        let evicted = before - sessions.len();
        if evicted > 0 {
            info!(evicted, remaining = sessions.len(), "Evicted idle sessions");
        }
        evicted
    }
}
