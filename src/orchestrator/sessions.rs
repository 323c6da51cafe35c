//! Registry for concurrent tutoring sessions.
//!
//! Uses `RwLock` for the registry (many reads, few writes) and a `Mutex`
//! per session state. Exactly one [`SessionState`] exists per live session
//! id; `Dispatch` and the pipeline task share it through the session's own
//! lock.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

use crate::models::SessionState;

pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<Mutex<SessionState>>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Get or create the state for a session id.
    pub async fn get_or_create(&self, session_id: &str) -> Arc<Mutex<SessionState>> {
        // Fast path: existing session under the read lock.
        {
            let sessions = self.sessions.read().await;
            if let Some(state) = sessions.get(session_id) {
                return Arc::clone(state);
            }
        }

        let mut sessions = self.sessions.write().await;
        // Double-check in case another task created it.
        if let Some(state) = sessions.get(session_id) {
            return Arc::clone(state);
        }

        let state = Arc::new(Mutex::new(SessionState::new(session_id)));
        sessions.insert(session_id.to_string(), Arc::clone(&state));
        state
    }

    /// Get an existing session state.
    pub async fn get(&self, session_id: &str) -> Option<Arc<Mutex<SessionState>>> {
        let sessions = self.sessions.read().await;
        sessions.get(session_id).map(Arc::clone)
    }

    /// Remove a session from the registry.
    pub async fn remove(&self, session_id: &str) -> Option<Arc<Mutex<SessionState>>> {
        let mut sessions = self.sessions.write().await;
        sessions.remove(session_id)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_or_create_returns_the_same_state() {
        let registry = SessionRegistry::new();
        let first = registry.get_or_create("s1").await;
        first.lock().await.mark_routing();

        let second = registry.get_or_create("s1").await;
        assert_eq!(second.lock().await.turn_skip_counter, 1);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn sessions_do_not_share_state() {
        let registry = SessionRegistry::new();
        registry.get_or_create("s1").await.lock().await.mark_routing();

        let other = registry.get_or_create("s2").await;
        assert_eq!(other.lock().await.turn_skip_counter, 0);
    }

    #[tokio::test]
    async fn remove_forgets_the_session() {
        let registry = SessionRegistry::new();
        registry.get_or_create("s1").await;
        assert!(registry.remove("s1").await.is_some());
        assert!(registry.get("s1").await.is_none());
        assert!(registry.remove("s1").await.is_none());
    }
}
