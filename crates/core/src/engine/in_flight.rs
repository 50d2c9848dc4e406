//! Per-session in-flight registry: at most one turn per session at a time.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use uuid::Uuid;

use crate::error::EngineError;

/// Set of sessions with a turn in progress.
/// Clone-cheap (Arc-backed); sessions never block each other.
#[derive(Clone, Debug, Default)]
pub struct InFlightSessions {
    inner: Arc<Mutex<HashSet<Uuid>>>,
}

impl InFlightSessions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `session_id` for one turn. Fails if a turn already holds it.
    pub fn acquire(&self, session_id: Uuid) -> Result<TurnGuard, EngineError> {
        let mut set = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if !set.insert(session_id) {
            return Err(EngineError::TurnInFlight(session_id));
        }
        Ok(TurnGuard { sessions: self.inner.clone(), session_id })
    }

    pub fn is_in_flight(&self, session_id: Uuid) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&session_id)
    }
}

/// Releases the session when dropped, whether the turn succeeded or not.
#[derive(Debug)]
pub struct TurnGuard {
    sessions: Arc<Mutex<HashSet<Uuid>>>,
    session_id: Uuid,
}

impl Drop for TurnGuard {
    fn drop(&mut self) {
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_is_rejected_until_release() {
        let sessions = InFlightSessions::new();
        let id = Uuid::new_v4();
        let guard = sessions.acquire(id).unwrap();
        assert!(sessions.is_in_flight(id));
        assert!(matches!(sessions.acquire(id), Err(EngineError::TurnInFlight(x)) if x == id));

        drop(guard);
        assert!(!sessions.is_in_flight(id));
        assert!(sessions.acquire(id).is_ok());
    }

    #[test]
    fn sessions_are_independent() {
        let sessions = InFlightSessions::new();
        let _a = sessions.acquire(Uuid::new_v4()).unwrap();
        assert!(sessions.acquire(Uuid::new_v4()).is_ok());
    }
}
