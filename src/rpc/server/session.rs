use std::sync::Arc;

use dashmap::DashMap;

use crate::rpc::session::SessionId;

/// Registry of the calls a router is currently serving, by method path.
///
/// Entries are only bookkeeping; a session's state is never reachable
/// through the map.
#[derive(Debug, Default)]
pub struct SessionMap {
    sessions: DashMap<SessionId, String, ahash::RandomState>,
}

impl SessionMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a call, returning a guard that unregisters it on drop.
    ///
    /// Session ids are freshly generated per call, so registration cannot
    /// collide.
    pub fn register(self: &Arc<Self>, session_id: SessionId, method: &str) -> SessionGuard {
        self.sessions.insert(session_id.clone(), method.to_string());
        SessionGuard {
            session_id,
            sessions: Arc::clone(self),
        }
    }

    /// Number of calls in flight for `method`.
    pub fn calls_to(&self, method: &str) -> usize {
        self.sessions
            .iter()
            .filter(|entry| entry.value() == method)
            .count()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// Keeps a call registered for as long as it is being served.
#[derive(Debug)]
pub struct SessionGuard {
    session_id: SessionId,
    sessions: Arc<SessionMap>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.sessions.sessions.remove(&self.session_id);
    }
}
