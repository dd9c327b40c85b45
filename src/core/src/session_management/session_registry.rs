use log::{debug, info};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, PoisonError, RwLock};
use uuid::Uuid;

use crate::clock::Clock;
use crate::data_stream::StreamMultiplexer;
use crate::error_handling::types::SessionError;
use crate::session_management::session::{Outbound, Session};

/// The table of live sessions.
///
/// # Fields Overview
///
/// - `sessions`: live sessions by id; the map lock only covers insert, remove and lookup, each
///   session guards its own state
/// - `multiplexer`: stream subscriptions released when a session goes away
/// - `clock`: source of `connected_at`
pub struct SessionRegistry {
    sessions: RwLock<HashMap<Uuid, Arc<Session>>>,
    multiplexer: Arc<StreamMultiplexer>,
    clock: Arc<dyn Clock>,
}

impl SessionRegistry {
    pub fn new(multiplexer: Arc<StreamMultiplexer>, clock: Arc<dyn Clock>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            multiplexer,
            clock,
        }
    }

    pub fn register(&self, peer: Option<SocketAddr>, outbound: Outbound) -> Arc<Session> {
        let session = Arc::new(Session::new(peer, outbound, self.clock.now()));
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        sessions.insert(session.id, Arc::clone(&session));
        info!(
            "Session {} registered ({} active)",
            session.id,
            sessions.len()
        );
        session
    }

    pub fn lookup(&self, id: Uuid) -> Result<Arc<Session>, SessionError> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
            .ok_or(SessionError::NotFound(id))
    }

    /// Removes the session, clears its state and drops its stream subscriptions.
    /// Returns false if it was already gone.
    pub fn unregister(&self, id: Uuid) -> bool {
        let removed = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);

        let Some(session) = removed else {
            return false;
        };
        session.close();
        let released = self.multiplexer.release_session(id);
        if !released.is_empty() {
            debug!("Session {} left streams on {}", id, released.join(", "));
        }
        info!("Session {} unregistered", id);
        true
    }

    pub fn active_count(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn session_ids(&self) -> Vec<Uuid> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect()
    }

    pub fn shutdown_all(&self) {
        for id in self.session_ids() {
            self.unregister(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::data_stream::{RecordLayout, ResourceGate};
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn registry() -> SessionRegistry {
        let multiplexer = Arc::new(StreamMultiplexer::new(
            Arc::new(ResourceGate::new()),
            RecordLayout::new(vec!["a".into()], ","),
            Duration::from_millis(10),
        ));
        SessionRegistry::new(multiplexer, Arc::new(SystemClock))
    }

    #[test]
    fn register_then_lookup() {
        let registry = registry();
        let (tx, _rx) = mpsc::unbounded_channel();

        let session = registry.register(None, tx);
        let found = registry.lookup(session.id).unwrap();

        assert!(Arc::ptr_eq(&session, &found));
        assert_eq!(registry.active_count(), 1);
    }

    #[test]
    fn unregister_is_idempotent_and_clears_state() {
        let registry = registry();
        let (tx, _rx) = mpsc::unbounded_channel();
        let session = registry.register(None, tx);
        session.set_state("recording_start_time", json!("x")).unwrap();

        assert!(registry.unregister(session.id));
        assert!(!registry.unregister(session.id));
        assert_eq!(
            registry.lookup(session.id).unwrap_err(),
            SessionError::NotFound(session.id)
        );
        assert!(session.get_state("recording_start_time").is_err());
    }

    #[test]
    fn sessions_are_independent() {
        let registry = registry();
        let (tx_a, _ra) = mpsc::unbounded_channel();
        let (tx_b, _rb) = mpsc::unbounded_channel();
        let a = registry.register(None, tx_a);
        let b = registry.register(None, tx_b);

        a.set_state("k", json!("a")).unwrap();
        registry.unregister(a.id);

        b.set_state("k", json!("b")).unwrap();
        assert_eq!(b.get_state("k").unwrap(), Some(json!("b")));
        assert_eq!(registry.session_ids(), vec![b.id]);
    }

    #[test]
    fn shutdown_all_empties_the_registry() {
        let registry = registry();
        for _ in 0..3 {
            let (tx, _rx) = mpsc::unbounded_channel();
            registry.register(None, tx);
        }
        registry.shutdown_all();
        assert_eq!(registry.active_count(), 0);
    }
}
