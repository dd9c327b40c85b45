use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::dispatch::envelope::ResponseEnvelope;
use crate::error_handling::types::SessionError;

/// Queue feeding one client's transport writer.
pub type Outbound = mpsc::UnboundedSender<ResponseEnvelope>;

#[derive(Debug, Default)]
struct SessionState {
    open: bool,
    values: HashMap<String, Value>,
}

/// Server-side state for one live client connection.
#[derive(Debug)]
pub struct Session {
    pub id: Uuid,
    pub peer: Option<SocketAddr>,
    pub connected_at: DateTime<Utc>,
    outbound: Outbound,
    state: Mutex<SessionState>,
}

impl Session {
    pub fn new(peer: Option<SocketAddr>, outbound: Outbound, connected_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            peer,
            connected_at,
            outbound,
            state: Mutex::new(SessionState {
                open: true,
                values: HashMap::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn open_state(&self) -> Result<MutexGuard<'_, SessionState>, SessionError> {
        let state = self.state();
        if state.open {
            Ok(state)
        } else {
            Err(SessionError::Closed(self.id))
        }
    }

    pub fn outbound(&self) -> Outbound {
        self.outbound.clone()
    }

    /// Queues a message for the client. Returns false once the transport is gone.
    pub fn push(&self, envelope: ResponseEnvelope) -> bool {
        self.outbound.send(envelope).is_ok()
    }

    pub fn is_open(&self) -> bool {
        self.state().open
    }

    pub fn set_state(&self, key: &str, value: Value) -> Result<(), SessionError> {
        self.open_state()?.values.insert(key.to_string(), value);
        Ok(())
    }

    pub fn get_state(&self, key: &str) -> Result<Option<Value>, SessionError> {
        Ok(self.open_state()?.values.get(key).cloned())
    }

    pub fn take_state(&self, key: &str) -> Result<Option<Value>, SessionError> {
        Ok(self.open_state()?.values.remove(key))
    }

    pub fn set_timestamp(&self, key: &str, at: DateTime<Utc>) -> Result<(), SessionError> {
        self.set_state(key, Value::String(at.to_rfc3339()))
    }

    /// Removes a timestamp set with [`Session::set_timestamp`]. Unparseable values read as absent.
    pub fn take_timestamp(&self, key: &str) -> Result<Option<DateTime<Utc>>, SessionError> {
        Ok(self.take_state(key)?.and_then(|value| {
            value
                .as_str()
                .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
                .map(|at| at.with_timezone(&Utc))
        }))
    }

    /// Clears the state and refuses further access to it.
    pub fn close(&self) {
        let mut state = self.state();
        state.open = false;
        state.values.clear();
    }
}
