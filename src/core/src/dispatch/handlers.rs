//! Command handlers, one submodule per command family.
//!
//! Every handler validates its preconditions, performs at most one device call sequence and
//! reports failure as a [`HandlerError`]; none of them can end the session.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use super::dispatcher::DispatchContext;
use super::envelope::Parameters;
use crate::error_handling::types::{CallError, HandlerError};
use crate::session_management::Session;

pub mod connection;
pub mod recording;
pub mod replay_buffer;
pub mod serial;
pub mod snapshot;

/// The command being handled, on behalf of which session.
pub struct Request {
    pub session: Arc<Session>,
    pub parameters: Parameters,
    pub command_uid: Option<Value>,
}

/// What a successful handler reports back.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub message: String,
    pub data: Option<Map<String, Value>>,
}

impl Reply {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            data: None,
        }
    }

    /// `data` must be a JSON object; anything else is dropped.
    pub fn with_data(message: impl Into<String>, data: Value) -> Self {
        Self {
            message: message.into(),
            data: match data {
                Value::Object(map) => Some(map),
                _ => None,
            },
        }
    }
}

pub(crate) async fn require_connected(ctx: &DispatchContext) -> Result<(), HandlerError> {
    if ctx.link.is_connected().await {
        Ok(())
    } else {
        Err(HandlerError::Precondition(CallError::NotConnected.to_string()))
    }
}

/// Seconds elapsed since `started`, or zero when there is no start time.
pub(crate) fn elapsed_seconds(started: Option<DateTime<Utc>>, now: DateTime<Utc>) -> f64 {
    started
        .map(|at| (now - at).num_milliseconds().max(0) as f64 / 1000.0)
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    #[test]
    fn elapsed_seconds_handles_missing_and_backwards_time() {
        let now = Utc::now();
        assert_eq!(elapsed_seconds(None, now), 0.0);
        assert_eq!(elapsed_seconds(Some(now - Duration::milliseconds(2500)), now), 2.5);
        assert_eq!(elapsed_seconds(Some(now + Duration::seconds(1)), now), 0.0);
    }

    #[test]
    fn reply_keeps_only_object_data() {
        assert!(Reply::with_data("m", json!({"a": 1})).data.is_some());
        assert!(Reply::with_data("m", json!([1])).data.is_none());
    }
}
