use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::error_handling::types::{CallError, ConnectError};

/// Where and how to reach the device.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceTarget {
    pub host: String,
    pub port: u16,
    pub password: String,
    /// Bounds both the connection attempt and every request on it
    pub timeout: Duration,
}

impl DeviceTarget {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// A live, blocking connection to the device.
///
/// Implementations serialize their own calls; the link may invoke `call` from several blocking
/// threads at once.
pub trait DeviceClient: Send + Sync {
    /// Issues one request and waits for its reply data (`Value::Null` when the reply has none).
    fn call(&self, request: &str, data: Option<Value>) -> Result<Value, CallError>;

    fn disconnect(&self);
}

pub trait DeviceConnector: Send + Sync {
    fn connect(&self, target: &DeviceTarget) -> Result<Arc<dyn DeviceClient>, ConnectError>;
}
