use log::{debug, info, warn};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, Semaphore};

use super::client::{DeviceClient, DeviceConnector, DeviceTarget};
use crate::error_handling::types::{CallError, ConnectError};

/// Slack on top of the target timeout before a connect attempt is abandoned.
const CONNECT_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq)]
pub enum LinkStatus {
    Disconnected,
    Connected { host: String, port: u16 },
}

struct Connection {
    target: DeviceTarget,
    client: Arc<dyn DeviceClient>,
}

/// The one shared connection to the device, passed to whoever needs it.
///
/// # Fields Overview
///
/// - `connector`: opens new clients
/// - `current`: the live client, if any; reconnects hold the write half for the whole swap so no
///   call observes a half-replaced client
/// - `workers`: bounds how many blocking calls run at once
/// - `request_timeout`: per-call bound, surfaced as [`CallError::Timeout`]
pub struct ControllerLink {
    connector: Arc<dyn DeviceConnector>,
    current: RwLock<Option<Connection>>,
    workers: Arc<Semaphore>,
    request_timeout: Duration,
}

impl ControllerLink {
    pub fn new(
        connector: Arc<dyn DeviceConnector>,
        max_blocking_calls: usize,
        request_timeout: Duration,
    ) -> Self {
        Self {
            connector,
            current: RwLock::new(None),
            workers: Arc::new(Semaphore::new(max_blocking_calls.max(1))),
            request_timeout,
        }
    }

    /// Replaces the current connection with a new one to `target`.
    ///
    /// The old connection is torn down first, so a failed attempt leaves the link disconnected.
    pub async fn connect(&self, target: DeviceTarget) -> Result<(), ConnectError> {
        let mut current = self.current.write().await;

        if let Some(old) = current.take() {
            info!("Dropping connection to {} before reconnecting", old.target.address());
            let client = old.client;
            if let Err(e) = tokio::task::spawn_blocking(move || client.disconnect()).await {
                warn!("Disconnect of the previous client failed: {}", e);
            }
        }

        let connector = Arc::clone(&self.connector);
        let attempt_target = target.clone();
        let attempt = tokio::task::spawn_blocking(move || connector.connect(&attempt_target));

        let client = match tokio::time::timeout(target.timeout + CONNECT_GRACE, attempt).await {
            Ok(Ok(Ok(client))) => client,
            Ok(Ok(Err(e))) => {
                warn!("Connection to {} failed: {}", target.address(), e);
                return Err(e);
            }
            Ok(Err(e)) => return Err(ConnectError::WorkerFailed(e.to_string())),
            Err(_) => {
                warn!("Connection to {} timed out", target.address());
                return Err(ConnectError::Timeout);
            }
        };

        info!("Connected to OBS at {}", target.address());
        *current = Some(Connection { target, client });
        Ok(())
    }

    /// Drops the current connection. Returns false if there was none.
    pub async fn disconnect(&self) -> bool {
        let Some(old) = self.current.write().await.take() else {
            return false;
        };
        let client = old.client;
        if let Err(e) = tokio::task::spawn_blocking(move || client.disconnect()).await {
            warn!("Disconnect from {} failed: {}", old.target.address(), e);
        }
        true
    }

    pub async fn is_connected(&self) -> bool {
        self.current.read().await.is_some()
    }

    pub async fn status(&self) -> LinkStatus {
        match self.current.read().await.as_ref() {
            Some(connection) => LinkStatus::Connected {
                host: connection.target.host.clone(),
                port: connection.target.port,
            },
            None => LinkStatus::Disconnected,
        }
    }

    /// Runs one device request on the blocking pool.
    ///
    /// A panic inside the client is resumed on the caller's task.
    pub async fn call(&self, request: &str, data: Option<Value>) -> Result<Value, CallError> {
        let client = match self.current.read().await.as_ref() {
            Some(connection) => Arc::clone(&connection.client),
            None => return Err(CallError::NotConnected),
        };

        let permit = Arc::clone(&self.workers)
            .acquire_owned()
            .await
            .map_err(|_| CallError::WorkerUnavailable)?;

        debug!("-> {}", request);
        let name = request.to_string();
        let task = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            client.call(&name, data)
        });

        match tokio::time::timeout(self.request_timeout, task).await {
            Ok(Ok(result)) => {
                if let Err(e) = &result {
                    debug!("<- {} failed: {}", request, e);
                }
                result
            }
            Ok(Err(e)) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Ok(Err(_)) => Err(CallError::WorkerUnavailable),
            Err(_) => {
                warn!("{} timed out after {:?}", request, self.request_timeout);
                Err(CallError::Timeout)
            }
        }
    }
}
