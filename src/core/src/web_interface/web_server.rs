use std::future::Future;
use std::net::{IpAddr, SocketAddr};

use log::{info, warn};
use tokio::sync::watch;

use super::routes::routes;
use crate::configuration::ServerConfig;
use crate::dispatch::CommandDispatcher;
use crate::error_handling::types::NetworkError;

/// HTTP and WebSocket front end
pub struct WebServer {
    dispatcher: CommandDispatcher,
    config: ServerConfig,
}

impl WebServer {
    pub fn new(dispatcher: CommandDispatcher, config: ServerConfig) -> Self {
        Self { dispatcher, config }
    }

    /// Binds the first free port from `config.port` on, trying at most `port_retry_limit` ports.
    ///
    /// Returns the bound address and the server future; the future completes once `shutdown`
    /// flips to true (or its sender is dropped) and in-flight requests have drained.
    pub fn bind(
        &self,
        shutdown: watch::Receiver<bool>,
    ) -> Result<(SocketAddr, impl Future<Output = ()> + 'static), NetworkError> {
        let host: IpAddr = self
            .config
            .host
            .parse()
            .map_err(|e| NetworkError::BindError(format!("{}: {}", self.config.host, e)))?;

        let first = self.config.port;
        let attempts = self.config.port_retry_limit.max(1);
        let last = first.saturating_add(attempts - 1);

        for port in first..=last {
            let addr = SocketAddr::new(host, port);
            let mut signal = shutdown.clone();
            let bound = warp::serve(routes(self.dispatcher.clone()))
                .try_bind_with_graceful_shutdown(addr, async move {
                    let _ = signal.wait_for(|stop| *stop).await;
                });

            match bound {
                Ok((bound_addr, server)) => {
                    if port != first {
                        warn!("Port {} was unavailable, listening on {} instead", first, port);
                    }
                    info!("Listening on {}", bound_addr);
                    return Ok((bound_addr, server));
                }
                Err(e) => warn!("Unable to bind {}: {}", addr, e),
            }
        }

        Err(NetworkError::NoAvailablePort { first, last })
    }
}
