use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use tokio::sync::watch;

use crate::clock::{Clock, SystemClock};
use crate::configuration::Config;
use crate::data_stream::{PortOpener, RecordLayout, ResourceGate, StreamMultiplexer, SystemPorts};
use crate::device_link::{ControllerLink, DeviceConnector, DeviceTarget, ObsConnector};
use crate::dispatch::{CommandDispatcher, DispatchContext};
use crate::error_handling::types::ControllerError;
use crate::session_management::SessionRegistry;
use crate::storage::FileStorage;
use crate::web_interface::WebServer;

const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Owns the wired-up gateway: link, registry, multiplexer and dispatcher.
pub struct Controller {
    config: Config,
    dispatcher: CommandDispatcher,
}

impl Controller {
    /// Builds the gateway against a real OBS instance and the host's serial ports.
    pub fn new(config: Config) -> Result<Self, ControllerError> {
        let connector = Arc::new(ObsConnector::new(config.device.request_timeout()));
        Self::with_components(config, connector, Arc::new(SystemPorts), Arc::new(SystemClock))
    }

    pub fn with_components(
        config: Config,
        connector: Arc<dyn DeviceConnector>,
        ports: Arc<dyn PortOpener>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ControllerError> {
        let storage = FileStorage::new(&config.storage.video_dir, &config.storage.snapshot_dir);
        storage.ensure_directories()?;

        let link = Arc::new(ControllerLink::new(
            connector,
            config.workers.max_blocking_calls,
            config.device.request_timeout(),
        ));
        let multiplexer = Arc::new(StreamMultiplexer::new(
            Arc::new(ResourceGate::new()),
            RecordLayout::new(
                config.stream.predefined_keys.clone(),
                config.stream.delimiter.clone(),
            ),
            config.stream.poll_interval(),
        ));
        let registry = Arc::new(SessionRegistry::new(
            Arc::clone(&multiplexer),
            Arc::clone(&clock),
        ));

        let dispatcher = CommandDispatcher::new(DispatchContext {
            link,
            registry,
            multiplexer,
            ports,
            storage,
            clock,
            device: config.device.clone(),
            stream: config.stream.clone(),
            set_record_directory: config.storage.set_record_directory,
        });

        Ok(Self { config, dispatcher })
    }

    pub fn dispatcher(&self) -> &CommandDispatcher {
        &self.dispatcher
    }

    /// Serves until Ctrl-C.
    pub async fn run(&self) -> Result<(), ControllerError> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Unable to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Serves until `signal` completes, then shuts the gateway down.
    pub async fn run_until(&self, signal: impl Future<Output = ()>) -> Result<(), ControllerError> {
        if self.config.device.connect_on_startup {
            self.connect_device().await;
        }

        let (stop, stopped) = watch::channel(false);
        let server = WebServer::new(self.dispatcher.clone(), self.config.server.clone());
        let (addr, serving) = server.bind(stopped)?;
        let serving = tokio::spawn(serving);
        info!("Gateway ready on {}", addr);

        signal.await;
        info!("Shutdown requested");
        let _ = stop.send(true);
        self.shutdown().await;

        if tokio::time::timeout(DRAIN_TIMEOUT, serving).await.is_err() {
            warn!("Server did not drain within {:?}", DRAIN_TIMEOUT);
        }
        Ok(())
    }

    /// Closes every session and drops the device connection.
    pub async fn shutdown(&self) {
        let context = self.dispatcher.context();
        let sessions = context.registry.active_count();
        context.registry.shutdown_all();
        if context.link.disconnect().await {
            info!("Disconnected from OBS");
        }
        info!("Closed {} sessions", sessions);
    }

    async fn connect_device(&self) {
        let device = &self.config.device;
        let target = DeviceTarget {
            host: device.host.clone(),
            port: device.port,
            password: device.password.clone(),
            timeout: device.connect_timeout(),
        };
        let address = target.address();
        match self.dispatcher.context().link.connect(target).await {
            Ok(()) => info!("Connected to OBS at {} on startup", address),
            Err(e) => warn!("Startup connection to {} failed: {}", address, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_stream::mock_port::MockPorts;
    use crate::device_link::mock_device::{MockConnector, MockDevice};
    use std::sync::atomic::Ordering;
    use tempfile::tempdir;
    use tokio::sync::oneshot;

    fn config_in(root: &std::path::Path) -> Config {
        let mut config = Config::default();
        config.server.host = "127.0.0.1".to_string();
        config.server.port = 0;
        config.storage.video_dir = root.join("videos");
        config.storage.snapshot_dir = root.join("snapshots");
        config
    }

    fn controller(config: Config, device: &Arc<MockDevice>) -> Controller {
        Controller::with_components(
            config,
            MockConnector::new(Arc::clone(device)),
            Arc::new(MockPorts::with_ports(&[])),
            Arc::new(SystemClock),
        )
        .unwrap()
    }

    #[test]
    fn creates_storage_directories() {
        let dir = tempdir().unwrap();
        let device = MockDevice::new();
        controller(config_in(dir.path()), &device);

        assert!(dir.path().join("videos").is_dir());
        assert!(dir.path().join("snapshots").is_dir());
    }

    #[tokio::test]
    async fn startup_connect_and_shutdown_disconnect() {
        let dir = tempdir().unwrap();
        let device = MockDevice::new();
        let mut config = config_in(dir.path());
        config.device.connect_on_startup = true;
        let controller = controller(config, &device);

        let (stop, stopped) = oneshot::channel::<()>();
        let running = controller.run_until(async {
            let _ = stopped.await;
        });
        let stopper = async {
            while !controller.dispatcher().context().link.is_connected().await {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            let _ = stop.send(());
        };

        let (result, ()) = tokio::join!(running, stopper);
        result.unwrap();
        assert!(!controller.dispatcher().context().link.is_connected().await);
        assert_eq!(device.disconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unusable_host_is_a_network_error() {
        let dir = tempdir().unwrap();
        let device = MockDevice::new();
        let mut config = config_in(dir.path());
        config.server.host = "not-an-ip".to_string();

        let result = controller(config, &device)
            .run_until(std::future::ready(()))
            .await;
        assert!(matches!(result, Err(ControllerError::NetworkError(_))));
    }
}
