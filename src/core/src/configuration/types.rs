use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Where the gateway listens for client connections.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// How many consecutive ports to try when `port` is taken
    pub port_retry_limit: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8184,
            port_retry_limit: 10,
        }
    }
}

/// The OBS Studio websocket endpoint.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub host: String,
    pub port: u16,
    pub password: String,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub connect_on_startup: bool,
}

impl DeviceConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 4455,
            password: String::new(),
            connect_timeout_secs: 10,
            request_timeout_secs: 10,
            connect_on_startup: true,
        }
    }
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Upper bound on device calls running on the blocking pool at once
    pub max_blocking_calls: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_blocking_calls: 5,
        }
    }
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub video_dir: PathBuf,
    pub snapshot_dir: PathBuf,
    pub log_dir: Option<PathBuf>,
    /// Point OBS at `video_dir` before every recording
    pub set_record_directory: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            video_dir: PathBuf::from("videos"),
            snapshot_dir: PathBuf::from("snapshots"),
            log_dir: Some(PathBuf::from("logs")),
            set_record_directory: false,
        }
    }
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub poll_interval_ms: u64,
    pub read_timeout_ms: u64,
    pub baud_rate: u32,
    pub delimiter: String,
    pub predefined_keys: Vec<String>,
}

impl StreamConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            read_timeout_ms: 10,
            baud_rate: 9600,
            delimiter: ",".to_string(),
            predefined_keys: vec![
                "sensor_id".to_string(),
                "value".to_string(),
                "unit".to_string(),
            ],
        }
    }
}
