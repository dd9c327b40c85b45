use super::types::*;
use crate::error_handling::types::ConfigError;
use clap::Parser;
use log::LevelFilter;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::{Path, PathBuf};

/// Command-line arguments of the gateway binary.
///
/// Every flag is optional. When `--config` is given the TOML file is loaded first and the
/// remaining flags override the values it contains; without it the built-in defaults are used.
///
/// # Examples
///
/// ```
/// use clap::Parser;
/// use obs_gateway::configuration::Args;
///
/// let args = Args::parse_from(["obs-gateway", "--obs-port", "4456"]);
/// assert_eq!(args.obs_port, Some(4456));
/// ```
#[derive(Parser, Debug, Clone)]
#[command(name = "obs-gateway")]
#[command(about = "WebSocket command gateway for OBS Studio and serial data streams")]
pub struct Args {
    /// Path to a TOML configuration file
    #[arg(long, env = "OBS_GATEWAY_CONFIG")]
    pub config: Option<PathBuf>,

    /// OBS WebSocket host
    #[arg(long)]
    pub obs_host: Option<String>,

    /// OBS WebSocket port
    #[arg(long)]
    pub obs_port: Option<u16>,

    /// OBS WebSocket password
    #[arg(long, env = "OBS_PASSWORD", hide_env_values = true)]
    pub obs_password: Option<String>,

    /// Address the gateway binds to
    #[arg(long)]
    pub api_host: Option<String>,

    /// Port the gateway listens on
    #[arg(long)]
    pub api_port: Option<u16>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    pub log_level: LevelFilter,
}

/// Application configuration structure that defines all runtime parameters.
///
/// # Fields Overview
///
/// - `server`: bind address, port and port fallback for client connections
/// - `device`: OBS WebSocket endpoint, credentials and timeouts
/// - `workers`: size of the pool running blocking device calls
/// - `storage`: output directories for recordings, snapshots and logs
/// - `stream`: serial polling and record layout defaults
///
/// Every section and key is optional in the file; missing values take their defaults.
#[derive(Debug, Default, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub device: DeviceConfig,
    pub workers: WorkerConfig,
    pub storage: StorageConfig,
    pub stream: StreamConfig,
}

impl Config {
    /// Builds the configuration from command-line arguments, loading the file they point at.
    pub fn from_args(args: &Args) -> Result<Self, ConfigError> {
        let mut config = match &args.config {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_args(args);
        config.validate()?;
        Ok(config)
    }

    /// Reads and validates a TOML configuration file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.is_file() {
            return Err(ConfigError::DirectoryDoesNotExist(format!(
                "configuration file {} does not exist",
                path.display()
            )));
        }
        let raw = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        toml::from_str(raw).map_err(|e| ConfigError::TomlError(e.to_string()))
    }

    fn apply_args(&mut self, args: &Args) {
        if let Some(host) = &args.obs_host {
            self.device.host = host.clone();
        }
        if let Some(port) = args.obs_port {
            self.device.port = port;
        }
        if let Some(password) = &args.obs_password {
            self.device.password = password.clone();
        }
        if let Some(host) = &args.api_host {
            self.server.host = host.clone();
        }
        if let Some(port) = args.api_port {
            self.server.port = port;
        }
    }

    /// Checks the cross-field constraints serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server
            .host
            .parse::<IpAddr>()
            .map_err(|_| ConfigError::BadIPFormatting(self.server.host.clone()))?;

        if self.server.port == 0 {
            return Err(ConfigError::BadPortsRange(
                "server.port must be non-zero".to_string(),
            ));
        }
        let last_port = u32::from(self.server.port) + u32::from(self.server.port_retry_limit);
        if last_port > u32::from(u16::MAX) {
            return Err(ConfigError::BadPortsRange(format!(
                "server.port {} with port_retry_limit {} exceeds {}",
                self.server.port,
                self.server.port_retry_limit,
                u16::MAX
            )));
        }
        if self.device.host.trim().is_empty() {
            return Err(ConfigError::BadIPFormatting(
                "device.host must not be empty".to_string(),
            ));
        }
        if self.device.port == 0 {
            return Err(ConfigError::BadPortsRange(
                "device.port must be non-zero".to_string(),
            ));
        }
        if self.device.connect_timeout_secs == 0 || self.device.request_timeout_secs == 0 {
            return Err(ConfigError::NotInRange(
                "device timeouts must be at least one second".to_string(),
            ));
        }
        if self.workers.max_blocking_calls == 0 {
            return Err(ConfigError::NotInRange(
                "workers.max_blocking_calls must be at least 1".to_string(),
            ));
        }
        if !(10..=60_000).contains(&self.stream.poll_interval_ms) {
            return Err(ConfigError::NotInRange(format!(
                "stream.poll_interval_ms {} not in 10..=60000",
                self.stream.poll_interval_ms
            )));
        }
        if self.stream.baud_rate == 0 {
            return Err(ConfigError::NotInRange(
                "stream.baud_rate must be non-zero".to_string(),
            ));
        }
        if self.stream.delimiter.is_empty() {
            return Err(ConfigError::NotInRange(
                "stream.delimiter must not be empty".to_string(),
            ));
        }
        if self.stream.predefined_keys.is_empty() {
            return Err(ConfigError::EmptyKeyCatalogue);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.server.port, 8184);
        assert_eq!(config.device.port, 4455);
        assert_eq!(config.workers.max_blocking_calls, 5);
        assert_eq!(config.stream.poll_interval_ms, 100);
    }

    #[test]
    fn test_from_legit_file() {
        let file = write_config(
            r#"
[server]
host = "127.0.0.1"
port = 9000

[device]
host = "obs.local"
password = "secret"

[stream]
predefined_keys = ["a", "b"]
delimiter = ";"
"#,
        );

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.port_retry_limit, 10);
        assert_eq!(config.device.host, "obs.local");
        assert_eq!(config.device.port, 4455);
        assert_eq!(config.device.password, "secret");
        assert_eq!(config.stream.predefined_keys, vec!["a", "b"]);
        assert_eq!(config.stream.delimiter, ";");
    }

    #[test]
    fn test_missing_file() {
        let err = Config::from_file(Path::new("/nonexistent/gateway.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::DirectoryDoesNotExist(_)));
    }

    #[test]
    fn test_malformed_toml() {
        let file = write_config("[server\nport = 1");
        let err = Config::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::TomlError(_)));
    }

    #[test]
    fn test_bad_bind_address() {
        let file = write_config("[server]\nhost = \"not-an-ip\"\n");
        let err = Config::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::BadIPFormatting(_)));
    }

    #[test]
    fn test_port_fallback_overflow() {
        let mut config = Config::default();
        config.server.port = 65530;
        config.server.port_retry_limit = 10;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::BadPortsRange(_))
        ));
    }

    #[test]
    fn test_empty_key_catalogue() {
        let mut config = Config::default();
        config.stream.predefined_keys.clear();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::EmptyKeyCatalogue)
        ));
    }

    #[test]
    fn test_poll_interval_range() {
        let mut config = Config::default();
        config.stream.poll_interval_ms = 1;
        assert!(matches!(config.validate(), Err(ConfigError::NotInRange(_))));
    }

    #[test]
    fn test_args_override_file() {
        let file = write_config("[device]\nhost = \"obs.local\"\nport = 4000\n");
        let path = file.path().to_str().unwrap().to_string();

        let args = Args::try_parse_from([
            "obs-gateway",
            "--config",
            path.as_str(),
            "--obs-port",
            "4456",
            "--api-port",
            "9100",
        ])
        .unwrap_or_else(|e| panic!("{}", e));

        let config = Config::from_args(&args).unwrap();
        assert_eq!(config.device.host, "obs.local");
        assert_eq!(config.device.port, 4456);
        assert_eq!(config.server.port, 9100);
    }

    #[test]
    fn test_args_without_file_use_defaults() {
        let args = Args::try_parse_from(["obs-gateway", "--obs-host", "10.0.0.2"])
            .unwrap_or_else(|e| panic!("{}", e));

        assert_eq!(args.log_level, LevelFilter::Info);
        let config = Config::from_args(&args).unwrap();
        assert_eq!(config.device.host, "10.0.0.2");
        assert_eq!(config.server, ServerConfig::default());
    }
}
