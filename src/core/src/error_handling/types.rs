use std::fmt;

use uuid::Uuid;

#[derive(Debug)]
pub enum ConfigError {
    IoError(std::io::Error),
    TomlError(String),
    BadIPFormatting(String),
    BadPortsRange(String),
    DirectoryDoesNotExist(String),
    NotInRange(String),
    EmptyKeyCatalogue,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {}", e),
            ConfigError::TomlError(e) => write!(f, "TOML parsing error: {}", e),
            ConfigError::BadIPFormatting(e) => write!(f, "IP formatting error: {}", e),
            ConfigError::BadPortsRange(e) => write!(f, "Port range error: {}", e),
            ConfigError::DirectoryDoesNotExist(e) => write!(f, "Directory error: {}", e),
            ConfigError::NotInRange(e) => write!(f, "Value out of range: {}", e),
            ConfigError::EmptyKeyCatalogue => {
                write!(f, "Stream configuration error: predefined_keys must not be empty")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::IoError(err)
    }
}

/// Failure to establish the controller connection.
#[derive(Debug)]
pub enum ConnectError {
    AddressResolution(String),
    Io(std::io::Error),
    Handshake(String),
    Authentication(String),
    Timeout,
    WorkerFailed(String),
}

impl fmt::Display for ConnectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectError::AddressResolution(e) => write!(f, "Unable to resolve address: {}", e),
            ConnectError::Io(e) => write!(f, "Connection IO error: {}", e),
            ConnectError::Handshake(e) => write!(f, "Handshake failed: {}", e),
            ConnectError::Authentication(e) => write!(f, "Authentication failed: {}", e),
            ConnectError::Timeout => write!(f, "Connection attempt timed out"),
            ConnectError::WorkerFailed(e) => write!(f, "Connection worker failed: {}", e),
        }
    }
}

impl std::error::Error for ConnectError {}

impl From<std::io::Error> for ConnectError {
    fn from(err: std::io::Error) -> Self {
        ConnectError::Io(err)
    }
}

/// Failure of a single remote call on the controller.
#[derive(Debug, Clone, PartialEq)]
pub enum CallError {
    NotConnected,
    Timeout,
    Request {
        request: String,
        code: i64,
        comment: String,
    },
    Transport(String),
    Protocol(String),
    WorkerUnavailable,
}

impl fmt::Display for CallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallError::NotConnected => write!(f, "Not connected to OBS Studio"),
            CallError::Timeout => write!(f, "Request timed out"),
            CallError::Request {
                request,
                code,
                comment,
            } => {
                if comment.is_empty() {
                    write!(f, "{} failed with code {}", request, code)
                } else {
                    write!(f, "{} failed with code {}: {}", request, code, comment)
                }
            }
            CallError::Transport(e) => write!(f, "Transport error: {}", e),
            CallError::Protocol(e) => write!(f, "Protocol error: {}", e),
            CallError::WorkerUnavailable => write!(f, "No worker available for device call"),
        }
    }
}

impl std::error::Error for CallError {}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionError {
    NotFound(Uuid),
    Closed(Uuid),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::NotFound(id) => write!(f, "Session {} not found", id),
            SessionError::Closed(id) => write!(f, "Session {} is closed", id),
        }
    }
}

impl std::error::Error for SessionError {}

/// Errors around exclusive resources (serial ports) and their feeds.
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceError {
    AlreadyOpen(String),
    NotOpen(String),
    OpenFailed { key: String, reason: String },
    Enumeration(String),
    SubscriberClosed(Uuid),
}

impl fmt::Display for ResourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceError::AlreadyOpen(key) => write!(f, "Port {} is already open", key),
            ResourceError::NotOpen(key) => write!(f, "Port {} is not open", key),
            ResourceError::OpenFailed { key, reason } => {
                write!(f, "Unable to open {}: {}", key, reason)
            }
            ResourceError::Enumeration(e) => write!(f, "Failed to enumerate ports: {}", e),
            ResourceError::SubscriberClosed(id) => write!(f, "Session {} is closed", id),
        }
    }
}

impl std::error::Error for ResourceError {}

#[derive(Debug, Clone, PartialEq)]
pub enum RecordError {
    FieldCount { expected: usize, found: usize },
    InvalidUtf8,
    LineTooLong(usize),
}

impl fmt::Display for RecordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordError::FieldCount { expected, found } => {
                write!(f, "expected {} fields, found {}", expected, found)
            }
            RecordError::InvalidUtf8 => write!(f, "record is not valid UTF-8"),
            RecordError::LineTooLong(n) => {
                write!(f, "discarded {} bytes without a line terminator", n)
            }
        }
    }
}

impl std::error::Error for RecordError {}

#[derive(Debug)]
pub enum StorageError {
    CreateDirFailed(std::io::Error),
    WriteFailed(std::io::Error),
    InvalidPath(String),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::CreateDirFailed(e) => write!(f, "Storage directory creation failed: {}", e),
            StorageError::WriteFailed(e) => write!(f, "Storage write failed: {}", e),
            StorageError::InvalidPath(e) => write!(f, "Invalid storage path: {}", e),
        }
    }
}

impl std::error::Error for StorageError {}

#[derive(Debug)]
pub enum NetworkError {
    BindError(String),
    NoAvailablePort { first: u16, last: u16 },
}

impl fmt::Display for NetworkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkError::BindError(e) => write!(f, "Network bind error: {}", e),
            NetworkError::NoAvailablePort { first, last } => {
                write!(f, "No available port in range {}-{}", first, last)
            }
        }
    }
}

impl std::error::Error for NetworkError {}

/// Every way a command handler can fail. Each variant renders to the
/// `message` of an error response; none of them ends the session.
#[derive(Debug)]
pub enum HandlerError {
    Protocol(String),
    InvalidParameter { name: String, expected: &'static str },
    UnknownCommand(String),
    Precondition(String),
    DeviceCall {
        context: &'static str,
        source: CallError,
    },
    DeviceConnect(ConnectError),
    ResourceConflict(ResourceError),
    Failed {
        context: &'static str,
        cause: String,
    },
    Internal(String),
}

impl HandlerError {
    pub fn device(context: &'static str, source: CallError) -> Self {
        HandlerError::DeviceCall { context, source }
    }

    pub fn failed(context: &'static str, cause: impl fmt::Display) -> Self {
        HandlerError::Failed {
            context,
            cause: cause.to_string(),
        }
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlerError::Protocol(e) => write!(f, "{}", e),
            HandlerError::InvalidParameter { name, expected } => {
                write!(f, "Invalid parameter '{}': expected {}", name, expected)
            }
            HandlerError::UnknownCommand(name) => write!(f, "Unknown command: {}", name),
            HandlerError::Precondition(e) => write!(f, "{}", e),
            // A link that dropped between the precondition check and the call
            // reads the same as one that was never connected.
            HandlerError::DeviceCall {
                source: CallError::NotConnected,
                ..
            } => write!(f, "{}", CallError::NotConnected),
            HandlerError::DeviceCall { context, source } => write!(f, "{}: {}", context, source),
            HandlerError::DeviceConnect(e) => write!(f, "Failed to connect to OBS Studio: {}", e),
            HandlerError::ResourceConflict(e) => write!(f, "{}", e),
            HandlerError::Failed { context, cause } => write!(f, "{}: {}", context, cause),
            HandlerError::Internal(e) => write!(f, "Error processing command: {}", e),
        }
    }
}

impl std::error::Error for HandlerError {}

impl From<ResourceError> for HandlerError {
    fn from(err: ResourceError) -> Self {
        match err {
            ResourceError::AlreadyOpen(_) => HandlerError::ResourceConflict(err),
            ResourceError::NotOpen(_) | ResourceError::SubscriberClosed(_) => {
                HandlerError::Precondition(err.to_string())
            }
            other => HandlerError::failed("Serial port operation failed", other),
        }
    }
}

impl From<SessionError> for HandlerError {
    fn from(err: SessionError) -> Self {
        HandlerError::Precondition(err.to_string())
    }
}

#[derive(Debug)]
pub enum ControllerError {
    ConfigurationError(ConfigError),
    NetworkError(NetworkError),
    StorageError(StorageError),
    InitializationFailed(String),
}

impl fmt::Display for ControllerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControllerError::ConfigurationError(e) => write!(f, "Configuration error: {}", e),
            ControllerError::NetworkError(e) => write!(f, "Network error: {}", e),
            ControllerError::StorageError(e) => write!(f, "Storage error: {}", e),
            ControllerError::InitializationFailed(e) => write!(f, "Initialization failed: {}", e),
        }
    }
}

impl std::error::Error for ControllerError {}

impl From<StorageError> for ControllerError {
    fn from(err: StorageError) -> Self {
        ControllerError::StorageError(err)
    }
}

impl From<NetworkError> for ControllerError {
    fn from(err: NetworkError) -> Self {
        ControllerError::NetworkError(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_connected_device_error_reads_as_precondition() {
        let err = HandlerError::device("Failed to start recording", CallError::NotConnected);
        assert_eq!(err.to_string(), "Not connected to OBS Studio");
    }

    #[test]
    fn device_error_keeps_underlying_cause() {
        let err = HandlerError::device(
            "Failed to start recording",
            CallError::Request {
                request: "StartRecord".to_string(),
                code: 500,
                comment: "Output already active".to_string(),
            },
        );
        assert_eq!(
            err.to_string(),
            "Failed to start recording: StartRecord failed with code 500: Output already active"
        );
    }

    #[test]
    fn resource_errors_map_to_taxonomy() {
        let conflict: HandlerError = ResourceError::AlreadyOpen("COM3".to_string()).into();
        assert!(matches!(conflict, HandlerError::ResourceConflict(_)));
        assert_eq!(conflict.to_string(), "Port COM3 is already open");

        let missing: HandlerError = ResourceError::NotOpen("COM3".to_string()).into();
        assert!(matches!(missing, HandlerError::Precondition(_)));
    }
}
