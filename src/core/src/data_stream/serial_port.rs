use std::io::{ErrorKind, Read};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::debug;
use serde::Serialize;

use crate::error_handling::types::ResourceError;

const READ_CHUNK_SIZE: usize = 1024;

/// Description of one serial port visible to the host.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortInfo {
    pub port_name: String,
    pub port_type: String,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub serial_number: Option<String>,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
}

impl PortInfo {
    pub fn named(port_name: impl Into<String>, port_type: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            port_type: port_type.into(),
            manufacturer: None,
            product: None,
            serial_number: None,
            vid: None,
            pid: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PortSettings {
    pub baud_rate: u32,
    #[serde(skip)]
    pub read_timeout: Duration,
}

/// Access to the host's serial ports.
pub trait PortOpener: Send + Sync {
    fn list(&self) -> Result<Vec<PortInfo>, ResourceError>;

    /// Opens `name` for reading. May block until the device answers.
    fn open(&self, name: &str, settings: &PortSettings)
        -> Result<Box<dyn Read + Send>, ResourceError>;
}

/// Real ports through the `serialport` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemPorts;

impl PortOpener for SystemPorts {
    fn list(&self) -> Result<Vec<PortInfo>, ResourceError> {
        let ports = serialport::available_ports()
            .map_err(|e| ResourceError::Enumeration(e.to_string()))?;

        Ok(ports
            .into_iter()
            .map(|p| match p.port_type {
                serialport::SerialPortType::UsbPort(info) => PortInfo {
                    port_name: p.port_name,
                    port_type: "USB".to_string(),
                    manufacturer: info.manufacturer,
                    product: info.product,
                    serial_number: info.serial_number,
                    vid: Some(info.vid),
                    pid: Some(info.pid),
                },
                serialport::SerialPortType::BluetoothPort => {
                    PortInfo::named(p.port_name, "Bluetooth")
                }
                serialport::SerialPortType::PciPort => PortInfo::named(p.port_name, "PCI"),
                serialport::SerialPortType::Unknown => PortInfo::named(p.port_name, "Unknown"),
            })
            .collect())
    }

    fn open(
        &self,
        name: &str,
        settings: &PortSettings,
    ) -> Result<Box<dyn Read + Send>, ResourceError> {
        let port = serialport::new(name, settings.baud_rate)
            .timeout(settings.read_timeout)
            .open()
            .map_err(|e| ResourceError::OpenFailed {
                key: name.to_string(),
                reason: e.to_string(),
            })?;
        debug!("Opened serial port {} at {} baud", name, settings.baud_rate);
        Ok(Box::new(port))
    }
}

/// An exclusively opened port, as held by the resource gate.
pub struct OpenPort {
    pub name: String,
    pub settings: PortSettings,
    pub opened_at: DateTime<Utc>,
    reader: Mutex<Box<dyn Read + Send>>,
}

impl OpenPort {
    pub fn new(
        name: impl Into<String>,
        settings: PortSettings,
        opened_at: DateTime<Utc>,
        reader: Box<dyn Read + Send>,
    ) -> Self {
        Self {
            name: name.into(),
            settings,
            opened_at,
            reader: Mutex::new(reader),
        }
    }

    /// Reads whatever the device has buffered. Blocking; run it off the async executor.
    ///
    /// A read that times out yields an empty chunk. Any other error means the port is gone.
    pub fn read_chunk(&self) -> std::io::Result<Vec<u8>> {
        let mut reader = self.reader.lock().unwrap_or_else(PoisonError::into_inner);
        let mut buf = [0u8; READ_CHUNK_SIZE];
        match reader.read(&mut buf) {
            Ok(0) => Err(std::io::Error::new(
                ErrorKind::UnexpectedEof,
                format!("{} reached end of stream", self.name),
            )),
            Ok(n) => Ok(buf[..n].to_vec()),
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                ) =>
            {
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }
}

impl std::fmt::Debug for OpenPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenPort")
            .field("name", &self.name)
            .field("settings", &self.settings)
            .field("opened_at", &self.opened_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_stream::mock_port::MockLine;

    fn settings() -> PortSettings {
        PortSettings {
            baud_rate: 9600,
            read_timeout: Duration::from_millis(10),
        }
    }

    #[test]
    fn timeouts_read_as_empty_chunks() {
        let line = MockLine::new();
        let port = OpenPort::new("COM3", settings(), Utc::now(), Box::new(line.clone()));

        assert_eq!(port.read_chunk().unwrap(), Vec::<u8>::new());
        line.feed(b"1,2,C\n");
        assert_eq!(port.read_chunk().unwrap(), b"1,2,C\n".to_vec());
    }

    #[test]
    fn unplugged_device_is_an_error() {
        let line = MockLine::new();
        let port = OpenPort::new("COM3", settings(), Utc::now(), Box::new(line.clone()));

        line.unplug();
        let err = port.read_chunk().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BrokenPipe);
    }

    #[test]
    fn end_of_stream_is_an_error() {
        let port = OpenPort::new(
            "COM3",
            settings(),
            Utc::now(),
            Box::new(std::io::empty()),
        );
        assert_eq!(port.read_chunk().unwrap_err().kind(), ErrorKind::UnexpectedEof);
    }
}
