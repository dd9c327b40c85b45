//! In-memory serial ports for tests.

use std::collections::{HashMap, VecDeque};
use std::io::{ErrorKind, Read};
use std::sync::{Arc, Mutex};

use super::serial_port::{PortInfo, PortOpener, PortSettings};
use crate::error_handling::types::ResourceError;

#[derive(Default)]
struct LineState {
    chunks: VecDeque<Vec<u8>>,
    unplugged: bool,
}

/// The device end of a fake serial line. Clones share the same buffer.
#[derive(Clone, Default)]
pub struct MockLine {
    state: Arc<Mutex<LineState>>,
}

impl MockLine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&self, bytes: &[u8]) {
        self.state.lock().unwrap().chunks.push_back(bytes.to_vec());
    }

    pub fn unplug(&self) {
        self.state.lock().unwrap().unplugged = true;
    }
}

impl Read for MockLine {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let mut state = self.state.lock().unwrap();
        if state.unplugged {
            return Err(std::io::Error::new(ErrorKind::BrokenPipe, "device unplugged"));
        }
        let Some(mut chunk) = state.chunks.pop_front() else {
            return Err(std::io::Error::new(ErrorKind::TimedOut, "no data"));
        };
        let n = chunk.len().min(buf.len());
        buf[..n].copy_from_slice(&chunk[..n]);
        if n < chunk.len() {
            state.chunks.push_front(chunk.split_off(n));
        }
        Ok(n)
    }
}

/// A fixed set of named fake ports.
#[derive(Clone, Default)]
pub struct MockPorts {
    lines: Arc<Mutex<HashMap<String, MockLine>>>,
    opens: Arc<Mutex<Vec<(String, u32)>>>,
}

impl MockPorts {
    pub fn with_ports(names: &[&str]) -> Self {
        let ports = Self::default();
        for name in names {
            ports
                .lines
                .lock()
                .unwrap()
                .insert(name.to_string(), MockLine::new());
        }
        ports
    }

    pub fn line(&self, name: &str) -> MockLine {
        self.lines.lock().unwrap()[name].clone()
    }

    /// Every successful open so far, as `(port, baud_rate)`.
    pub fn opens(&self) -> Vec<(String, u32)> {
        self.opens.lock().unwrap().clone()
    }
}

impl PortOpener for MockPorts {
    fn list(&self) -> Result<Vec<PortInfo>, ResourceError> {
        let mut names: Vec<String> = self.lines.lock().unwrap().keys().cloned().collect();
        names.sort();
        Ok(names
            .into_iter()
            .map(|name| PortInfo::named(name, "Unknown"))
            .collect())
    }

    fn open(
        &self,
        name: &str,
        settings: &PortSettings,
    ) -> Result<Box<dyn Read + Send>, ResourceError> {
        let line = self
            .lines
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| ResourceError::OpenFailed {
                key: name.to_string(),
                reason: "No such file or directory".to_string(),
            })?;
        self.opens
            .lock()
            .unwrap()
            .push((name.to_string(), settings.baud_rate));
        Ok(Box::new(line))
    }
}
