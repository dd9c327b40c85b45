//! Serial data streams.
//!
//! Ports are opened exclusively through a [`ResourceGate`]; the [`StreamMultiplexer`] runs one
//! polling producer per streamed port and fans parsed records out to every subscribed session.

#[cfg(test)]
pub mod mock_port;
pub mod multiplexer;
pub mod record;
pub mod resource_gate;
pub mod serial_port;

pub use multiplexer::StreamMultiplexer;
pub use record::{LineBuffer, RecordLayout};
pub use resource_gate::{GateHandle, ResourceGate};
pub use serial_port::{OpenPort, PortInfo, PortOpener, PortSettings, SystemPorts};
