//! The single shared link to the OBS Studio instance.
//!
//! [`ControllerLink`] owns at most one [`DeviceClient`] at a time and runs its blocking calls on
//! the blocking pool. [`ObsConnector`] speaks obs-websocket v5; tests substitute a mock device.

pub mod client;
pub mod link;
#[cfg(test)]
pub mod mock_device;
pub mod obs_client;
pub mod verbs;

pub use client::{DeviceClient, DeviceConnector, DeviceTarget};
pub use link::{ControllerLink, LinkStatus};
pub use obs_client::ObsConnector;
pub use verbs::RecordStatus;
