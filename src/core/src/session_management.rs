//! Session management core module.
//!
//! One [`Session`] exists per connected client. The [`SessionRegistry`] owns the table of live
//! sessions and ties their teardown to the release of stream subscriptions.

/// Per-connection identity, state and outbound queue.
pub mod session;
/// Table of live sessions.
pub mod session_registry;

pub use session::{Outbound, Session};
pub use session_registry::SessionRegistry;

/// Session state key holding the RFC 3339 time the current recording started.
pub const RECORDING_START_TIME: &str = "recording_start_time";
/// Session state key holding the RFC 3339 time the replay buffer started.
pub const REPLAY_BUFFER_START_TIME: &str = "replay_buffer_start_time";
