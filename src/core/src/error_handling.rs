//! Error types shared across the gateway subsystems.

pub mod types;
