//! Storage subsystem
//!
//! Filesystem bookkeeping for the gateway: the output directories for recordings and
//! snapshots, and timestamped snapshot files written by the snapshot handler.

pub mod file_storage;

pub use file_storage::FileStorage;
