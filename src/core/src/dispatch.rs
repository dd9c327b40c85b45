//! Command dispatch.
//!
//! Inbound text frames are decoded into [`envelope::CommandEnvelope`]s, resolved against the
//! fixed [`Command`] table and executed by one handler each, producing exactly one
//! [`envelope::ResponseEnvelope`].

pub mod dispatcher;
pub mod envelope;
pub mod handlers;

pub use dispatcher::{Command, CommandDispatcher, DispatchContext};
pub use envelope::{CommandEnvelope, ResponseEnvelope, Status};
