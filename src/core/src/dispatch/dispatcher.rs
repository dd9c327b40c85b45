use std::any::Any;
use std::sync::Arc;

use log::{debug, info, warn};
use uuid::Uuid;

use super::envelope::{self, CommandEnvelope, ResponseEnvelope};
use super::handlers::{connection, recording, replay_buffer, serial, snapshot, Reply, Request};
use crate::clock::Clock;
use crate::configuration::{DeviceConfig, StreamConfig};
use crate::data_stream::{PortOpener, StreamMultiplexer};
use crate::device_link::ControllerLink;
use crate::error_handling::types::HandlerError;
use crate::session_management::SessionRegistry;
use crate::storage::FileStorage;

/// Every command the gateway understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    ConnectWebsocket,
    DisconnectWebsocket,
    StartRecording,
    StopRecording,
    PauseRecording,
    ResumeRecording,
    SaveImageSnapshot,
    StartReplayBuffer,
    StopReplayBuffer,
    SaveReplayBuffer,
    GetComPorts,
    OpenComPort,
    CloseComPort,
    GetDataStream,
    StopDataStream,
    GetComStatus,
    GetPredefinedKeys,
    SetDataBlocks,
}

const COMMAND_TABLE: &[(&str, Command)] = &[
    ("CONNECT_WEBSOCKET", Command::ConnectWebsocket),
    ("DISCONNECT_WEBSOCKET", Command::DisconnectWebsocket),
    ("START_RECORDING", Command::StartRecording),
    ("STOP_RECORDING", Command::StopRecording),
    ("PAUSE_RECORDING", Command::PauseRecording),
    ("RESUME_RECORDING", Command::ResumeRecording),
    ("SAVE_IMAGE_SNAPSHOT", Command::SaveImageSnapshot),
    ("START_REPLAY_BUFFER", Command::StartReplayBuffer),
    ("STOP_REPLAY_BUFFER", Command::StopReplayBuffer),
    ("SAVE_REPLAY_BUFFER", Command::SaveReplayBuffer),
    ("GET_COM_PORTS", Command::GetComPorts),
    ("OPEN_COM_PORT", Command::OpenComPort),
    ("CLOSE_COM_PORT", Command::CloseComPort),
    ("GET_DATA_STREAM", Command::GetDataStream),
    ("STOP_DATA_STREAM", Command::StopDataStream),
    ("GET_COM_STATUS", Command::GetComStatus),
    ("GET_PREDEFINED_KEYS", Command::GetPredefinedKeys),
    ("SET_DATA_BLOCKS", Command::SetDataBlocks),
];

impl Command {
    /// Exact, case-sensitive lookup.
    pub fn from_name(name: &str) -> Option<Self> {
        COMMAND_TABLE
            .iter()
            .find(|(candidate, _)| *candidate == name)
            .map(|(_, command)| *command)
    }

    pub fn name(self) -> &'static str {
        COMMAND_TABLE
            .iter()
            .find(|(_, command)| *command == self)
            .map(|(name, _)| *name)
            .unwrap_or("UNKNOWN")
    }

    pub fn all() -> impl Iterator<Item = Command> {
        COMMAND_TABLE.iter().map(|(_, command)| *command)
    }

    async fn execute(self, ctx: &DispatchContext, req: &Request) -> Result<Reply, HandlerError> {
        match self {
            Command::ConnectWebsocket => connection::connect(ctx, req).await,
            Command::DisconnectWebsocket => connection::disconnect(ctx, req).await,
            Command::StartRecording => recording::start(ctx, req).await,
            Command::StopRecording => recording::stop(ctx, req).await,
            Command::PauseRecording => recording::pause(ctx, req).await,
            Command::ResumeRecording => recording::resume(ctx, req).await,
            Command::SaveImageSnapshot => snapshot::save(ctx, req).await,
            Command::StartReplayBuffer => replay_buffer::start(ctx, req).await,
            Command::StopReplayBuffer => replay_buffer::stop(ctx, req).await,
            Command::SaveReplayBuffer => replay_buffer::save(ctx, req).await,
            Command::GetComPorts => serial::list_ports(ctx, req).await,
            Command::OpenComPort => serial::open_port(ctx, req).await,
            Command::CloseComPort => serial::close_port(ctx, req).await,
            Command::GetDataStream => serial::start_stream(ctx, req).await,
            Command::StopDataStream => serial::stop_stream(ctx, req).await,
            Command::GetComStatus => serial::status(ctx, req).await,
            Command::GetPredefinedKeys => serial::predefined_keys(ctx, req).await,
            Command::SetDataBlocks => serial::set_data_blocks(ctx, req).await,
        }
    }
}

/// Everything a handler may touch.
///
/// # Fields Overview
///
/// - `link`: the shared OBS connection
/// - `registry`: live sessions, used to resolve the session a message arrived on
/// - `multiplexer`: serial feeds and the port gate behind them
/// - `ports`: opens and enumerates serial ports
/// - `storage`: snapshot and recording directories
/// - `clock`: time source for recording and replay durations
/// - `device`: connection defaults for `CONNECT_WEBSOCKET`
/// - `stream`: serial defaults and the predefined key catalogue
/// - `set_record_directory`: point OBS at the video directory before recording
pub struct DispatchContext {
    pub link: Arc<ControllerLink>,
    pub registry: Arc<SessionRegistry>,
    pub multiplexer: Arc<StreamMultiplexer>,
    pub ports: Arc<dyn PortOpener>,
    pub storage: FileStorage,
    pub clock: Arc<dyn Clock>,
    pub device: DeviceConfig,
    pub stream: StreamConfig,
    pub set_record_directory: bool,
}

/// Turns inbound messages into exactly one correlated response each.
#[derive(Clone)]
pub struct CommandDispatcher {
    context: Arc<DispatchContext>,
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "handler panicked".to_string())
}

impl CommandDispatcher {
    pub fn new(context: DispatchContext) -> Self {
        Self {
            context: Arc::new(context),
        }
    }

    pub fn context(&self) -> &DispatchContext {
        &self.context
    }

    /// Handles one raw text frame received on the session `session_id`.
    pub async fn dispatch(&self, session_id: Uuid, raw: &str) -> ResponseEnvelope {
        match envelope::decode(raw) {
            Ok(envelope) => self.dispatch_envelope(session_id, envelope).await,
            Err(failure) => {
                warn!(
                    "Invalid JSON from session {}: {}",
                    session_id, failure.reason
                );
                ResponseEnvelope::error(failure.command_uid, Some(session_id), "Invalid JSON format")
            }
        }
    }

    pub async fn dispatch_envelope(
        &self,
        session_id: Uuid,
        envelope: CommandEnvelope,
    ) -> ResponseEnvelope {
        let command_uid = envelope.command_uid.clone();

        let session = match self.context.registry.lookup(session_id) {
            Ok(session) => session,
            Err(e) => return ResponseEnvelope::error(command_uid, Some(session_id), e.to_string()),
        };

        let Some(command) = Command::from_name(&envelope.command) else {
            warn!(
                "Unknown command {} from session {}",
                envelope.command, session_id
            );
            return ResponseEnvelope::error(
                command_uid,
                Some(session_id),
                HandlerError::UnknownCommand(envelope.command).to_string(),
            );
        };

        info!("Session {} -> {}", session_id, command.name());
        let request = Request {
            session,
            parameters: envelope.parameters(),
            command_uid: command_uid.clone(),
        };

        // A spawned task turns a handler panic into a JoinError instead of unwinding the
        // connection.
        let context = Arc::clone(&self.context);
        let outcome =
            match tokio::spawn(async move { command.execute(&context, &request).await }).await {
                Ok(outcome) => outcome,
                Err(e) if e.is_panic() => Err(HandlerError::Internal(panic_message(e.into_panic()))),
                Err(e) => Err(HandlerError::Internal(e.to_string())),
            };

        match outcome {
            Ok(reply) => {
                debug!("Session {} <- {}: {}", session_id, command.name(), reply.message);
                ResponseEnvelope::success(command_uid, Some(session_id), reply.message, reply.data)
            }
            Err(e) => {
                warn!("{} failed for session {}: {}", command.name(), session_id, e);
                ResponseEnvelope::error(command_uid, Some(session_id), e.to_string())
            }
        }
    }
}
