use serde_json::json;

use super::{elapsed_seconds, require_connected, Reply, Request};
use crate::dispatch::dispatcher::DispatchContext;
use crate::error_handling::types::HandlerError;
use crate::session_management::REPLAY_BUFFER_START_TIME;

pub async fn start(ctx: &DispatchContext, req: &Request) -> Result<Reply, HandlerError> {
    require_connected(ctx).await?;

    ctx.link
        .start_replay_buffer()
        .await
        .map_err(|e| HandlerError::device("Failed to start replay buffer", e))?;

    let now = ctx.clock.now();
    req.session.set_timestamp(REPLAY_BUFFER_START_TIME, now)?;

    Ok(Reply::with_data(
        "Replay buffer started successfully",
        json!({ "datetime": now.to_rfc3339() }),
    ))
}

pub async fn stop(ctx: &DispatchContext, req: &Request) -> Result<Reply, HandlerError> {
    require_connected(ctx).await?;

    ctx.link
        .stop_replay_buffer()
        .await
        .map_err(|e| HandlerError::device("Failed to stop replay buffer", e))?;

    let now = ctx.clock.now();
    let started = req.session.take_timestamp(REPLAY_BUFFER_START_TIME)?;

    Ok(Reply::with_data(
        "Replay buffer stopped successfully",
        json!({
            "duration": elapsed_seconds(started, now),
            "datetime": now.to_rfc3339(),
        }),
    ))
}

/// OBS reports the saved file only through a later event, so `file_path` is always empty here.
pub async fn save(ctx: &DispatchContext, _req: &Request) -> Result<Reply, HandlerError> {
    require_connected(ctx).await?;

    ctx.link
        .save_replay_buffer()
        .await
        .map_err(|e| HandlerError::device("Failed to save replay buffer", e))?;

    Ok(Reply::with_data(
        "Replay buffer save initiated",
        json!({
            "file_path": "",
            "datetime": ctx.clock.now().to_rfc3339(),
        }),
    ))
}
