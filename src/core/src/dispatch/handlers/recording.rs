use serde_json::json;

use super::{elapsed_seconds, require_connected, Reply, Request};
use crate::dispatch::dispatcher::DispatchContext;
use crate::error_handling::types::HandlerError;
use crate::session_management::RECORDING_START_TIME;

pub async fn start(ctx: &DispatchContext, req: &Request) -> Result<Reply, HandlerError> {
    const CONTEXT: &str = "Failed to start recording";
    require_connected(ctx).await?;

    if ctx.set_record_directory {
        let directory = ctx
            .storage
            .video_dir()
            .map_err(|e| HandlerError::failed(CONTEXT, e))?;
        ctx.link
            .set_record_directory(&directory.to_string_lossy())
            .await
            .map_err(|e| HandlerError::device(CONTEXT, e))?;
    }

    ctx.link
        .start_record()
        .await
        .map_err(|e| HandlerError::device(CONTEXT, e))?;

    let now = ctx.clock.now();
    req.session.set_timestamp(RECORDING_START_TIME, now)?;

    Ok(Reply::with_data(
        "Video recording started successfully",
        json!({ "datetime": now.to_rfc3339() }),
    ))
}

/// The start time is only cleared once the device confirmed the stop.
pub async fn stop(ctx: &DispatchContext, req: &Request) -> Result<Reply, HandlerError> {
    require_connected(ctx).await?;

    let file_path = ctx
        .link
        .stop_record()
        .await
        .map_err(|e| HandlerError::device("Failed to stop recording", e))?;

    let now = ctx.clock.now();
    let started = req.session.take_timestamp(RECORDING_START_TIME)?;

    Ok(Reply::with_data(
        "Video recording stopped successfully",
        json!({
            "file_path": file_path,
            "duration": elapsed_seconds(started, now),
            "datetime": now.to_rfc3339(),
        }),
    ))
}

/// Pause and resume trust the device's own status, not the session timer.
pub async fn pause(ctx: &DispatchContext, _req: &Request) -> Result<Reply, HandlerError> {
    const CONTEXT: &str = "Failed to pause recording";
    require_connected(ctx).await?;

    let status = ctx
        .link
        .record_status()
        .await
        .map_err(|e| HandlerError::device(CONTEXT, e))?;
    if !status.active {
        return Err(HandlerError::Precondition(
            "No active recording to pause".to_string(),
        ));
    }
    if status.paused {
        return Err(HandlerError::Precondition(
            "Recording is already in pause state".to_string(),
        ));
    }

    ctx.link
        .pause_record()
        .await
        .map_err(|e| HandlerError::device(CONTEXT, e))?;

    Ok(Reply::with_data(
        "Video recording paused successfully",
        json!({
            "datetime": ctx.clock.now().to_rfc3339(),
            "timecode": status.timecode,
        }),
    ))
}

pub async fn resume(ctx: &DispatchContext, _req: &Request) -> Result<Reply, HandlerError> {
    const CONTEXT: &str = "Failed to resume recording";
    require_connected(ctx).await?;

    let status = ctx
        .link
        .record_status()
        .await
        .map_err(|e| HandlerError::device(CONTEXT, e))?;
    if !status.active {
        return Err(HandlerError::Precondition(
            "No active recording to resume".to_string(),
        ));
    }
    if !status.paused {
        return Err(HandlerError::Precondition(
            "Recording is already in resumed state".to_string(),
        ));
    }

    ctx.link
        .resume_record()
        .await
        .map_err(|e| HandlerError::device(CONTEXT, e))?;

    Ok(Reply::with_data(
        "Video recording resumed successfully",
        json!({
            "datetime": ctx.clock.now().to_rfc3339(),
            "timecode": status.timecode,
        }),
    ))
}
