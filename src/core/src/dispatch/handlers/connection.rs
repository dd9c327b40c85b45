use std::time::Duration;

use log::info;
use serde_json::json;

use super::{Reply, Request};
use crate::dispatch::dispatcher::DispatchContext;
use crate::device_link::DeviceTarget;
use crate::error_handling::types::HandlerError;

/// `CONNECT_WEBSOCKET`: (re)connects the shared link; missing parameters fall back to the
/// configured device.
pub async fn connect(ctx: &DispatchContext, req: &Request) -> Result<Reply, HandlerError> {
    let params = &req.parameters;
    let host = params.str_or("ip_address", &ctx.device.host)?;
    let port = params.u16_or("port", ctx.device.port)?;
    let password = params.str_or("password", &ctx.device.password)?;
    let timeout = match params.opt_u64("timeout")? {
        Some(0) => {
            return Err(HandlerError::InvalidParameter {
                name: "timeout".to_string(),
                expected: "a positive number of seconds",
            })
        }
        Some(secs) => Duration::from_secs(secs),
        None => ctx.device.connect_timeout(),
    };

    ctx.link
        .connect(DeviceTarget {
            host: host.clone(),
            port,
            password,
            timeout,
        })
        .await
        .map_err(HandlerError::DeviceConnect)?;

    Ok(Reply::with_data(
        "WebSocket connected successfully",
        json!({
            "ip_address": host,
            "port": port,
            "instance_id": req.session.id,
        }),
    ))
}

/// `DISCONNECT_WEBSOCKET`: drops the shared link. Succeeds even when nothing was connected.
pub async fn disconnect(ctx: &DispatchContext, req: &Request) -> Result<Reply, HandlerError> {
    if !ctx.link.disconnect().await {
        info!("Session {} disconnected an idle link", req.session.id);
    }
    Ok(Reply::new(format!(
        "WebSocket instance id {} disconnected successfully",
        req.session.id
    )))
}
