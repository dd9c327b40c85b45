use std::collections::HashSet;
use std::sync::Arc;

use log::info;
use serde_json::{json, Value};

use super::{Reply, Request};
use crate::data_stream::{OpenPort, PortSettings, RecordLayout};
use crate::dispatch::dispatcher::DispatchContext;
use crate::error_handling::types::{HandlerError, ResourceError};

fn invalid(name: &str, expected: &'static str) -> HandlerError {
    HandlerError::InvalidParameter {
        name: name.to_string(),
        expected,
    }
}

/// `GET_COM_PORTS`
pub async fn list_ports(ctx: &DispatchContext, _req: &Request) -> Result<Reply, HandlerError> {
    let opener = Arc::clone(&ctx.ports);
    let ports = tokio::task::spawn_blocking(move || opener.list())
        .await
        .map_err(|e| HandlerError::failed("Failed to list COM ports", e))??;

    let gate = ctx.multiplexer.ports();
    let ports: Vec<Value> = ports
        .into_iter()
        .map(|info| {
            let is_open = gate.is_open(&info.port_name);
            let mut entry = json!(info);
            entry["is_open"] = Value::Bool(is_open);
            entry
        })
        .collect();

    Ok(Reply::with_data(
        "COM ports retrieved successfully",
        json!({ "count": ports.len(), "ports": ports }),
    ))
}

/// `OPEN_COM_PORT`: the port is reserved first so a concurrent opener fails fast, then opened
/// off the async executor.
pub async fn open_port(ctx: &DispatchContext, req: &Request) -> Result<Reply, HandlerError> {
    let params = &req.parameters;
    let port = params.required_str("port")?;
    let baud_rate = params.u32_or("baud_rate", ctx.stream.baud_rate)?;
    if baud_rate == 0 {
        return Err(invalid("baud_rate", "a positive integer"));
    }
    let settings = PortSettings {
        baud_rate,
        read_timeout: ctx.stream.read_timeout(),
    };

    let gate = ctx.multiplexer.ports();
    let handle = gate.try_acquire_exclusive(&port)?;

    let opener = Arc::clone(&ctx.ports);
    let name = port.clone();
    let opened = tokio::task::spawn_blocking(move || opener.open(&name, &settings)).await;

    let reader = match opened {
        Ok(Ok(reader)) => reader,
        Ok(Err(e)) => {
            gate.release(&handle);
            return Err(HandlerError::failed("Failed to open COM port", e));
        }
        Err(e) => {
            gate.release(&handle);
            return Err(HandlerError::failed("Failed to open COM port", e));
        }
    };

    let opened_at = ctx.clock.now();
    gate.install(&handle, OpenPort::new(port.clone(), settings, opened_at, reader))?;
    info!("Session {} opened {} at {} baud", req.session.id, port, baud_rate);

    Ok(Reply::with_data(
        format!("Port {} opened successfully", port),
        json!({
            "port": port,
            "baud_rate": baud_rate,
            "opened_at": opened_at.to_rfc3339(),
        }),
    ))
}

/// `CLOSE_COM_PORT`: any session may close a port; its streaming subscribers are told.
pub async fn close_port(ctx: &DispatchContext, req: &Request) -> Result<Reply, HandlerError> {
    let port = req.parameters.required_str("port")?;
    let message = format!("Port {} was closed", port);

    ctx.multiplexer.close_key(&port, &message)?;
    info!("Session {} closed {}", req.session.id, port);

    Ok(Reply::with_data(message, json!({ "port": port })))
}

/// `GET_DATA_STREAM`: records are pushed with this command's `command_uid` until the stream is
/// stopped, the port closes or the session ends.
pub async fn start_stream(ctx: &DispatchContext, req: &Request) -> Result<Reply, HandlerError> {
    let port = req.parameters.required_str("port")?;

    let subscribers = ctx
        .multiplexer
        .subscribe(&req.session, &port, req.command_uid.clone())?;
    let layout = ctx.multiplexer.layout_for(&port);

    Ok(Reply::with_data(
        format!("Data stream started on port {}", port),
        json!({
            "port": port,
            "keys": layout.keys,
            "delimiter": layout.delimiter,
            "subscribers": subscribers,
        }),
    ))
}

/// `STOP_DATA_STREAM`
pub async fn stop_stream(ctx: &DispatchContext, req: &Request) -> Result<Reply, HandlerError> {
    let port = req.parameters.required_str("port")?;

    if !ctx.multiplexer.unsubscribe(req.session.id, &port) {
        return Err(HandlerError::Precondition(format!(
            "No active data stream on port {} for this session",
            port
        )));
    }

    Ok(Reply::with_data(
        format!("Data stream stopped on port {}", port),
        json!({
            "port": port,
            "subscribers": ctx.multiplexer.subscriber_count(&port),
        }),
    ))
}

/// `GET_COM_STATUS`: every open port, or just `port` when given.
pub async fn status(ctx: &DispatchContext, req: &Request) -> Result<Reply, HandlerError> {
    let filter = req.parameters.opt_str("port")?;
    let gate = ctx.multiplexer.ports();

    let entries: Vec<_> = gate
        .open_entries()
        .into_iter()
        .filter(|(key, _)| filter.as_deref().map_or(true, |wanted| wanted == key.as_str()))
        .collect();

    if let Some(wanted) = &filter {
        if entries.is_empty() {
            return Err(ResourceError::NotOpen(wanted.clone()).into());
        }
    }

    let ports: Vec<Value> = entries
        .iter()
        .map(|(key, port)| {
            json!({
                "port": key,
                "baud_rate": port.settings.baud_rate,
                "opened_at": port.opened_at.to_rfc3339(),
                "streaming": ctx.multiplexer.is_running(key),
                "subscribers": ctx.multiplexer.subscriber_count(key),
                "subscribed": ctx.multiplexer.is_subscribed(req.session.id, key),
            })
        })
        .collect();

    Ok(Reply::with_data(
        "COM status retrieved successfully",
        json!({ "count": ports.len(), "ports": ports }),
    ))
}

/// `GET_PREDEFINED_KEYS`: the configured key catalogue and the layout currently applied by
/// default.
pub async fn predefined_keys(ctx: &DispatchContext, _req: &Request) -> Result<Reply, HandlerError> {
    let layout = ctx.multiplexer.default_layout();
    Ok(Reply::with_data(
        "Predefined keys retrieved successfully",
        json!({
            "keys": ctx.stream.predefined_keys,
            "delimiter": ctx.stream.delimiter,
            "active_blocks": layout.keys,
            "active_delimiter": layout.delimiter,
        }),
    ))
}

/// `SET_DATA_BLOCKS`: replaces the record layout for one port, or the default layout.
pub async fn set_data_blocks(ctx: &DispatchContext, req: &Request) -> Result<Reply, HandlerError> {
    const BLOCKS: &str = "a non-empty list of unique, non-blank names";
    let params = &req.parameters;

    let blocks: Vec<String> = params
        .opt_string_list("blocks")?
        .ok_or_else(|| invalid("blocks", BLOCKS))?
        .into_iter()
        .map(|block| block.trim().to_string())
        .collect();

    let mut seen = HashSet::new();
    if blocks.is_empty() || blocks.iter().any(|b| b.is_empty() || !seen.insert(b.as_str())) {
        return Err(invalid("blocks", BLOCKS));
    }

    let port = params.opt_str("port")?;
    let delimiter = match params.opt_str("delimiter")? {
        Some(d) if d.is_empty() => return Err(invalid("delimiter", "a non-empty string")),
        Some(d) => d,
        None => match &port {
            Some(port) => ctx.multiplexer.layout_for(port).delimiter,
            None => ctx.multiplexer.default_layout().delimiter,
        },
    };

    ctx.multiplexer
        .set_layout(port.as_deref(), RecordLayout::new(blocks.clone(), delimiter.clone()));

    Ok(Reply::with_data(
        "Data blocks updated successfully",
        json!({
            "port": port,
            "blocks": blocks,
            "delimiter": delimiter,
        }),
    ))
}
