use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::json;

use super::{require_connected, Reply, Request};
use crate::dispatch::dispatcher::DispatchContext;
use crate::error_handling::types::HandlerError;

const CONTEXT: &str = "Failed to save image snapshot";

const DEFAULT_FORMAT: &str = "png";
const DEFAULT_WIDTH: u32 = 1920;
const DEFAULT_HEIGHT: u32 = 1080;

/// Decodes a screenshot payload, tolerating a `data:` URI prefix, embedded whitespace and
/// missing padding.
pub fn decode_image(payload: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let encoded = match payload.split_once(',') {
        Some((prefix, data)) if prefix.starts_with("data:") => data,
        _ => payload,
    };

    let mut encoded: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    while encoded.len() % 4 != 0 {
        encoded.push('=');
    }
    STANDARD.decode(encoded)
}

/// `SAVE_IMAGE_SNAPSHOT`: captures the requested source (the current program scene by default)
/// and writes it under the snapshot directory.
pub async fn save(ctx: &DispatchContext, req: &Request) -> Result<Reply, HandlerError> {
    let params = &req.parameters;
    let format = params
        .str_or("image_format", DEFAULT_FORMAT)?
        .to_ascii_lowercase();
    let width = params.u32_or("width", DEFAULT_WIDTH)?;
    let height = params.u32_or("height", DEFAULT_HEIGHT)?;
    let source = params.opt_str("source_name")?;

    require_connected(ctx).await?;

    let source = match source {
        Some(source) => source,
        None => ctx
            .link
            .current_program_scene()
            .await
            .map_err(|e| HandlerError::device(CONTEXT, e))?,
    };

    let payload = ctx
        .link
        .source_screenshot(&source, &format, width, height)
        .await
        .map_err(|e| HandlerError::device(CONTEXT, e))?;

    let bytes = decode_image(&payload).map_err(|e| HandlerError::failed(CONTEXT, e))?;
    let taken_at = ctx.clock.now();
    let path = ctx
        .storage
        .write_snapshot(&bytes, &format, taken_at)
        .map_err(|e| HandlerError::failed(CONTEXT, e))?;

    Ok(Reply::with_data(
        "Image snapshot saved successfully",
        json!({
            "file_path": path.to_string_lossy(),
            "source_name": source,
            "datetime": taken_at.to_rfc3339(),
        }),
    ))
}
