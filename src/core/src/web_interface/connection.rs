use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::sync::mpsc;
use warp::ws::{Message, WebSocket};

use crate::dispatch::{CommandDispatcher, ResponseEnvelope};

/// Drives one WebSocket connection for its whole lifetime.
///
/// The socket reader feeds a per-session queue drained by a single worker, so the commands of
/// one session run one at a time and their responses keep command order. A writer task owns the
/// sink; streamed records reach it through the same outbound queue as responses.
pub async fn serve(socket: WebSocket, peer: Option<SocketAddr>, dispatcher: CommandDispatcher) {
    let registry = Arc::clone(&dispatcher.context().registry);
    let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<ResponseEnvelope>();
    let session_id = registry.register(peer, outbound.clone()).id;

    let (mut sink, mut stream) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(envelope) = outbound_rx.recv().await {
            if let Err(e) = sink.send(Message::text(envelope.to_json())).await {
                debug!("Writer for session {} stopped: {}", session_id, e);
                break;
            }
        }
        let _ = sink.close().await;
    });

    let (inbound, mut inbound_rx) = mpsc::unbounded_channel::<String>();
    let worker = tokio::spawn(async move {
        while let Some(raw) = inbound_rx.recv().await {
            let response = dispatcher.dispatch(session_id, &raw).await;
            if outbound.send(response).is_err() {
                break;
            }
        }
    });

    while let Some(frame) = stream.next().await {
        let message = match frame {
            Ok(message) => message,
            Err(e) => {
                warn!("Transport error on session {}: {}", session_id, e);
                break;
            }
        };

        if message.is_close() {
            break;
        }
        let raw = if let Ok(text) = message.to_str() {
            text.to_string()
        } else if message.is_binary() {
            String::from_utf8_lossy(message.as_bytes()).into_owned()
        } else {
            continue;
        };

        if inbound.send(raw).is_err() {
            break;
        }
    }

    // An in-flight device call keeps running on the blocking pool; its result is dropped.
    worker.abort();
    registry.unregister(session_id);
    writer.abort();
    info!("Connection {} closed", session_id);
}
