use std::net::SocketAddr;
use std::sync::Arc;

use log::{info, warn};
use serde::Serialize;
use tokio::sync::mpsc;
use warp::hyper::body::Bytes;
use warp::{http::StatusCode, reply, Filter, Rejection, Reply};

use super::connection;
use crate::dispatch::{CommandDispatcher, ResponseEnvelope};

const MAX_COMMAND_BYTES: u64 = 1024 * 1024;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub sessions: usize,
    pub device_connected: bool,
}

/// Every route the gateway serves, with CORS and request logging applied.
pub fn routes(
    dispatcher: CommandDispatcher,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    let cors = warp::cors()
        .allow_any_origin()
        .allow_methods(vec!["GET", "POST", "OPTIONS"])
        .allow_headers(vec!["content-type"]);

    session_route(dispatcher.clone())
        .or(command_route(dispatcher.clone()).with(cors.clone()))
        .or(health_route(dispatcher).with(cors))
        .with(warp::log("obs_gateway::http"))
}

/// GET / with an upgrade: one session per connection
pub fn session_route(
    dispatcher: CommandDispatcher,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path::end()
        .and(warp::ws())
        .and(warp::addr::remote())
        .map(move |ws: warp::ws::Ws, peer: Option<SocketAddr>| {
            let dispatcher = dispatcher.clone();
            info!("WebSocket upgrade from {:?}", peer);
            ws.on_upgrade(move |socket| connection::serve(socket, peer, dispatcher))
        })
}

/// POST /command: one command on a session that lives for this request only.
pub fn command_route(
    dispatcher: CommandDispatcher,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path("command")
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::addr::remote())
        .and(warp::body::content_length_limit(MAX_COMMAND_BYTES))
        .and(warp::body::bytes())
        .and_then(move |peer: Option<SocketAddr>, body: Bytes| {
            let dispatcher = dispatcher.clone();
            async move {
                let raw = String::from_utf8_lossy(&body).into_owned();
                // Detached so a dropped request still unregisters its session.
                let call = tokio::spawn(async move {
                    let registry = Arc::clone(&dispatcher.context().registry);
                    let (outbound, _pushes) = mpsc::unbounded_channel();
                    let session_id = registry.register(peer, outbound).id;

                    let response = dispatcher.dispatch(session_id, &raw).await;
                    registry.unregister(session_id);
                    response
                });
                let response = match call.await {
                    Ok(response) => response,
                    Err(e) => {
                        warn!("HTTP command task failed: {}", e);
                        ResponseEnvelope::error(
                            None,
                            None,
                            format!("Error processing command: {}", e),
                        )
                    }
                };

                let status = if response.is_success() {
                    StatusCode::OK
                } else {
                    StatusCode::INTERNAL_SERVER_ERROR
                };
                Ok::<_, Rejection>(reply::with_status(reply::json(&response), status))
            }
        })
}

/// GET /health
pub fn health_route(
    dispatcher: CommandDispatcher,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path("health")
        .and(warp::path::end())
        .and(warp::get())
        .and_then(move || {
            let dispatcher = dispatcher.clone();
            async move {
                let context = dispatcher.context();
                let health = HealthResponse {
                    status: "ok",
                    sessions: context.registry.active_count(),
                    device_connected: context.link.is_connected().await,
                };
                Ok::<_, Rejection>(reply::json(&health))
            }
        })
}
