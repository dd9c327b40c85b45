use std::io::ErrorKind;
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use log::{debug, info, warn};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tungstenite::{Message, WebSocket};
use uuid::Uuid;

use super::client::{DeviceClient, DeviceConnector, DeviceTarget};
use crate::error_handling::types::{CallError, ConnectError};

const RPC_VERSION: u64 = 1;

const OP_HELLO: u64 = 0;
const OP_IDENTIFY: u64 = 1;
const OP_IDENTIFIED: u64 = 2;
const OP_REQUEST: u64 = 6;
const OP_REQUEST_RESPONSE: u64 = 7;

const CLOSE_AUTHENTICATION_FAILED: u16 = 4009;

/// Opens obs-websocket (protocol v5) connections.
#[derive(Debug, Clone)]
pub struct ObsConnector {
    request_timeout: Duration,
}

impl ObsConnector {
    pub fn new(request_timeout: Duration) -> Self {
        Self { request_timeout }
    }
}

impl DeviceConnector for ObsConnector {
    fn connect(&self, target: &DeviceTarget) -> Result<Arc<dyn DeviceClient>, ConnectError> {
        let client = ObsClient::connect(target, self.request_timeout)?;
        Ok(Arc::new(client))
    }
}

/// `base64(sha256(base64(sha256(password + salt)) + challenge))`
pub fn authentication_string(password: &str, salt: &str, challenge: &str) -> String {
    let secret = STANDARD.encode(Sha256::digest(format!("{}{}", password, salt).as_bytes()));
    STANDARD.encode(Sha256::digest(format!("{}{}", secret, challenge).as_bytes()))
}

/// Builds the Identify payload answering a Hello.
fn identify_payload(hello: &Value, password: &str) -> Result<Value, ConnectError> {
    let mut identify = json!({
        "rpcVersion": RPC_VERSION,
        "eventSubscriptions": 0,
    });

    if let Some(auth) = hello.get("authentication") {
        if password.is_empty() {
            return Err(ConnectError::Authentication(
                "OBS requires a password but none was configured".to_string(),
            ));
        }
        let (Some(challenge), Some(salt)) = (
            auth.get("challenge").and_then(Value::as_str),
            auth.get("salt").and_then(Value::as_str),
        ) else {
            return Err(ConnectError::Handshake(
                "Hello carries an incomplete authentication block".to_string(),
            ));
        };
        identify["authentication"] = Value::String(authentication_string(password, salt, challenge));
    }
    Ok(identify)
}

/// Extracts the reply data from a RequestResponse `d` object.
fn response_data(request: &str, d: &Value) -> Result<Value, CallError> {
    let status = d
        .get("requestStatus")
        .ok_or_else(|| CallError::Protocol(format!("{} response has no requestStatus", request)))?;

    match status.get("result").and_then(Value::as_bool) {
        Some(true) => Ok(d.get("responseData").cloned().unwrap_or(Value::Null)),
        Some(false) => Err(CallError::Request {
            request: request.to_string(),
            code: status.get("code").and_then(Value::as_i64).unwrap_or_default(),
            comment: status
                .get("comment")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        }),
        None => Err(CallError::Protocol(format!(
            "{} response has no result flag",
            request
        ))),
    }
}

enum Incoming {
    Frame { op: u64, d: Value },
    TimedOut,
    Closed { code: Option<u16>, reason: String },
}

fn read_frame(socket: &mut WebSocket<TcpStream>) -> Result<Incoming, String> {
    loop {
        match socket.read() {
            Ok(Message::Text(text)) => {
                let frame: Value =
                    serde_json::from_str(&text).map_err(|e| format!("invalid frame: {}", e))?;
                let op = frame
                    .get("op")
                    .and_then(Value::as_u64)
                    .ok_or_else(|| "frame without op code".to_string())?;
                let d = frame.get("d").cloned().unwrap_or(Value::Null);
                return Ok(Incoming::Frame { op, d });
            }
            Ok(Message::Close(frame)) => {
                return Ok(Incoming::Closed {
                    code: frame.as_ref().map(|f| u16::from(f.code)),
                    reason: frame.map(|f| f.reason.to_string()).unwrap_or_default(),
                })
            }
            Ok(_) => continue,
            Err(tungstenite::Error::Io(e))
                if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
            {
                return Ok(Incoming::TimedOut)
            }
            Err(e) => return Err(e.to_string()),
        }
    }
}

fn send_frame(socket: &mut WebSocket<TcpStream>, op: u64, d: Value) -> Result<(), String> {
    let frame = json!({ "op": op, "d": d });
    socket
        .send(Message::Text(frame.to_string().into()))
        .map_err(|e| e.to_string())
}

/// Waits for a frame with `op` during the handshake, skipping anything else.
fn expect_op(
    socket: &mut WebSocket<TcpStream>,
    op: u64,
    deadline: Instant,
) -> Result<Value, ConnectError> {
    loop {
        if Instant::now() >= deadline {
            return Err(ConnectError::Timeout);
        }
        match read_frame(socket).map_err(ConnectError::Handshake)? {
            Incoming::Frame { op: got, d } if got == op => return Ok(d),
            Incoming::Frame { op: got, .. } => debug!("Skipping op {} during handshake", got),
            Incoming::TimedOut => continue,
            Incoming::Closed { code, reason } => {
                return Err(if code == Some(CLOSE_AUTHENTICATION_FAILED) {
                    ConnectError::Authentication(reason)
                } else {
                    ConnectError::Handshake(format!(
                        "connection closed by OBS (code {:?}): {}",
                        code, reason
                    ))
                })
            }
        }
    }
}

/// A blocking obs-websocket session. Calls are serialized on the socket lock.
pub struct ObsClient {
    address: String,
    request_timeout: Duration,
    socket: Mutex<WebSocket<TcpStream>>,
}

impl ObsClient {
    pub fn connect(target: &DeviceTarget, request_timeout: Duration) -> Result<Self, ConnectError> {
        let address = target.address();
        let deadline = Instant::now() + target.timeout;

        let addr = (target.host.as_str(), target.port)
            .to_socket_addrs()
            .map_err(|e| ConnectError::AddressResolution(format!("{}: {}", address, e)))?
            .next()
            .ok_or_else(|| ConnectError::AddressResolution(address.clone()))?;

        let stream = TcpStream::connect_timeout(&addr, target.timeout).map_err(|e| {
            if e.kind() == ErrorKind::TimedOut {
                ConnectError::Timeout
            } else {
                ConnectError::Io(e)
            }
        })?;
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(target.timeout))?;
        stream.set_write_timeout(Some(target.timeout))?;

        let url = format!("ws://{}", address);
        let (mut socket, _) = tungstenite::client(url.as_str(), stream)
            .map_err(|e| ConnectError::Handshake(e.to_string()))?;

        let hello = expect_op(&mut socket, OP_HELLO, deadline)?;
        debug!(
            "OBS hello from {} (obs-websocket {})",
            address,
            hello
                .get("obsWebSocketVersion")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
        );

        let identify = identify_payload(&hello, &target.password)?;
        send_frame(&mut socket, OP_IDENTIFY, identify).map_err(ConnectError::Handshake)?;
        let identified = expect_op(&mut socket, OP_IDENTIFIED, deadline)?;

        socket.get_ref().set_read_timeout(Some(request_timeout))?;
        socket.get_ref().set_write_timeout(Some(request_timeout))?;
        info!(
            "Identified with OBS at {} (rpc version {})",
            address,
            identified
                .get("negotiatedRpcVersion")
                .and_then(Value::as_u64)
                .unwrap_or(RPC_VERSION)
        );

        Ok(Self {
            address,
            request_timeout,
            socket: Mutex::new(socket),
        })
    }
}

impl DeviceClient for ObsClient {
    fn call(&self, request: &str, data: Option<Value>) -> Result<Value, CallError> {
        let mut socket = self.socket.lock().unwrap_or_else(PoisonError::into_inner);
        let request_id = Uuid::new_v4().to_string();

        let mut d = json!({ "requestType": request, "requestId": request_id });
        if let Some(data) = data {
            d["requestData"] = data;
        }
        send_frame(&mut socket, OP_REQUEST, d).map_err(CallError::Transport)?;

        let deadline = Instant::now() + self.request_timeout;
        loop {
            if Instant::now() >= deadline {
                warn!("{} to {} timed out", request, self.address);
                return Err(CallError::Timeout);
            }
            match read_frame(&mut socket).map_err(CallError::Transport)? {
                Incoming::Frame { op, d } if op == OP_REQUEST_RESPONSE => {
                    if d.get("requestId").and_then(Value::as_str) == Some(request_id.as_str()) {
                        return response_data(request, &d);
                    }
                    debug!("Dropping stale response from {}", self.address);
                }
                Incoming::Frame { .. } | Incoming::TimedOut => continue,
                Incoming::Closed { code, reason } => {
                    return Err(CallError::Transport(format!(
                        "connection closed by OBS (code {:?}): {}",
                        code, reason
                    )))
                }
            }
        }
    }

    fn disconnect(&self) {
        let mut socket = self.socket.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = socket.close(None).and_then(|_| socket.flush()) {
            debug!("Closing connection to {}: {}", self.address, e);
        }
        info!("Disconnected from OBS at {}", self.address);
    }
}
