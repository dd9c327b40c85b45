//! A scripted OBS stand-in for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};

use super::client::{DeviceClient, DeviceConnector, DeviceTarget};
use crate::error_handling::types::{CallError, ConnectError};

#[derive(Debug, Default)]
pub struct DeviceState {
    pub recording: bool,
    pub paused: bool,
    pub replay_buffer: bool,
    pub record_directory: Option<String>,
    pub scene: Option<String>,
    pub screenshot: String,
    pub calls: Vec<(String, Option<Value>)>,
    pub failures: HashMap<String, CallError>,
    pub delay: Option<Duration>,
    pub panic_on: Option<String>,
}

/// Simulates the recording state machine of a real instance.
#[derive(Debug, Default)]
pub struct MockDevice {
    pub state: Mutex<DeviceState>,
    pub disconnects: AtomicUsize,
}

impl MockDevice {
    pub fn new() -> Arc<Self> {
        let device = Self::default();
        {
            let mut state = device.state.lock().unwrap();
            state.scene = Some("Scene".to_string());
            // "hello" without its trailing padding
            state.screenshot = "data:image/png;base64,aGVsbG8".to_string();
        }
        Arc::new(device)
    }

    pub fn fail(&self, request: &str, error: CallError) {
        self.state
            .lock()
            .unwrap()
            .failures
            .insert(request.to_string(), error);
    }

    pub fn requests(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn last_data(&self, request: &str) -> Option<Value> {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .rev()
            .find(|(name, _)| name == request)
            .and_then(|(_, data)| data.clone())
    }
}

fn refused(request: &str, code: i64, comment: &str) -> CallError {
    CallError::Request {
        request: request.to_string(),
        code,
        comment: comment.to_string(),
    }
}

impl DeviceClient for MockDevice {
    fn call(&self, request: &str, data: Option<Value>) -> Result<Value, CallError> {
        let delay = {
            let mut state = self.state.lock().unwrap();
            state.calls.push((request.to_string(), data.clone()));
            if state.panic_on.as_deref() == Some(request) {
                drop(state);
                panic!("device exploded on {}", request);
            }
            if let Some(error) = state.failures.get(request) {
                return Err(error.clone());
            }
            state.delay
        };
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }

        let mut state = self.state.lock().unwrap();
        match request {
            "StartRecord" if state.recording => Err(refused(request, 500, "Output already active")),
            "StartRecord" => {
                state.recording = true;
                state.paused = false;
                Ok(Value::Null)
            }
            "StopRecord" if !state.recording => Err(refused(request, 501, "Output not active")),
            "StopRecord" => {
                state.recording = false;
                state.paused = false;
                Ok(json!({"outputPath": "/videos/2024-03-01 12-00-00.mkv"}))
            }
            "PauseRecord" if !state.recording || state.paused => {
                Err(refused(request, 501, "Output not active or already paused"))
            }
            "PauseRecord" => {
                state.paused = true;
                Ok(Value::Null)
            }
            "ResumeRecord" if !state.paused => Err(refused(request, 501, "Output not paused")),
            "ResumeRecord" => {
                state.paused = false;
                Ok(Value::Null)
            }
            "GetRecordStatus" => Ok(json!({
                "outputActive": state.recording,
                "outputPaused": state.paused,
                "outputTimecode": "00:00:05.000",
                "outputDuration": 5000,
                "outputBytes": 1024
            })),
            "SetRecordDirectory" => {
                state.record_directory = data
                    .as_ref()
                    .and_then(|d| d.get("recordDirectory"))
                    .and_then(Value::as_str)
                    .map(str::to_string);
                Ok(Value::Null)
            }
            "StartReplayBuffer" if state.replay_buffer => {
                Err(refused(request, 500, "Output already active"))
            }
            "StartReplayBuffer" => {
                state.replay_buffer = true;
                Ok(Value::Null)
            }
            "StopReplayBuffer" if !state.replay_buffer => {
                Err(refused(request, 501, "Output not active"))
            }
            "StopReplayBuffer" => {
                state.replay_buffer = false;
                Ok(Value::Null)
            }
            "SaveReplayBuffer" if !state.replay_buffer => {
                Err(refused(request, 501, "Replay buffer is not active"))
            }
            "SaveReplayBuffer" => Ok(Value::Null),
            "GetCurrentProgramScene" => match &state.scene {
                Some(scene) => Ok(json!({
                    "currentProgramSceneName": scene,
                    "sceneName": scene
                })),
                None => Err(refused(request, 600, "No current program scene")),
            },
            "GetSourceScreenshot" => Ok(json!({"imageData": state.screenshot})),
            _ => Err(refused(request, 204, "Unknown request type")),
        }
    }

    fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}

/// Hands out the same [`MockDevice`] on every successful connect.
#[derive(Debug)]
pub struct MockConnector {
    pub device: Arc<MockDevice>,
    pub refuse: Mutex<Option<String>>,
    pub targets: Mutex<Vec<DeviceTarget>>,
}

impl MockConnector {
    pub fn new(device: Arc<MockDevice>) -> Arc<Self> {
        Arc::new(Self {
            device,
            refuse: Mutex::new(None),
            targets: Mutex::new(Vec::new()),
        })
    }

    pub fn refuse_with(&self, reason: &str) {
        *self.refuse.lock().unwrap() = Some(reason.to_string());
    }

    pub fn connects(&self) -> usize {
        self.targets.lock().unwrap().len()
    }
}

impl DeviceConnector for MockConnector {
    fn connect(&self, target: &DeviceTarget) -> Result<Arc<dyn DeviceClient>, ConnectError> {
        if let Some(reason) = self.refuse.lock().unwrap().clone() {
            return Err(ConnectError::Handshake(reason));
        }
        self.targets.lock().unwrap().push(target.clone());
        Ok(Arc::clone(&self.device) as Arc<dyn DeviceClient>)
    }
}
