//! Typed wrappers over the obs-websocket requests the gateway uses.

use serde::Deserialize;
use serde_json::{json, Value};

use super::link::ControllerLink;
use crate::error_handling::types::CallError;

/// Live recording output state as reported by `GetRecordStatus`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RecordStatus {
    #[serde(rename = "outputActive")]
    pub active: bool,
    #[serde(rename = "outputPaused", default)]
    pub paused: bool,
    #[serde(rename = "outputTimecode", default)]
    pub timecode: Option<String>,
}

fn string_field(request: &str, reply: &Value, field: &str) -> Result<String, CallError> {
    reply
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| CallError::Protocol(format!("{} reply has no {}", request, field)))
}

impl ControllerLink {
    pub async fn start_record(&self) -> Result<(), CallError> {
        self.call("StartRecord", None).await.map(|_| ())
    }

    /// Stops the recording and returns where OBS wrote it, when it says.
    pub async fn stop_record(&self) -> Result<Option<String>, CallError> {
        let reply = self.call("StopRecord", None).await?;
        Ok(reply
            .get("outputPath")
            .and_then(Value::as_str)
            .map(str::to_string))
    }

    pub async fn pause_record(&self) -> Result<(), CallError> {
        self.call("PauseRecord", None).await.map(|_| ())
    }

    pub async fn resume_record(&self) -> Result<(), CallError> {
        self.call("ResumeRecord", None).await.map(|_| ())
    }

    pub async fn record_status(&self) -> Result<RecordStatus, CallError> {
        let reply = self.call("GetRecordStatus", None).await?;
        serde_json::from_value(reply)
            .map_err(|e| CallError::Protocol(format!("GetRecordStatus reply: {}", e)))
    }

    pub async fn set_record_directory(&self, directory: &str) -> Result<(), CallError> {
        self.call(
            "SetRecordDirectory",
            Some(json!({ "recordDirectory": directory })),
        )
        .await
        .map(|_| ())
    }

    pub async fn start_replay_buffer(&self) -> Result<(), CallError> {
        self.call("StartReplayBuffer", None).await.map(|_| ())
    }

    pub async fn stop_replay_buffer(&self) -> Result<(), CallError> {
        self.call("StopReplayBuffer", None).await.map(|_| ())
    }

    /// Asks OBS to flush the replay buffer to disk. The saved path is only announced later
    /// through an event, so nothing is returned here.
    pub async fn save_replay_buffer(&self) -> Result<(), CallError> {
        self.call("SaveReplayBuffer", None).await.map(|_| ())
    }

    pub async fn current_program_scene(&self) -> Result<String, CallError> {
        let reply = self.call("GetCurrentProgramScene", None).await?;
        string_field("GetCurrentProgramScene", &reply, "currentProgramSceneName")
    }

    /// Returns the screenshot as OBS sends it: base64, usually behind a `data:` URI prefix.
    pub async fn source_screenshot(
        &self,
        source: &str,
        format: &str,
        width: u32,
        height: u32,
    ) -> Result<String, CallError> {
        let reply = self
            .call(
                "GetSourceScreenshot",
                Some(json!({
                    "sourceName": source,
                    "imageFormat": format,
                    "imageWidth": width,
                    "imageHeight": height,
                })),
            )
            .await?;
        string_field("GetSourceScreenshot", &reply, "imageData")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device_link::client::DeviceTarget;
    use crate::device_link::mock_device::{MockConnector, MockDevice};
    use std::sync::Arc;
    use std::time::Duration;

    async fn connected(device: &Arc<MockDevice>) -> ControllerLink {
        let link = ControllerLink::new(
            MockConnector::new(Arc::clone(device)),
            2,
            Duration::from_secs(1),
        );
        link.connect(DeviceTarget {
            host: "localhost".to_string(),
            port: 4455,
            password: String::new(),
            timeout: Duration::from_secs(1),
        })
        .await
        .unwrap();
        link
    }

    #[tokio::test]
    async fn record_status_follows_device() {
        let device = MockDevice::new();
        let link = connected(&device).await;

        assert!(!link.record_status().await.unwrap().active);
        link.start_record().await.unwrap();
        link.pause_record().await.unwrap();

        let status = link.record_status().await.unwrap();
        assert!(status.active);
        assert!(status.paused);
        assert_eq!(status.timecode.as_deref(), Some("00:00:05.000"));
    }

    #[tokio::test]
    async fn stop_record_returns_output_path() {
        let device = MockDevice::new();
        let link = connected(&device).await;

        link.start_record().await.unwrap();
        assert_eq!(
            link.stop_record().await.unwrap().as_deref(),
            Some("/videos/2024-03-01 12-00-00.mkv")
        );
    }

    #[tokio::test]
    async fn screenshot_request_carries_dimensions() {
        let device = MockDevice::new();
        let link = connected(&device).await;

        link.source_screenshot("Scene", "jpg", 640, 480).await.unwrap();
        assert_eq!(
            device.last_data("GetSourceScreenshot"),
            Some(json!({
                "sourceName": "Scene",
                "imageFormat": "jpg",
                "imageWidth": 640,
                "imageHeight": 480
            }))
        );
    }

    #[tokio::test]
    async fn device_refusals_surface_as_request_errors() {
        let device = MockDevice::new();
        device.state.lock().unwrap().scene = None;
        let link = connected(&device).await;

        assert!(matches!(
            link.current_program_scene().await,
            Err(CallError::Request { code: 600, .. })
        ));
        assert!(matches!(
            link.stop_replay_buffer().await,
            Err(CallError::Request { .. })
        ));
    }
}
