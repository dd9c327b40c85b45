//! Inbound command and outbound response shapes.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error_handling::types::HandlerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Error,
}

/// One decoded inbound message.
#[derive(Debug, Clone, Deserialize)]
pub struct CommandEnvelope {
    pub command: String,
    /// Opaque correlation token, echoed verbatim whatever its JSON type.
    #[serde(default)]
    pub command_uid: Option<Value>,
    #[serde(default)]
    pub instance_id: Option<String>,
    #[serde(default)]
    parameter: Option<Map<String, Value>>,
}

impl CommandEnvelope {
    pub fn parameters(&self) -> Parameters {
        Parameters::new(self.parameter.clone().unwrap_or_default())
    }
}

/// Why an inbound message could not be turned into a [`CommandEnvelope`].
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeFailure {
    /// Correlation token salvaged from the broken message, if any
    pub command_uid: Option<Value>,
    pub reason: String,
}

/// Decodes a raw text frame.
///
/// On failure the `command_uid` is recovered from whatever part of the message is readable:
/// from the JSON object when only the envelope shape is wrong, otherwise by pattern match on the
/// raw text.
pub fn decode(raw: &str) -> Result<CommandEnvelope, DecodeFailure> {
    match serde_json::from_str::<Value>(raw) {
        Ok(value) => {
            let command_uid = value
                .get("command_uid")
                .filter(|uid| !uid.is_null())
                .cloned();
            serde_json::from_value(value).map_err(|e| DecodeFailure {
                command_uid,
                reason: e.to_string(),
            })
        }
        Err(e) => Err(DecodeFailure {
            command_uid: recover_command_uid(raw),
            reason: e.to_string(),
        }),
    }
}

fn recover_command_uid(raw: &str) -> Option<Value> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    let pattern = PATTERN
        .get_or_init(|| {
            Regex::new(r#""command_uid"\s*:\s*("(?:[^"\\]|\\.)*"|-?[0-9]+(?:\.[0-9]+)?)"#).ok()
        })
        .as_ref()?;

    let captured = pattern.captures(raw)?.get(1)?.as_str();
    serde_json::from_str(captured).ok()
}

/// The reply to one command, or a push notification on a stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub status: Status,
    pub command_uid: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<Uuid>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Map<String, Value>>,
}

impl ResponseEnvelope {
    pub fn success(
        command_uid: Option<Value>,
        instance_id: Option<Uuid>,
        message: impl Into<String>,
        data: Option<Map<String, Value>>,
    ) -> Self {
        Self {
            status: Status::Success,
            command_uid,
            instance_id,
            message: message.into(),
            data,
        }
    }

    pub fn error(
        command_uid: Option<Value>,
        instance_id: Option<Uuid>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            status: Status::Error,
            command_uid,
            instance_id,
            message: message.into(),
            data: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }

    pub fn to_json(&self) -> String {
        // Serializing this struct cannot fail: every field is a plain JSON value.
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"status":"error","command_uid":null,"message":"Error serializing response"}"#
                .to_string()
        })
    }
}

/// Typed access to a command's `parameter` object. A key holding `null` counts as absent.
#[derive(Debug, Clone, Default)]
pub struct Parameters {
    values: Map<String, Value>,
}

impl Parameters {
    pub fn new(values: Map<String, Value>) -> Self {
        Self { values }
    }

    fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name).filter(|v| !v.is_null())
    }

    fn invalid(name: &str, expected: &'static str) -> HandlerError {
        HandlerError::InvalidParameter {
            name: name.to_string(),
            expected,
        }
    }

    pub fn opt_str(&self, name: &str) -> Result<Option<String>, HandlerError> {
        match self.get(name) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(_) => Err(Self::invalid(name, "a string")),
        }
    }

    pub fn str_or(&self, name: &str, default: &str) -> Result<String, HandlerError> {
        Ok(self.opt_str(name)?.unwrap_or_else(|| default.to_string()))
    }

    pub fn required_str(&self, name: &str) -> Result<String, HandlerError> {
        match self.opt_str(name) {
            Ok(Some(s)) if !s.trim().is_empty() => Ok(s),
            Ok(_) => Err(Self::invalid(name, "a non-empty string")),
            Err(e) => Err(e),
        }
    }

    /// Unsigned integer given either as a JSON number or a numeric string.
    pub fn opt_u64(&self, name: &str) -> Result<Option<u64>, HandlerError> {
        match self.get(name) {
            None => Ok(None),
            Some(Value::Number(n)) => n
                .as_u64()
                .map(Some)
                .ok_or_else(|| Self::invalid(name, "a non-negative integer")),
            Some(Value::String(s)) => s
                .trim()
                .parse::<u64>()
                .map(Some)
                .map_err(|_| Self::invalid(name, "a non-negative integer")),
            Some(_) => Err(Self::invalid(name, "a non-negative integer")),
        }
    }

    pub fn u16_or(&self, name: &str, default: u16) -> Result<u16, HandlerError> {
        match self.opt_u64(name)? {
            None => Ok(default),
            Some(v) => u16::try_from(v).map_err(|_| Self::invalid(name, "an integer up to 65535")),
        }
    }

    pub fn u32_or(&self, name: &str, default: u32) -> Result<u32, HandlerError> {
        match self.opt_u64(name)? {
            None => Ok(default),
            Some(v) => u32::try_from(v).map_err(|_| Self::invalid(name, "a 32-bit integer")),
        }
    }

    pub fn opt_string_list(&self, name: &str) -> Result<Option<Vec<String>>, HandlerError> {
        match self.get(name) {
            None => Ok(None),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| match item {
                    Value::String(s) => Ok(s.clone()),
                    _ => Err(Self::invalid(name, "a list of strings")),
                })
                .collect::<Result<Vec<_>, _>>()
                .map(Some),
            Some(_) => Err(Self::invalid(name, "a list of strings")),
        }
    }
}
