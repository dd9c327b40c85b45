//! Turning delimited text lines from a serial device into named records.

use serde::Serialize;
use serde_json::{Map, Number, Value};

use crate::error_handling::types::RecordError;

/// Longest line kept while waiting for its terminator.
const MAX_PENDING_BYTES: usize = 64 * 1024;

/// Ordered field names and the delimiter separating them on the wire.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordLayout {
    pub keys: Vec<String>,
    pub delimiter: String,
}

impl RecordLayout {
    pub fn new(keys: Vec<String>, delimiter: impl Into<String>) -> Self {
        Self {
            keys,
            delimiter: delimiter.into(),
        }
    }

    /// Maps the fields of `line` onto the layout keys, in order.
    pub fn parse(&self, line: &str) -> Result<Map<String, Value>, RecordError> {
        let fields: Vec<&str> = line.split(self.delimiter.as_str()).collect();
        if fields.len() != self.keys.len() {
            return Err(RecordError::FieldCount {
                expected: self.keys.len(),
                found: fields.len(),
            });
        }

        Ok(self
            .keys
            .iter()
            .zip(fields)
            .map(|(key, raw)| (key.clone(), field_value(raw)))
            .collect())
    }
}

fn field_value(raw: &str) -> Value {
    let trimmed = raw.trim();
    if let Ok(int) = trimmed.parse::<i64>() {
        return Value::Number(int.into());
    }
    if let Some(float) = trimmed.parse::<f64>().ok().and_then(Number::from_f64) {
        return Value::Number(float);
    }
    Value::String(trimmed.to_string())
}

/// Accumulates raw bytes and yields complete, non-empty lines.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Result<String, RecordError>> {
        self.pending.extend_from_slice(bytes);

        let mut lines = Vec::new();
        while let Some(end) = self.pending.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.pending.drain(..=end).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            if line.iter().all(|b| b.is_ascii_whitespace()) {
                continue;
            }
            lines.push(String::from_utf8(line).map_err(|_| RecordError::InvalidUtf8));
        }

        if self.pending.len() > MAX_PENDING_BYTES {
            let dropped = self.pending.len();
            self.pending.clear();
            lines.push(Err(RecordError::LineTooLong(dropped)));
        }
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn layout() -> RecordLayout {
        RecordLayout::new(
            vec!["sensor_id".into(), "value".into(), "unit".into()],
            ",",
        )
    }

    #[test]
    fn parses_fields_in_layout_order() {
        let record = layout().parse("7, 21.5 ,C").unwrap();
        assert_eq!(
            Value::Object(record),
            json!({"sensor_id": 7, "value": 21.5, "unit": "C"})
        );
    }

    #[test]
    fn field_count_mismatch_is_an_error() {
        let err = layout().parse("7,21.5").unwrap_err();
        assert_eq!(
            err,
            RecordError::FieldCount {
                expected: 3,
                found: 2
            }
        );
    }

    #[test]
    fn multi_character_delimiter() {
        let layout = RecordLayout::new(vec!["a".into(), "b".into()], "||");
        let record = layout.parse("x||-3").unwrap();
        assert_eq!(Value::Object(record), json!({"a": "x", "b": -3}));
    }

    #[test]
    fn line_buffer_keeps_partial_lines() {
        let mut buffer = LineBuffer::default();

        assert!(buffer.push(b"1,2,").is_empty());
        let lines = buffer.push(b"C\r\n\n3,4,F\n5,");

        assert_eq!(
            lines,
            vec![Ok("1,2,C".to_string()), Ok("3,4,F".to_string())]
        );
        assert_eq!(buffer.push(b"6,K\n"), vec![Ok("5,6,K".to_string())]);
    }

    #[test]
    fn line_buffer_reports_invalid_utf8() {
        let mut buffer = LineBuffer::default();
        let lines = buffer.push(&[0xff, 0xfe, b'\n', b'o', b'k', b'\n']);
        assert_eq!(lines, vec![Err(RecordError::InvalidUtf8), Ok("ok".to_string())]);
    }

    #[test]
    fn line_buffer_drops_runaway_lines() {
        let mut buffer = LineBuffer::default();
        let lines = buffer.push(&vec![b'x'; MAX_PENDING_BYTES + 1]);
        assert_eq!(lines, vec![Err(RecordError::LineTooLong(MAX_PENDING_BYTES + 1))]);
        assert!(buffer.push(b"\n").is_empty());
    }
}
