//! JSON frame decoder.
//!
//! Stations that cannot speak UMB send one JSON document per frame:
//!
//! ```json
//! {"device_id": 7, "readings": [
//!     {"field": "AirTemperature", "value": 21.456},
//!     {"channel": 900, "value": "Dry"},
//!     {"channel": 200, "error": 85}
//! ]}
//! ```
//!
//! Entries addressed by `channel` are named through the field catalog.

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;

use super::frame::{round2, DecodedFrame, Reading, ReadingValue};
use crate::catalog::FieldCatalog;
use crate::error::DecodeError;
use crate::handler::FrameDecoder;

#[derive(Debug, Deserialize)]
struct JsonFrame {
    device_id: u8,
    #[serde(default)]
    readings: Vec<JsonReading>,
}

#[derive(Debug, Deserialize)]
struct JsonReading {
    #[serde(default)]
    field: Option<String>,
    #[serde(default)]
    channel: Option<u16>,
    #[serde(default)]
    value: Option<JsonValue>,
    #[serde(default)]
    error: Option<u8>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum JsonValue {
    Number(f64),
    Text(String),
}

/// Decoder registered under the `JSON` tag.
#[derive(Debug, Clone)]
pub struct JsonDecoder {
    catalog: Arc<FieldCatalog>,
}

impl JsonDecoder {
    /// Create a decoder over a shared catalog.
    pub fn new(catalog: Arc<FieldCatalog>) -> Self {
        Self { catalog }
    }
}

impl FrameDecoder for JsonDecoder {
    fn decode(&self, frame: &[u8]) -> Result<DecodedFrame, DecodeError> {
        decode_frame(frame, &self.catalog)
    }
}

/// Decode one JSON frame.
pub fn decode_frame(frame: &[u8], catalog: &FieldCatalog) -> Result<DecodedFrame, DecodeError> {
    let captured_at = Utc::now();
    let parsed: JsonFrame =
        serde_json::from_slice(frame).map_err(|e| DecodeError::MalformedJson(e.to_string()))?;

    let mut decoded = DecodedFrame::new(parsed.device_id, captured_at);

    for (slot, entry) in parsed.readings.into_iter().enumerate() {
        let field = match (entry.field, entry.channel) {
            (Some(field), _) => field,
            (None, Some(channel)) => catalog.field_name(parsed.device_id, channel),
            (None, None) => {
                tracing::warn!(slot, "JSON reading has neither field nor channel");
                continue;
            }
        };

        let value = match (entry.error, entry.value) {
            (Some(code), _) if code != 0 => ReadingValue::ErrorCode(code),
            (_, Some(JsonValue::Number(v))) if v.is_finite() => ReadingValue::Float(round2(v)),
            (_, Some(JsonValue::Number(_))) => ReadingValue::InvalidFloat,
            (_, Some(JsonValue::Text(text))) => ReadingValue::Category(text),
            (_, None) => {
                tracing::warn!(slot, field = %field, "JSON reading has no value");
                continue;
            }
        };

        decoded.push(Reading::new(field, value));
    }

    Ok(decoded)
}
