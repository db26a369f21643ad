//! UMB data frame decoder.
//!
//! Frame layout (0-indexed byte offsets):
//!
//! ```text
//! ┌─────────┬────────┬─────────┬──────────┬────────────────────┬─────┬─────┬─────┐
//! │ 0..5    │ 5      │ 6..11   │ 11       │ 12..               │     │     │     │
//! │ header  │ class  │ header  │ channels │ channel records    │ CRC │ CRC │ EOT │
//! │         │ (hi 4) │         │ count    │ (self-describing)  │ lo  │ hi  │     │
//! └─────────┴────────┴─────────┴──────────┴────────────────────┴─────┴─────┴─────┘
//! ```
//!
//! Each channel record:
//!
//! ```text
//! │ len │ err │ chan lo │ chan hi │ type │ value (1 or 4 bytes) │
//! ```
//!
//! `len` counts the bytes after itself. Records with `err != 0x00` stop after
//! the channel index and are skipped using `len`.
//!
//! A channel that cannot be decoded is logged and dropped; the remaining
//! channels of the frame are still decoded.

use std::sync::Arc;

use chrono::Utc;
use tracing::warn;

use super::frame::{round2, DecodedFrame, Reading, ReadingValue};
use crate::catalog::FieldCatalog;
use crate::error::DecodeError;
use crate::handler::FrameDecoder;

/// Offset of the byte whose high nibble is the device class.
pub const DEVICE_ID_OFFSET: usize = 5;

/// Offset of the channel count.
pub const CHANNEL_COUNT_OFFSET: usize = 11;

/// Offset of the first channel record.
pub const CHANNELS_OFFSET: usize = 12;

/// Error code meaning "value present".
pub const NO_ERROR: u8 = 0x00;

/// Unsigned char data type (enumerated value).
pub const TYPE_UNSIGNED_CHAR: u8 = 0x10;

/// Signed char data type (enumerated value).
pub const TYPE_SIGNED_CHAR: u8 = 0x11;

/// Width of a float value.
const FLOAT_WIDTH: usize = 4;

/// Decoder registered under the `UMB` tag.
#[derive(Debug, Clone)]
pub struct UmbDecoder {
    catalog: Arc<FieldCatalog>,
}

impl UmbDecoder {
    /// Create a decoder over a shared catalog.
    pub fn new(catalog: Arc<FieldCatalog>) -> Self {
        Self { catalog }
    }
}

impl FrameDecoder for UmbDecoder {
    fn requires_crc(&self) -> bool {
        true
    }

    fn decode(&self, frame: &[u8]) -> Result<DecodedFrame, DecodeError> {
        decode_frame(frame, &self.catalog)
    }
}

/// One channel slot, alive only while its reading is produced.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelRecord<'a> {
    pub data_len: u8,
    pub error_code: u8,
    pub channel: u16,
    pub data_type: Option<u8>,
    pub raw_value: &'a [u8],
}

impl ChannelRecord<'_> {
    fn is_enumerated(&self) -> bool {
        matches!(
            self.data_type,
            Some(TYPE_UNSIGNED_CHAR) | Some(TYPE_SIGNED_CHAR)
        )
    }

    /// Map the record to a reading using the device's catalog.
    fn into_reading(self, device_id: u8, catalog: &FieldCatalog) -> Reading {
        let field = catalog.field_name(device_id, self.channel);

        let value = if self.error_code != NO_ERROR {
            ReadingValue::ErrorCode(self.error_code)
        } else if self.is_enumerated() {
            match self.raw_value.first() {
                Some(&code) => ReadingValue::Category(catalog.category(code).to_string()),
                None => ReadingValue::Category(crate::catalog::UNKNOWN_CATEGORY.to_string()),
            }
        } else {
            decode_float(self.raw_value)
        };

        Reading::new(field, value)
    }
}

/// Forward-only reader over the frame bytes.
struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8], pos: usize) -> Self {
        Self { bytes, pos }
    }

    fn u8(&mut self) -> Option<u8> {
        let b = *self.bytes.get(self.pos)?;
        self.pos += 1;
        Some(b)
    }

    fn u16_le(&mut self) -> Option<u16> {
        let lo = *self.bytes.get(self.pos)?;
        let hi = *self.bytes.get(self.pos + 1)?;
        self.pos += 2;
        Some(u16::from_le_bytes([lo, hi]))
    }

    /// Take up to `n` bytes; the cursor always advances by `n`.
    fn take_up_to(&mut self, n: usize) -> &'a [u8] {
        let start = self.pos.min(self.bytes.len());
        let end = (self.pos + n).min(self.bytes.len());
        self.pos += n;
        &self.bytes[start..end]
    }
}

/// Decode a complete UMB frame.
///
/// Returns the device class and the readings, led by the capture timestamp.
/// Only a frame too short to carry the fixed header is an error.
pub fn decode_frame(frame: &[u8], catalog: &FieldCatalog) -> Result<DecodedFrame, DecodeError> {
    if frame.len() < CHANNELS_OFFSET {
        return Err(DecodeError::TruncatedFrame {
            needed: CHANNELS_OFFSET,
            actual: frame.len(),
        });
    }

    let device_id = frame[DEVICE_ID_OFFSET] >> 4;
    let channel_count = frame[CHANNEL_COUNT_OFFSET] as usize;
    let mut decoded = DecodedFrame::new(device_id, Utc::now());

    let mut pos = CHANNELS_OFFSET;
    for slot in 0..channel_count {
        if pos >= frame.len() {
            warn!(
                device_id,
                missing = channel_count - slot,
                "frame ended before all channels were decoded"
            );
            break;
        }

        match read_channel(frame, pos) {
            Ok((record, next)) => {
                decoded.push(record.into_reading(device_id, catalog));
                pos = next;
            }
            Err((err, next)) => {
                warn!(device_id, slot, error = %err, "dropping undecodable channel");
                pos = next;
            }
        }
    }

    Ok(decoded)
}

/// Read the channel record starting at `start`.
///
/// On success returns the record and the offset of the next one. On failure
/// returns the error and the offset to resume from.
fn read_channel(
    frame: &[u8],
    start: usize,
) -> Result<(ChannelRecord<'_>, usize), (DecodeError, usize)> {
    let truncated = DecodeError::TruncatedChannel { offset: start };
    let mut cursor = Cursor::new(frame, start);

    let data_len = cursor.u8().ok_or((truncated.clone(), frame.len()))?;
    let skip_to = start + 1 + data_len as usize;

    let error_code = cursor.u8().ok_or((truncated.clone(), skip_to))?;
    let channel = cursor.u16_le().ok_or((truncated.clone(), skip_to))?;

    if error_code != NO_ERROR {
        let record = ChannelRecord {
            data_len,
            error_code,
            channel,
            data_type: None,
            raw_value: &[],
        };
        return Ok((record, skip_to));
    }

    let data_type = cursor.u8().ok_or((truncated.clone(), skip_to))?;
    let mut record = ChannelRecord {
        data_len,
        error_code,
        channel,
        data_type: Some(data_type),
        raw_value: &[],
    };

    if record.is_enumerated() {
        record.raw_value = cursor.take_up_to(1);
        if record.raw_value.is_empty() {
            return Err((truncated, skip_to));
        }
    } else {
        record.raw_value = cursor.take_up_to(FLOAT_WIDTH);
    }

    Ok((record, cursor.pos))
}

/// Decode a float stored least-significant byte first.
fn decode_float(raw: &[u8]) -> ReadingValue {
    let Ok(bytes) = <[u8; FLOAT_WIDTH]>::try_from(raw) else {
        return ReadingValue::InvalidFloat;
    };
    let value = f32::from_le_bytes(bytes);
    if value.is_finite() {
        ReadingValue::Float(round2(value as f64))
    } else {
        ReadingValue::InvalidFloat
    }
}
